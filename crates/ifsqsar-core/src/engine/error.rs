use thiserror::Error;

use super::combiners::CombineError;
use super::context::InterpreterError;
use crate::core::models::definition::DefinitionError;
use crate::core::models::uncertainty::UncertaintyParseError;
use crate::core::structure::StructureError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model definition error: {source}")]
    Definition {
        #[from]
        source: DefinitionError,
    },

    #[error("Structure matching failed: {source}")]
    Structure {
        #[from]
        source: StructureError,
    },

    #[error("Instruction execution failed: {source}")]
    Interpreter {
        #[from]
        source: InterpreterError,
    },

    #[error("Combination function failed: {source}")]
    Combine {
        #[from]
        source: CombineError,
    },

    #[error("Invalid stored value: {source}")]
    StoredValue {
        #[from]
        source: UncertaintyParseError,
    },

    #[error("Model not found in catalog: {0}")]
    ModelNotFound(String),

    #[error("Model '{name}' has no version {version}")]
    VersionNotFound { name: String, version: u32 },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
