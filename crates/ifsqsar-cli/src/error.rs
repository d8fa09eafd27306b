use ifsqsar::core::models::definition::DefinitionError;
use ifsqsar::core::structure::tabulated::TableLoadError;
use ifsqsar::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse file '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DefinitionError> for CliError {
    fn from(e: DefinitionError) -> Self {
        CliError::Core(e.into())
    }
}

impl From<TableLoadError> for CliError {
    fn from(e: TableLoadError) -> Self {
        let path = match &e {
            TableLoadError::Io { path, .. } | TableLoadError::Csv { path, .. } => {
                PathBuf::from(path)
            }
            TableLoadError::InvalidRow { .. } => PathBuf::from("<match table>"),
        };
        CliError::FileParsing {
            path,
            source: e.into(),
        }
    }
}
