use crate::core::models::definition::ModelDefinition;
use crate::core::models::instruction::{Accumulate, Operand, Value};
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpreterError {
    #[error("unresolved variable '{0}'")]
    UnresolvedVariable(String),

    #[error("variable '{name}' holds '{value}', expected a number")]
    TypeMismatch { name: String, value: String },

    #[error("'{op}' is undefined for {operand}")]
    MathDomain { op: &'static str, operand: f64 },

    #[error("no leverage matrix for fragments {}..{}", .0.start, .0.end)]
    MissingLeverageMatrix(Range<usize>),

    #[error("'{0}' needs at least one training chemical")]
    EmptyTrainingSet(&'static str),
}

/// The per-invocation variable store read and written by instructions.
///
/// A namespace is created for one model application and discarded afterwards; it is
/// never shared between structures.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    variables: HashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a namespace with the free-form scalar settings of a model.
    pub fn seeded<'s, I>(settings: I) -> Self
    where
        I: IntoIterator<Item = (&'s String, &'s Value)>,
    {
        Self {
            variables: settings
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Reads a variable that must exist and hold a number.
    pub fn number(&self, name: &str) -> Result<f64, InterpreterError> {
        match self.variables.get(name) {
            Some(Value::Number(n)) => Ok(*n),
            Some(Value::Text(t)) => Err(InterpreterError::TypeMismatch {
                name: name.to_string(),
                value: t.clone(),
            }),
            None => Err(InterpreterError::UnresolvedVariable(name.to_string())),
        }
    }

    /// Resolves an operand for numeric use. Names must exist and hold numbers.
    pub fn resolve_number(&self, operand: &Operand) -> Result<f64, InterpreterError> {
        match operand {
            Operand::Number(n) => Ok(*n),
            Operand::Name(name) => self.number(name),
        }
    }

    /// Resolves an operand for textual use. Unknown names stand for themselves.
    pub fn resolve_text(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Number(n) => Value::Number(*n),
            Operand::Name(name) => self
                .variables
                .get(name)
                .cloned()
                .unwrap_or_else(|| Value::Text(name.clone())),
        }
    }

    /// Adds `amount` to (or subtracts it from) an existing numeric variable.
    pub fn accumulate(
        &mut self,
        target: &str,
        mode: Accumulate,
        amount: f64,
    ) -> Result<(), InterpreterError> {
        let current = self.number(target)?;
        let updated = match mode {
            Accumulate::AddTo => current + amount,
            Accumulate::SubtractFrom => current - amount,
        };
        self.set(target, Value::Number(updated));
        Ok(())
    }
}

/// Everything one run of a model's instruction program may read.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub definition: &'a ModelDefinition,
    pub counts: &'a [f64],
    /// Descriptions of the atom checks this structure failed.
    pub violations: &'a [String],
}

impl<'a> EvaluationContext<'a> {
    pub fn new(definition: &'a ModelDefinition, counts: &'a [f64], violations: &'a [String]) -> Self {
        Self {
            definition,
            counts,
            violations,
        }
    }

    pub fn slice(&self, range: &Range<usize>) -> &'a [f64] {
        &self.counts[range.clone()]
    }
}
