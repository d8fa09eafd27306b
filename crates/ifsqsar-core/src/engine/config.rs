use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid separator '{separator}': {reason}")]
    InvalidSeparator { separator: String, reason: String },
}

/// Whether each structure is written as a row or as a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputShape {
    #[default]
    Rows,
    Columns,
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputShape::Rows => write!(f, "rows"),
            OutputShape::Columns => write!(f, "columns"),
        }
    }
}

impl FromStr for OutputShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rows" => Ok(OutputShape::Rows),
            "columns" => Ok(OutputShape::Columns),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// A column of output. The first three describe the structure, the rest repeat per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputField {
    InputNotation,
    CanonicalId,
    StructureNote,
    Units,
    Prediction,
    UncertaintyLevel,
    Error,
    Note,
}

impl OutputField {
    pub const ALL: [OutputField; 8] = [
        OutputField::InputNotation,
        OutputField::CanonicalId,
        OutputField::StructureNote,
        OutputField::Units,
        OutputField::Prediction,
        OutputField::UncertaintyLevel,
        OutputField::Error,
        OutputField::Note,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OutputField::InputNotation => "insmi",
            OutputField::CanonicalId => "normsmi",
            OutputField::StructureNote => "sminote",
            OutputField::Units => "units",
            OutputField::Prediction => "qsarpred",
            OutputField::UncertaintyLevel => "UL",
            OutputField::Error => "error",
            OutputField::Note => "ULnote",
        }
    }

    pub fn is_per_model(&self) -> bool {
        !matches!(
            self,
            OutputField::InputNotation | OutputField::CanonicalId | OutputField::StructureNote
        )
    }
}

impl FromStr for OutputField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputField::ALL
            .iter()
            .find(|f| f.label().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown output field '{}'", s))
    }
}

/// How an input table is read when structures come from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTableConfig {
    pub header_rows: usize,
    /// One-based header row holding the column names.
    pub header_target_row: usize,
    pub notation_column: String,
    pub separator: String,
}

impl Default for InputTableConfig {
    fn default() -> Self {
        Self {
            header_rows: 1,
            header_target_row: 1,
            notation_column: "smiles".to_string(),
            separator: "\t".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub shape: OutputShape,
    pub fields: Vec<OutputField>,
    pub header: bool,
    pub separator: String,
    pub end_of_line: String,
    pub include_input: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyConfig {
    /// Model selections, each a name or `name@version`.
    pub models: Vec<String>,
    pub output: OutputConfig,
    pub input: InputTableConfig,
}

#[derive(Default)]
pub struct ApplyConfigBuilder {
    models: Option<Vec<String>>,
    shape: Option<OutputShape>,
    fields: Option<Vec<OutputField>>,
    header: Option<bool>,
    separator: Option<String>,
    end_of_line: Option<String>,
    include_input: Option<bool>,
    input: Option<InputTableConfig>,
}

impl ApplyConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn models(mut self, models: Vec<String>) -> Self {
        self.models = Some(models);
        self
    }
    pub fn shape(mut self, shape: OutputShape) -> Self {
        self.shape = Some(shape);
        self
    }
    pub fn fields(mut self, fields: Vec<OutputField>) -> Self {
        self.fields = Some(fields);
        self
    }
    pub fn header(mut self, header: bool) -> Self {
        self.header = Some(header);
        self
    }
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }
    pub fn end_of_line(mut self, end_of_line: impl Into<String>) -> Self {
        self.end_of_line = Some(end_of_line.into());
        self
    }
    pub fn include_input(mut self, include: bool) -> Self {
        self.include_input = Some(include);
        self
    }
    pub fn input(mut self, input: InputTableConfig) -> Self {
        self.input = Some(input);
        self
    }

    pub fn build(self) -> Result<ApplyConfig, ConfigError> {
        let models = self
            .models
            .filter(|m| !m.is_empty())
            .ok_or(ConfigError::MissingParameter("models"))?;
        let separator = self.separator.unwrap_or_else(|| "\t".to_string());
        let end_of_line = self.end_of_line.unwrap_or_else(|| "\n".to_string());

        if separator.is_empty() {
            return Err(ConfigError::InvalidSeparator {
                separator,
                reason: "separator must not be empty".to_string(),
            });
        }
        if separator == end_of_line {
            return Err(ConfigError::InvalidSeparator {
                separator,
                reason: "separator must differ from the end-of-line marker".to_string(),
            });
        }

        Ok(ApplyConfig {
            models,
            output: OutputConfig {
                shape: self.shape.unwrap_or_default(),
                fields: self.fields.unwrap_or_else(|| OutputField::ALL.to_vec()),
                header: self.header.unwrap_or(true),
                separator,
                end_of_line,
                include_input: self.include_input.unwrap_or(false),
            },
            input: self.input.unwrap_or_default(),
        })
    }
}
