use super::uncertainty::UncertaintyLevel;

/// The outcome of applying one model to one structure (or mixture).
///
/// Numeric fields use `None` for "no value". Input errors are reported through this type
/// rather than as `Err`, so batch processing can continue past bad structures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QsarResult {
    pub prediction: Option<f64>,
    pub uncertainty_level: Option<UncertaintyLevel>,
    pub error: Option<f64>,
    pub note: String,
    pub citation: String,
    pub units: String,
    pub endpoint: String,
}

impl QsarResult {
    /// A result with no value fields and an explanatory note.
    pub fn failure(note: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            ..Self::default()
        }
    }

    pub fn has_value(&self) -> bool {
        self.prediction.is_some()
    }

    /// Attaches the descriptive metadata of the model that produced this result.
    pub fn with_metadata(mut self, citation: &str, units: &str, endpoint: &str) -> Self {
        self.citation = citation.to_string();
        self.units = units.to_string();
        self.endpoint = endpoint.to_string();
        self
    }

    /// Rounds the prediction and error to `digits` decimal places.
    pub fn rounded(mut self, digits: Option<i32>) -> Self {
        if let Some(digits) = digits {
            self.prediction = self.prediction.map(|v| round_to(v, digits));
            self.error = self.error.map(|v| round_to(v, digits));
        }
        self
    }
}

/// Rounds half away from zero at `digits` decimal places; negative `digits` round to tens,
/// hundreds, and so on.
pub fn round_to(value: f64, digits: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
