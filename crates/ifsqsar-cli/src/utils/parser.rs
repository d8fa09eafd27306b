use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Model selection cannot be empty.")]
    EmptySelection,

    #[error("Invalid model selection '{0}'. Expected 'name' or 'name@version' (e.g., 'kowwin@2').")]
    InvalidSelection(String),

    #[error("Invalid version '{version}' in model selection '{selection}'. Expected a positive integer.")]
    InvalidVersion { selection: String, version: String },
}

/// A requested model, optionally pinned to one catalogued version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub name: String,
    pub version: Option<u32>,
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}@{}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

pub fn parse_model_selection(selection: &str) -> Result<ModelSelection, ParseError> {
    let selection = selection.trim();
    if selection.is_empty() {
        return Err(ParseError::EmptySelection);
    }
    match selection.split_once('@') {
        None => Ok(ModelSelection {
            name: selection.to_string(),
            version: None,
        }),
        Some((name, _)) if name.is_empty() => {
            Err(ParseError::InvalidSelection(selection.to_string()))
        }
        Some((name, version)) => {
            let version = version
                .parse::<u32>()
                .map_err(|_| ParseError::InvalidVersion {
                    selection: selection.to_string(),
                    version: version.to_string(),
                })?;
            Ok(ModelSelection {
                name: name.to_string(),
                version: Some(version),
            })
        }
    }
}

/// Parses every selection and pins unversioned names found in `versions`.
pub fn resolve_selections(
    selections: &[String],
    versions: &HashMap<String, u32>,
) -> Result<Vec<String>, ParseError> {
    selections
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let mut parsed = parse_model_selection(s)?;
            if parsed.version.is_none() {
                parsed.version = versions.get(&parsed.name).copied();
            }
            Ok(parsed.to_string())
        })
        .collect()
}

/// Turns the escapes accepted on the command line into the characters they name.
pub fn unescape_separator(raw: &str) -> String {
    match raw {
        "\\t" | "tab" => "\t".to_string(),
        "\\n" => "\n".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_versioned_names() {
        assert_eq!(
            parse_model_selection("kowwin").unwrap(),
            ModelSelection {
                name: "kowwin".to_string(),
                version: None
            }
        );
        assert_eq!(
            parse_model_selection(" koawin@3 ").unwrap(),
            ModelSelection {
                name: "koawin".to_string(),
                version: Some(3)
            }
        );
    }

    #[test]
    fn rejects_malformed_selections() {
        assert_eq!(parse_model_selection(""), Err(ParseError::EmptySelection));
        assert!(matches!(
            parse_model_selection("@2"),
            Err(ParseError::InvalidSelection(_))
        ));
        assert!(matches!(
            parse_model_selection("kowwin@two"),
            Err(ParseError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn version_table_pins_only_unversioned_names() {
        let versions = HashMap::from([("kowwin".to_string(), 1), ("tmp".to_string(), 4)]);
        let selections = vec![
            "kowwin".to_string(),
            "tmp@2".to_string(),
            "hhlb".to_string(),
            "".to_string(),
        ];
        let resolved = resolve_selections(&selections, &versions).unwrap();
        assert_eq!(resolved, vec!["kowwin@1", "tmp@2", "hhlb"]);
    }

    #[test]
    fn separator_escapes_are_expanded() {
        assert_eq!(unescape_separator("\\t"), "\t");
        assert_eq!(unescape_separator("tab"), "\t");
        assert_eq!(unescape_separator(","), ",");
    }
}
