use super::{MatchList, PrepareMode, StructureError, StructureMatcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TableRow {
    notation: String,
    canonical_id: String,
    #[serde(default)]
    preparation: String,
    kind: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Error)]
pub enum TableLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid row {row} in match table: {message}")]
    InvalidRow { row: usize, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedHandle {
    id: String,
    prepared: Option<PrepareMode>,
}

type PatternKey = (String, Option<PrepareMode>, String);

/// A matcher backed by a precomputed table of match lists and descriptor values.
///
/// Rows with an empty `preparation` column apply to every preparation mode; rows naming
/// a mode take precedence once a handle has been prepared that way.
#[derive(Debug, Clone, Default)]
pub struct TabulatedMatcher {
    aliases: HashMap<String, String>,
    patterns: HashMap<PatternKey, MatchList>,
    descriptors: HashMap<(String, String), f64>,
}

impl TabulatedMatcher {
    pub fn load(path: &Path) -> Result<Self, TableLoadError> {
        let file = std::fs::File::open(path).map_err(|e| TableLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_reader(file).map_err(|e| match e {
            TableLoadError::Csv { source, .. } => TableLoadError::Csv {
                path: path.to_string_lossy().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, TableLoadError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut matcher = Self::default();

        for (index, record) in csv_reader.deserialize::<TableRow>().enumerate() {
            let row = record.map_err(|e| TableLoadError::Csv {
                path: "<reader>".to_string(),
                source: e,
            })?;
            let line = index + 2;
            matcher
                .aliases
                .insert(row.notation.clone(), row.canonical_id.clone());
            matcher
                .aliases
                .insert(row.canonical_id.clone(), row.canonical_id.clone());

            let preparation = if row.preparation.is_empty() {
                None
            } else {
                Some(row.preparation.parse::<PrepareMode>().map_err(|message| {
                    TableLoadError::InvalidRow { row: line, message }
                })?)
            };

            match row.kind.as_str() {
                "structure" => {}
                "pattern" => {
                    let matches = parse_match_list(&row.value).map_err(|message| {
                        TableLoadError::InvalidRow { row: line, message }
                    })?;
                    matcher
                        .patterns
                        .insert((row.canonical_id, preparation, row.key), matches);
                }
                "descriptor" => {
                    let value = row.value.parse::<f64>().map_err(|_| TableLoadError::InvalidRow {
                        row: line,
                        message: format!("descriptor value '{}' is not a number", row.value),
                    })?;
                    matcher.descriptors.insert((row.canonical_id, row.key), value);
                }
                other => {
                    return Err(TableLoadError::InvalidRow {
                        row: line,
                        message: format!("unknown row kind '{}'", other),
                    });
                }
            }
        }

        debug!(
            structures = matcher.aliases.len(),
            patterns = matcher.patterns.len(),
            "Loaded match table."
        );
        Ok(matcher)
    }
}

fn parse_match_list(value: &str) -> Result<MatchList, String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            m.split_whitespace()
                .map(|atom| {
                    atom.parse::<usize>()
                        .map_err(|_| format!("atom index '{}' is not an integer", atom))
                })
                .collect()
        })
        .collect()
}

impl StructureMatcher for TabulatedMatcher {
    type Handle = TabulatedHandle;

    fn parse(&self, notation: &str) -> Result<TabulatedHandle, StructureError> {
        self.aliases
            .get(notation.trim())
            .map(|id| TabulatedHandle {
                id: id.clone(),
                prepared: None,
            })
            .ok_or_else(|| StructureError::Parse {
                notation: notation.to_string(),
                reason: "structure is not present in the match table".to_string(),
            })
    }

    fn canonical_id(&self, handle: &TabulatedHandle) -> String {
        handle.id.clone()
    }

    fn find_matches(
        &self,
        handle: &TabulatedHandle,
        pattern: &str,
    ) -> Result<MatchList, StructureError> {
        if pattern.trim().is_empty() {
            return Err(StructureError::Pattern(pattern.to_string()));
        }
        let specific = handle
            .prepared
            .and_then(|mode| {
                self.patterns
                    .get(&(handle.id.clone(), Some(mode), pattern.to_string()))
            });
        let matches = specific
            .or_else(|| {
                self.patterns
                    .get(&(handle.id.clone(), None, pattern.to_string()))
            })
            .cloned()
            .unwrap_or_default();
        Ok(matches)
    }

    fn prepare(&self, handle: &mut TabulatedHandle, mode: PrepareMode) {
        handle.prepared = Some(mode);
    }

    fn holistic_descriptor(
        &self,
        handle: &TabulatedHandle,
        name: &str,
    ) -> Result<f64, StructureError> {
        self.descriptors
            .get(&(handle.id.clone(), name.to_string()))
            .copied()
            .ok_or_else(|| StructureError::Descriptor {
                name: name.to_string(),
                id: handle.id.clone(),
            })
    }
}
