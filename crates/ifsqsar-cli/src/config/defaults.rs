use directories::ProjectDirs;
use ifsqsar::engine::config::OutputShape;
use std::path::PathBuf;

pub const MATCH_TABLE_FILE: &str = "match-table.csv";

pub struct DefaultsConfig {
    pub format: OutputShape,
    pub separator: String,
    pub header: bool,
    pub include_input: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            format: OutputShape::Rows,
            separator: "\t".to_string(),
            header: true,
            include_input: false,
        }
    }
}

/// The per-user model directory, e.g. `~/.local/share/ifsqsar/models` on Linux.
pub fn default_models_dir() -> Option<PathBuf> {
    ProjectDirs::from("ca", "ifsqsar", "ifsqsar").map(|dirs| dirs.data_dir().join("models"))
}
