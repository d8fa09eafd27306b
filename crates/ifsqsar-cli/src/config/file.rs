use crate::error::{CliError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileModelsConfig {
    pub directory: Option<PathBuf>,
    pub match_table: Option<PathBuf>,
    pub qsars: Option<Vec<String>>,
    pub versions: Option<HashMap<String, u32>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileOutputConfig {
    pub format: Option<String>,
    pub separator: Option<String>,
    pub header: Option<bool>,
    pub include_input: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub models: Option<FileModelsConfig>,
    pub output: Option<FileOutputConfig>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_both_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ifsqsar.toml");
        fs::write(
            &path,
            r#"
            [models]
            directory = "/opt/ifsqsar/models"
            qsars = ["kowwin", "hhlb@2"]
            versions = { kowwin = 1 }

            [output]
            format = "columns"
            include-input = true
            "#,
        )
        .unwrap();

        let config = FileConfig::from_file(&path).unwrap();
        let models = config.models.unwrap();
        assert_eq!(models.directory, Some(PathBuf::from("/opt/ifsqsar/models")));
        assert_eq!(models.qsars.unwrap(), vec!["kowwin", "hhlb@2"]);
        assert_eq!(models.versions.unwrap().get("kowwin"), Some(&1));
        let output = config.output.unwrap();
        assert_eq!(output.format.as_deref(), Some("columns"));
        assert_eq!(output.include_input, Some(true));
        assert!(output.header.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ifsqsar.toml");
        fs::write(&path, "[output]\ndelimiter = \",\"\n").unwrap();

        let result = FileConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = FileConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
