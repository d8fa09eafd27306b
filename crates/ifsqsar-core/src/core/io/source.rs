use super::model_file::parse_model;
use crate::core::models::definition::{DefinitionError, ModelSpec};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The file that lists every model version available in a directory.
pub const CATALOG_FILE: &str = "catalog.toml";

/// One catalogued model version and where its definition lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntry {
    pub name: String,
    pub version: u32,
    pub file: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    #[serde(default)]
    model: Vec<CatalogEntry>,
}

/// Supplies the catalog up front and individual definitions on demand.
pub trait ModelSource {
    fn catalog(&self) -> Result<Vec<CatalogEntry>, DefinitionError>;

    fn load(&self, entry: &CatalogEntry) -> Result<ModelSpec, DefinitionError>;
}

/// Reads a `catalog.toml` and per-model TOML files from a directory.
#[derive(Debug, Clone)]
pub struct DirectoryModelSource {
    root: PathBuf,
}

impl DirectoryModelSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> Result<String, DefinitionError> {
        std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}

impl ModelSource for DirectoryModelSource {
    fn catalog(&self) -> Result<Vec<CatalogEntry>, DefinitionError> {
        let path = self.root.join(CATALOG_FILE);
        let content = self.read(&path)?;
        parse_catalog(&content, &path.display().to_string())
    }

    fn load(&self, entry: &CatalogEntry) -> Result<ModelSpec, DefinitionError> {
        let path = self.root.join(&entry.file);
        debug!(model = %entry.name, version = entry.version, path = %path.display(), "Reading model definition");
        let content = self.read(&path)?;
        parse_model(
            &entry.name,
            entry.version,
            &content,
            &path.display().to_string(),
        )
    }
}

/// Holds definition text in memory, keyed by catalog file name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModelSource {
    entries: Vec<CatalogEntry>,
    files: HashMap<String, String>,
}

impl InMemoryModelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str, version: u32, content: &str) -> Self {
        let file = format!("{}-v{}.toml", name, version);
        self.entries.push(CatalogEntry {
            name: name.to_string(),
            version,
            file: file.clone(),
        });
        self.files.insert(file, content.to_string());
        self
    }
}

impl ModelSource for InMemoryModelSource {
    fn catalog(&self) -> Result<Vec<CatalogEntry>, DefinitionError> {
        Ok(self.entries.clone())
    }

    fn load(&self, entry: &CatalogEntry) -> Result<ModelSpec, DefinitionError> {
        let content = self.files.get(&entry.file).ok_or_else(|| DefinitionError::Io {
            path: entry.file.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such in-memory model"),
        })?;
        parse_model(&entry.name, entry.version, content, &entry.file)
    }
}

fn parse_catalog(content: &str, path: &str) -> Result<Vec<CatalogEntry>, DefinitionError> {
    let raw: RawCatalog = toml::from_str(content).map_err(|e| DefinitionError::Toml {
        path: path.to_string(),
        source: e,
    })?;
    Ok(raw.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::model_file::samples;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn directory_source_reads_catalog_and_definitions() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CATALOG_FILE),
            r#"
[[model]]
name = "testprop"
version = 1
file = "testprop-v1.toml"

[[model]]
name = "MVliquid"
version = 1
file = "mvliquid.toml"
"#,
        )
        .unwrap();
        fs::write(dir.path().join("testprop-v1.toml"), samples::DIRECT).unwrap();

        let source = DirectoryModelSource::new(dir.path());
        let catalog = source.catalog().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[1].name, "MVliquid");

        let spec = source.load(&catalog[0]).unwrap();
        assert!(matches!(spec, ModelSpec::Direct(_)));

        let missing = source.load(&catalog[1]);
        assert!(matches!(missing, Err(DefinitionError::Io { .. })));
    }

    #[test]
    fn missing_catalog_is_an_io_error() {
        let dir = tempdir().unwrap();
        let source = DirectoryModelSource::new(dir.path());
        assert!(matches!(source.catalog(), Err(DefinitionError::Io { .. })));
    }

    #[test]
    fn catalog_rejects_unknown_keys() {
        let result = parse_catalog(
            "[[model]]\nname = \"a\"\nversion = 1\nfile = \"a.toml\"\nextra = 1\n",
            "catalog.toml",
        );
        assert!(matches!(result, Err(DefinitionError::Toml { .. })));
    }

    #[test]
    fn in_memory_source_serves_registered_models() {
        let source = InMemoryModelSource::new().with_model("MVliquid", 3, samples::META);
        let catalog = source.catalog().unwrap();
        assert_eq!(catalog[0].version, 3);
        let spec = source.load(&catalog[0]).unwrap();
        assert_eq!(spec.name(), "MVliquid");
    }
}
