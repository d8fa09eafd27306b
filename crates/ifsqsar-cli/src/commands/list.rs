use crate::cli::ListArgs;
use crate::config;
use crate::error::Result;
use ifsqsar::core::io::source::DirectoryModelSource;
use ifsqsar::engine::registry::{ModelKind, ModelRegistry};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: ListArgs) -> Result<()> {
    let list_config = config::build_list_config(&args)?;
    for line in catalog_lines(&list_config.models_dir)? {
        println!("{}", line);
    }
    Ok(())
}

/// One tab-separated line per catalogued model: name, version, kind and units.
///
/// Models whose definitions fail to load are still listed, marked `unavailable`.
pub fn catalog_lines(models_dir: &Path) -> Result<Vec<String>> {
    info!("Reading model catalog from {:?}", models_dir);
    let mut registry = ModelRegistry::new(DirectoryModelSource::new(models_dir))?;
    let ids: Vec<_> = registry.models().collect();

    let mut lines = vec!["name\tversion\tkind\tunits".to_string()];
    for id in ids {
        let Some(entry) = registry.catalog_entry(id).cloned() else {
            continue;
        };
        let (kind, units) = match registry.load(id) {
            Ok(()) => {
                let kind = match registry.kind(id) {
                    Some(ModelKind::Direct) => "direct",
                    Some(ModelKind::Meta) => "meta",
                    None => "unavailable",
                };
                let units = registry
                    .metadata(id)
                    .map(|m| m.units.clone())
                    .unwrap_or_default();
                (kind, units)
            }
            Err(e) => {
                warn!(model = %registry.label(id), "Model could not be loaded: {}", e);
                ("unavailable", String::new())
            }
        };
        lines.push(format!("{}\t{}\t{}\t{}", entry.name, entry.version, kind, units));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn lists_loadable_and_broken_models() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("catalog.toml"),
            r#"
[[model]]
name = "carbons"
version = 1
file = "carbons-1.toml"

[[model]]
name = "broken"
version = 3
file = "missing.toml"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("carbons-1.toml"),
            r#"
kind = "direct"
coefficients = [[0.5]]

[settings]
units = "log units"
apply-domain = false

[[fragments]]
constant = 1.0

[training]
counts = []
values = []
"#,
        )
        .unwrap();

        let lines = catalog_lines(dir.path()).unwrap();
        assert_eq!(
            lines,
            vec![
                "name\tversion\tkind\tunits",
                "carbons\t1\tdirect\tlog units",
                "broken\t3\tunavailable\t",
            ]
        );
    }

    #[test]
    fn missing_catalog_is_a_core_error() {
        let dir = tempdir().unwrap();
        let result = catalog_lines(dir.path());
        assert!(matches!(result, Err(CliError::Core(_))));
    }
}
