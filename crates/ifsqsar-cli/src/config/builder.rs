use super::defaults::{DefaultsConfig, MATCH_TABLE_FILE, default_models_dir};
use super::file::{FileConfig, FileModelsConfig};
use super::models::{AppConfig, InputSource, ListConfig};
use crate::cli::{ApplyArgs, FormatArg, ListArgs};
use crate::error::{CliError, Result};
use crate::utils::parser;
use ifsqsar::core::io::source::{DirectoryModelSource, ModelSource};
use ifsqsar::engine::config::{ApplyConfigBuilder, InputTableConfig, OutputShape};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn build_apply_config(args: &ApplyArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = load_file_config(args.config.as_deref())?;
    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let models_file = file_config.models.take().unwrap_or_default();
    let output_file = file_config.output.take().unwrap_or_default();

    let models_dir = resolve_models_dir(args.models_dir.as_deref(), models_file.directory.as_deref())?;
    let match_table = args
        .match_table
        .clone()
        .or(models_file.match_table.clone())
        .unwrap_or_else(|| models_dir.join(MATCH_TABLE_FILE));

    let input = match (&args.input, args.smiles.is_empty()) {
        (Some(path), _) => InputSource::Table(path.clone()),
        (None, false) => InputSource::Notations(args.smiles.clone()),
        (None, true) => {
            return Err(CliError::Argument(
                "either --input or --smiles is required".to_string(),
            ));
        }
    };

    let models = select_models(&args.qsars, &models_file, &models_dir)?;

    let shape = match args.format {
        Some(FormatArg::Rows) => OutputShape::Rows,
        Some(FormatArg::Columns) => OutputShape::Columns,
        None => match output_file.format.as_deref() {
            Some(format) => format.parse::<OutputShape>().map_err(CliError::Config)?,
            None => defaults.format,
        },
    };
    let separator = args
        .separator
        .as_deref()
        .or(output_file.separator.as_deref())
        .map(parser::unescape_separator)
        .unwrap_or(defaults.separator);
    let header = if args.no_header {
        false
    } else {
        output_file.header.unwrap_or(defaults.header)
    };
    let include_input = args.include_input || output_file.include_input.unwrap_or(defaults.include_input);

    let apply = ApplyConfigBuilder::new()
        .models(models)
        .shape(shape)
        .header(header)
        .separator(separator.clone())
        .include_input(include_input)
        .input(InputTableConfig {
            separator,
            ..InputTableConfig::default()
        })
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(AppConfig {
        models_dir,
        match_table,
        input,
        output: args.output.clone(),
        apply,
    })
}

pub fn build_list_config(args: &ListArgs) -> Result<ListConfig> {
    let file_config = load_file_config(args.config.as_deref())?;
    let directory = file_config.models.and_then(|m| m.directory);
    let models_dir = resolve_models_dir(args.models_dir.as_deref(), directory.as_deref())?;
    Ok(ListConfig { models_dir })
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => FileConfig::from_file(path),
        None => Ok(FileConfig::default()),
    }
}

fn resolve_models_dir(cli_arg: Option<&Path>, file_arg: Option<&Path>) -> Result<PathBuf> {
    let dir = match cli_arg.or(file_arg) {
        Some(dir) => dir.to_path_buf(),
        None => default_models_dir().ok_or_else(|| {
            CliError::Config("Could not determine default model directory path.".to_string())
        })?,
    };
    debug!("Using model directory {:?}", &dir);
    Ok(dir)
}

/// Picks the requested models, falling back to every catalogued name.
fn select_models(
    cli_qsars: &[String],
    file: &FileModelsConfig,
    models_dir: &Path,
) -> Result<Vec<String>> {
    let versions = file.versions.clone().unwrap_or_default();
    let requested: Vec<String> = if !cli_qsars.is_empty() {
        cli_qsars.to_vec()
    } else if let Some(qsars) = file.qsars.as_ref().filter(|q| !q.is_empty()) {
        qsars.clone()
    } else {
        info!("No models selected, applying every catalogued model");
        let catalog = DirectoryModelSource::new(models_dir).catalog()?;
        let mut seen = HashSet::new();
        catalog
            .into_iter()
            .map(|entry| entry.name)
            .filter(|name| seen.insert(name.clone()))
            .collect()
    };
    parser::resolve_selections(&requested, &versions).map_err(|e| CliError::Argument(e.to_string()))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        let parse_bool = |v: &str| {
            v.parse::<bool>().map_err(|_| {
                CliError::Config(format!("Invalid boolean value for {}: {}", key, v))
            })
        };

        match key {
            "models.directory" => {
                config.models.get_or_insert_with(Default::default).directory =
                    Some(PathBuf::from(value_str));
            }
            "models.match-table" => {
                config.models.get_or_insert_with(Default::default).match_table =
                    Some(PathBuf::from(value_str));
            }
            "models.qsars" => {
                config.models.get_or_insert_with(Default::default).qsars =
                    Some(value_str.split(',').map(str::to_string).collect());
            }
            _ if key.starts_with("models.versions.") => {
                let name = &key["models.versions.".len()..];
                let version = value_str.parse::<u32>().map_err(|_| {
                    CliError::Config(format!("Invalid integer value for {}: {}", key, value_str))
                })?;
                config
                    .models
                    .get_or_insert_with(Default::default)
                    .versions
                    .get_or_insert_with(Default::default)
                    .insert(name.to_string(), version);
            }
            "output.format" => {
                config.output.get_or_insert_with(Default::default).format =
                    Some(value_str.to_string());
            }
            "output.separator" => {
                config.output.get_or_insert_with(Default::default).separator =
                    Some(value_str.to_string());
            }
            "output.header" => {
                config.output.get_or_insert_with(Default::default).header =
                    Some(parse_bool(value_str)?);
            }
            "output.include-input" => {
                config.output.get_or_insert_with(Default::default).include_input =
                    Some(parse_bool(value_str)?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn setup_models_dir() -> TempDir {
        let tmp = tempdir().expect("create temp dir");
        fs::write(
            tmp.path().join("catalog.toml"),
            r#"
            [[model]]
            name = "kowwin"
            version = 1
            file = "kowwin-1.toml"

            [[model]]
            name = "kowwin"
            version = 2
            file = "kowwin-2.toml"

            [[model]]
            name = "hhlb"
            version = 1
            file = "hhlb-1.toml"
            "#,
        )
        .unwrap();
        tmp
    }

    fn base_apply_args(models_dir: &Path) -> ApplyArgs {
        ApplyArgs {
            smiles: vec!["CCO".to_string()],
            models_dir: Some(models_dir.to_path_buf()),
            ..ApplyArgs::default()
        }
    }

    #[test]
    fn defaults_apply_every_catalogued_model() {
        let models = setup_models_dir();
        let app = build_apply_config(&base_apply_args(models.path())).expect("build ok");

        assert_eq!(app.apply.models, vec!["kowwin", "hhlb"]);
        assert_eq!(app.apply.output.shape, OutputShape::Rows);
        assert_eq!(app.apply.output.separator, "\t");
        assert!(app.apply.output.header);
        assert!(!app.apply.output.include_input);
        assert_eq!(app.match_table, models.path().join(MATCH_TABLE_FILE));
        assert_eq!(app.input, InputSource::Notations(vec!["CCO".to_string()]));
        assert!(app.output.is_none());
    }

    #[test]
    fn file_values_are_merged() {
        let models = setup_models_dir();
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("ifsqsar.toml");
        fs::write(
            &cfg_path,
            r#"
            [models]
            match-table = "/data/matches.csv"
            qsars = ["kowwin", "hhlb"]
            versions = { kowwin = 1 }

            [output]
            format = "columns"
            separator = ","
            header = false
            "#,
        )
        .unwrap();

        let mut args = base_apply_args(models.path());
        args.config = Some(cfg_path);
        let app = build_apply_config(&args).expect("build ok");

        assert_eq!(app.apply.models, vec!["kowwin@1", "hhlb"]);
        assert_eq!(app.apply.output.shape, OutputShape::Columns);
        assert_eq!(app.apply.output.separator, ",");
        assert_eq!(app.apply.input.separator, ",");
        assert!(!app.apply.output.header);
        assert_eq!(app.match_table, PathBuf::from("/data/matches.csv"));
    }

    #[test]
    fn cli_flags_override_set_values_and_file() {
        let models = setup_models_dir();
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("ifsqsar.toml");
        fs::write(&cfg_path, "[output]\nformat = \"rows\"\nseparator = \";\"\n").unwrap();

        let mut args = base_apply_args(models.path());
        args.config = Some(cfg_path);
        args.set_values = vec![
            "output.format=columns".to_string(),
            "output.separator=|".to_string(),
            "output.include-input=true".to_string(),
            "models.qsars=hhlb".to_string(),
        ];
        args.separator = Some("\\t".to_string());
        args.qsars = vec!["kowwin@2".to_string()];

        let app = build_apply_config(&args).expect("build ok");
        assert_eq!(app.apply.output.shape, OutputShape::Columns);
        assert_eq!(app.apply.output.separator, "\t");
        assert!(app.apply.output.include_input);
        assert_eq!(app.apply.models, vec!["kowwin@2"]);
    }

    #[test]
    fn set_values_pin_versions() {
        let models = setup_models_dir();
        let mut args = base_apply_args(models.path());
        args.qsars = vec!["kowwin".to_string()];
        args.set_values = vec!["models.versions.kowwin=1".to_string()];

        let app = build_apply_config(&args).expect("build ok");
        assert_eq!(app.apply.models, vec!["kowwin@1"]);
    }

    #[test]
    fn invalid_set_values_are_config_errors() {
        let models = setup_models_dir();
        for bad in ["output.header", "output.header=maybe", "optimization.steps=3"] {
            let mut args = base_apply_args(models.path());
            args.set_values = vec![bad.to_string()];
            let result = build_apply_config(&args);
            assert!(matches!(result, Err(CliError::Config(_))), "{}", bad);
        }
    }

    #[test]
    fn missing_input_is_an_argument_error() {
        let models = setup_models_dir();
        let mut args = base_apply_args(models.path());
        args.smiles.clear();
        let result = build_apply_config(&args);
        assert!(matches!(result, Err(CliError::Argument(_))));
    }

    #[test]
    fn input_table_takes_precedence_over_notations() {
        let models = setup_models_dir();
        let mut args = base_apply_args(models.path());
        args.input = Some(PathBuf::from("structures.tsv"));
        args.no_header = true;
        let app = build_apply_config(&args).expect("build ok");
        assert_eq!(app.input, InputSource::Table(PathBuf::from("structures.tsv")));
        assert!(!app.apply.output.header);
    }

    #[test]
    fn list_config_prefers_cli_directory() {
        let dir = tempdir().unwrap();
        let cfg_path = dir.path().join("ifsqsar.toml");
        fs::write(&cfg_path, "[models]\ndirectory = \"/from/file\"\n").unwrap();

        let args = ListArgs {
            models_dir: None,
            config: Some(cfg_path.clone()),
        };
        assert_eq!(build_list_config(&args).unwrap().models_dir, PathBuf::from("/from/file"));

        let args = ListArgs {
            models_dir: Some(PathBuf::from("/from/cli")),
            config: Some(cfg_path),
        };
        assert_eq!(build_list_config(&args).unwrap().models_dir, PathBuf::from("/from/cli"));
    }
}
