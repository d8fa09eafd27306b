use crate::cli::ApplyArgs;
use crate::config::{self, AppConfig, InputSource};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use ifsqsar::{
    core::{io::source::DirectoryModelSource, structure::tabulated::TabulatedMatcher},
    engine::{progress::ProgressReporter, registry::ModelRegistry},
    workflows::apply,
};
use tracing::info;

pub fn run(args: ApplyArgs) -> Result<()> {
    let app = config::build_apply_config(&args)?;

    let progress_handler = CliProgressHandler::new();
    let text = execute(&app, &progress_handler)?;

    match &app.output {
        Some(path) => {
            std::fs::write(path, &text)?;
            println!("✓ Results written to: {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Loads the catalog and match table, applies the selected models and returns the
/// rendered table.
pub fn execute(app: &AppConfig, progress_handler: &CliProgressHandler) -> Result<String> {
    info!("Reading model catalog from {:?}", &app.models_dir);
    let mut registry = ModelRegistry::new(DirectoryModelSource::new(&app.models_dir))?;

    info!("Loading structure match table from {:?}", &app.match_table);
    let matcher = TabulatedMatcher::load(&app.match_table)?;

    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let text = match &app.input {
        InputSource::Table(path) => {
            let content = std::fs::read_to_string(path)?;
            info!("Applying models to table {:?}", path);
            apply::apply_models_to_table(&mut registry, &matcher, &app.apply, &content, &reporter)?
        }
        InputSource::Notations(notations) => {
            if app.apply.output.include_input {
                return Err(CliError::Argument(
                    "--include-input requires an input table".to_string(),
                ));
            }
            let lines = apply::apply_models_to_structure_list(
                &mut registry,
                &matcher,
                &app.apply,
                notations,
                &reporter,
            )?;
            apply::render(&lines, &app.apply.output.end_of_line)
        }
    };
    Ok(text)
}
