use ifsqsar::engine::config::ApplyConfig;
use std::path::PathBuf;

/// Where the structures to evaluate come from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Table(PathBuf),
    Notations(Vec<String>),
}

pub struct AppConfig {
    pub models_dir: PathBuf,
    pub match_table: PathBuf,
    pub input: InputSource,
    pub output: Option<PathBuf>,
    pub apply: ApplyConfig,
}

pub struct ListConfig {
    pub models_dir: PathBuf,
}
