mod builder;
mod defaults;
mod file;
mod models;

pub use builder::{build_apply_config, build_list_config};
pub use models::{AppConfig, InputSource, ListConfig};
