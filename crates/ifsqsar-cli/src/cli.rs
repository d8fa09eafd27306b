use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "IFSQSAR CLI - Apply group-contribution QSARs with applicability-domain assessment to chemical structures.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply QSAR models to structures from a table file or the command line.
    Apply(ApplyArgs),
    /// List the models available in the model directory.
    List(ListArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Rows,
    Columns,
}

/// Arguments for the `apply` subcommand.
#[derive(Args, Debug, Default)]
pub struct ApplyArgs {
    // --- Input ---
    /// Path to a delimited table whose notation column holds the structures.
    #[arg(short, long, value_name = "PATH", conflicts_with = "smiles")]
    pub input: Option<PathBuf>,

    /// Comma-separated structures given directly (e.g., 'CCO,c1ccccc1').
    #[arg(short, long, value_name = "LIST", value_delimiter = ',')]
    pub smiles: Vec<String>,

    /// Path for the output table. Written to stdout when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    // --- Model selection ---
    /// Comma-separated models to apply, each a name or 'name@version'.
    #[arg(short = 'q', long, value_name = "LIST", value_delimiter = ',')]
    pub qsars: Vec<String>,

    /// Directory holding `catalog.toml` and the model definition files.
    #[arg(long, value_name = "PATH")]
    pub models_dir: Option<PathBuf>,

    /// Precomputed structure match table (CSV).
    #[arg(long, value_name = "PATH")]
    pub match_table: Option<PathBuf>,

    // --- Output overrides ---
    /// Write one row or one column per structure.
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub format: Option<FormatArg>,

    /// Field separator for input and output tables. Accepts '\t' for a tab.
    #[arg(long, value_name = "SEP")]
    pub separator: Option<String>,

    /// Omit the header row.
    #[arg(long)]
    pub no_header: bool,

    /// Echo the input table columns before the results.
    #[arg(long)]
    pub include_input: bool,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S output.format=columns
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `list` subcommand.
#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Directory holding `catalog.toml` and the model definition files.
    #[arg(long, value_name = "PATH")]
    pub models_dir: Option<PathBuf>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
