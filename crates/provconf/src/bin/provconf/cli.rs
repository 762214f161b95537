//! provconf cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; provconf ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the configuration of the module in the work directory
    Show(ShowCommand),

    /// Check the provider bindings of the module in the work directory
    Validate(ValidateCommand),
}

#[derive(Parser, Debug)]
pub struct ShowCommand {
    /// Only show the root module
    ///
    /// Child modules are not loaded and no schemas are needed. Expressions
    /// are left out.
    #[clap(long = "single-module")]
    pub single_module: bool,

    #[clap(flatten)]
    pub schemas: SchemaArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct ValidateCommand {
    #[clap(flatten)]
    pub schemas: SchemaArgs,

    /// Resource instances of prior state to check against the current provider instances
    ///
    /// A JSON array of { "address": ..., "provider": { "config_key": ..., "key": ... } }
    #[clap(long = "state")]
    pub state: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct SchemaArgs {
    /// Provider schemas, as printed by `providers schema -json`
    #[clap(long = "schemas")]
    pub schemas: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
