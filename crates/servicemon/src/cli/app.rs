use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{cones::ConesArgs, inspect::InspectArgs, run::RunArgs};

#[derive(Debug, Parser)]
#[command(
    name = "servicemon",
    version,
    about = "Times queries against astronomical data services"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Defaults to `run` with the built-in batch.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunArgs),
    Cones(ConesArgs),
    Inspect(InspectArgs),
}
