#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use servicemon::cli::app::{Cli, Command, RuntimeArgs};
use servicemon::cli::commands;
use servicemon::cli::commands::run::RunArgs;
use servicemon::config::RuntimeEnv;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 64;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(RunArgs::default()));
    let command_name = command_name(&command);
    // stdout carries reports, so progress goes to stderr.
    eprintln!("servicemon: starting `{command_name}`");

    match execute(&cli.runtime, &command) {
        Ok(()) => {
            eprintln!("servicemon: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            eprintln!("servicemon: failed `{command_name}` (exit_code={EXIT_RUNTIME_FAILURE})");
            eprintln!("{error:#}");
            EXIT_RUNTIME_FAILURE
        }
    }
}

fn execute(runtime: &RuntimeArgs, command: &Command) -> Result<()> {
    match command {
        Command::Run(args) => {
            let env = runtime_env(runtime)?;
            commands::run::run(args, &env)
        }
        Command::Cones(args) => commands::cones::run(args),
        Command::Inspect(args) => commands::inspect::run(args),
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Run(_) => "run",
        Command::Cones(_) => "cones",
        Command::Inspect(_) => "inspect",
    }
}

fn runtime_env(args: &RuntimeArgs) -> Result<RuntimeEnv> {
    let home_dir = args
        .home_dir
        .clone()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from));
    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    Ok(RuntimeEnv {
        home_dir,
        cwd,
        out_dir: args.out_dir.clone(),
    })
}
