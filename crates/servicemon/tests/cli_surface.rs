use std::path::Path;

use clap::Parser;
use servicemon::cli::app::{Cli, Command};

#[test]
fn no_subcommand_parses_to_none() {
    let cli = Cli::parse_from(["servicemon"]);
    assert!(cli.command.is_none());
    assert!(cli.runtime.out_dir.is_none());
}

#[test]
fn parses_global_runtime_flags_for_run() {
    let cli = Cli::parse_from([
        "servicemon",
        "--cwd",
        "/work/repo",
        "--out-dir",
        "/tmp/servicemon-out",
        "run",
        "--config",
        "batch.json",
        "--concurrency",
        "4",
    ]);

    assert_eq!(cli.runtime.cwd.as_deref(), Some(Path::new("/work/repo")));
    assert_eq!(
        cli.runtime.out_dir.as_deref(),
        Some(Path::new("/tmp/servicemon-out"))
    );
    match cli.command {
        Some(Command::Run(args)) => {
            assert_eq!(args.config.as_deref(), Some(Path::new("batch.json")));
            assert_eq!(args.concurrency, Some(4));
            assert!(args.stats_out.is_none());
        }
        other => panic!("expected run command, got {other:?}"),
    }
}

#[test]
fn run_flags_repeat() {
    let cli = Cli::parse_from([
        "servicemon",
        "run",
        "--service",
        "CSC=http://cda.harvard.edu/cscvo/coneSearch?",
        "--service",
        "Other=http://example.org/cone?",
        "--position",
        "125.886 21.3377",
        "--radius",
        "0.1",
        "--radius",
        "0.5",
        "--sqlite",
        "stats.sqlite",
    ]);

    match cli.command {
        Some(Command::Run(args)) => {
            assert_eq!(args.services.len(), 2);
            assert_eq!(args.positions, ["125.886 21.3377"]);
            assert_eq!(args.radii, [0.1, 0.5]);
            assert_eq!(args.sqlite.as_deref(), Some(Path::new("stats.sqlite")));
        }
        other => panic!("expected run command, got {other:?}"),
    }
}

#[test]
fn global_flags_are_accepted_after_subcommand() {
    let cli = Cli::parse_from(["servicemon", "run", "--out-dir", "results-b"]);
    assert_eq!(cli.runtime.out_dir.as_deref(), Some(Path::new("results-b")));
}

#[test]
fn cones_defaults() {
    let cli = Cli::parse_from(["servicemon", "cones"]);
    match cli.command {
        Some(Command::Cones(args)) => {
            assert_eq!(args.count, 5);
            assert_eq!(args.min_radius, 0.1);
            assert_eq!(args.max_radius, 1.2);
            assert!(args.seed.is_none());
        }
        other => panic!("expected cones command, got {other:?}"),
    }
}

#[test]
fn parses_inspect_json_flag() {
    let cli = Cli::parse_from(["servicemon", "inspect", "payload.xml", "--json"]);
    match cli.command {
        Some(Command::Inspect(args)) => {
            assert!(args.json);
            assert_eq!(args.target, Path::new("payload.xml"));
        }
        other => panic!("expected inspect command, got {other:?}"),
    }
}
