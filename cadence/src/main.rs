/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};

use cadence::config::RuntimeConfig;
use cadence::runtime::{self, RunOptions};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Cadence timed device choreography runtime.
///
/// Example:
///   cadence --config cadence.yaml show.cue
#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence – loads, compiles and plays timed device programs",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML runtime configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Load, compile and test every command without opening any device.
    #[arg(short = 'n', long = "dry-run", default_value_t = false)]
    dry_run: bool,

    /// Root program file (exactly one).
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialise structured logging on stderr so Print output owns stdout.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Wrong arity is informational, not a failure.
    let [root] = cli.files.as_slice() else {
        println!("{}", Cli::command().render_usage());
        println!("No file specified for the input.");
        return;
    };

    info!(
        root    = %root.display(),
        config  = ?cli.config,
        dry_run = cli.dry_run,
        "Cadence starting up"
    );

    // ── Load runtime configuration ────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match RuntimeConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load runtime configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    // ── Run ───────────────────────────────────────────────────────────────────
    let options = RunOptions {
        dry_run: cli.dry_run,
    };
    match runtime::run(root, &config, options) {
        Ok(Some(report)) => {
            if report.suppressed_failures > 0 {
                warn!(
                    suppressed = report.suppressed_failures,
                    "some device commands failed during the run"
                );
            }
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("{}", failure_line(&e));
            process::exit(1);
        }
    }
}

/// Single stderr line for a failed run: `Error: <context chain>`.
fn failure_line(e: &anyhow::Error) -> String {
    format!("Error: {e:#}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn failure_line_prints_the_whole_chain_once() {
        let err = anyhow!("load cycle: a.cue -> a.cue").context("Failed to load program: a.cue");
        let line = failure_line(&err);
        assert_eq!(line, "Error: Failed to load program: a.cue: load cycle: a.cue -> a.cue");
        assert_eq!(line.matches("Error:").count(), 1);
    }
}
