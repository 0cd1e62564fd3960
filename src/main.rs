//! quadtune - tuning recommendations from a blackbox log
//!
//! Reads a parsed flight log as JSON and prints the recommendation as JSON,
//! or as firmware CLI commands with `--cli`.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use quadtune::cli::to_cli_commands;
use quadtune::config::AnalysisConfig;
use quadtune::generate_recommendation;
use quadtune::log::FlightLog;

const USAGE: &str = "usage: quadtune <log.json> [--config <config.json>] [--cli]";

struct Args {
    log_path: PathBuf,
    config_path: Option<PathBuf>,
    cli: bool,
}

fn parse_args() -> Result<Args> {
    let mut log_path = None;
    let mut config_path = None;
    let mut cli = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cli" => cli = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {}\n{}", other, USAGE),
            other => {
                if log_path.is_some() {
                    bail!("more than one log file given\n{}", USAGE);
                }
                log_path = Some(PathBuf::from(other));
            }
        }
    }

    Ok(Args {
        log_path: log_path.context(USAGE)?,
        config_path,
        cli,
    })
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    let config = match &args.config_path {
        Some(path) => AnalysisConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let content = std::fs::read_to_string(&args.log_path)
        .with_context(|| format!("reading {}", args.log_path.display()))?;
    let log: FlightLog = serde_json::from_str(&content)
        .with_context(|| format!("parsing flight log {}", args.log_path.display()))?;
    tracing::info!("Loaded {} rows from {:?}", log.len(), args.log_path);

    let recommendation = generate_recommendation(&log, &config);

    if args.cli {
        for line in to_cli_commands(&recommendation) {
            println!("{}", line);
        }
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&recommendation).context("serializing recommendation")?
        );
    }
    Ok(())
}
