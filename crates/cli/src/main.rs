//! `dcr-sim` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a graph JSON file and show what is enabled.
//! - `simulate` — replay a sequence of events and time steps.
//! - `flatten`  — remove nestings and print the resulting graph.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dcr_engine::{replay_on, DcrGraph, DcrSemantics, Input, SemanticsConfig};

#[derive(Parser)]
#[command(
    name = "dcr-sim",
    about = "Simulate Dynamic Condition Response graphs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a graph file and list the initially enabled events.
    Validate {
        /// Path to the graph JSON file.
        path: PathBuf,
    },
    /// Fire events and advance time, then report acceptance.
    Simulate {
        /// Path to the graph JSON file.
        path: PathBuf,
        /// Flatten nestings before simulating.
        #[arg(long)]
        flatten: bool,
        /// Log a warning for every rejected step.
        #[arg(short, long)]
        verbose: bool,
        /// Event names, or `+SECS` to advance time.
        steps: Vec<String>,
    },
    /// Flatten nestings and print the atomic graph as JSON.
    Flatten {
        /// Path to the graph JSON file.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("❌ {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Dev diagnostics via `RUST_LOG`, on stderr.  Defaults to `warn`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Validate { path } => cmd_validate(&path),
        Command::Simulate {
            path,
            flatten,
            verbose,
            steps,
        } => cmd_simulate(&path, flatten, verbose, &steps),
        Command::Flatten { path } => cmd_flatten(&path),
    }
}

fn load_graph(path: &Path) -> Result<DcrGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let graph = serde_json::from_str(&content)
        .with_context(|| format!("invalid graph JSON in {}", path.display()))?;
    info!("loaded graph from {}", path.display());
    Ok(graph)
}

fn cmd_validate(path: &Path) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    let engine = DcrSemantics::new(&graph).context("validation failed")?;

    println!(
        "✅ Graph is valid: {} events, {} nestings.",
        engine.graph().events.len(),
        engine.nesting_events().len()
    );
    println!("Enabled: {:?}", engine.enabled());
    Ok(ExitCode::SUCCESS)
}

fn cmd_simulate(path: &Path, flatten: bool, verbose: bool, steps: &[String]) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    let inputs = steps
        .iter()
        .map(String::as_str)
        .map(parse_step)
        .collect::<Result<Vec<_>>>()?;

    let mut engine =
        DcrSemantics::with_config(&graph, SemanticsConfig { verbose }).context("validation failed")?;
    if flatten {
        engine.flatten_nestings();
    }

    let report = replay_on(&mut engine, inputs);
    for step in &report.rejected {
        println!("step {} ({:?}) rejected: {}", step.index, step.input, step.error);
    }
    println!("Applied {} of {} steps.", report.applied, steps.len());
    println!("Enabled: {:?}", engine.enabled());

    if report.accepting {
        println!("✅ Accepting.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ Not accepting, pending: {:?}", engine.pending_included());
        Ok(ExitCode::from(2))
    }
}

fn cmd_flatten(path: &Path) -> Result<ExitCode> {
    let graph = load_graph(path)?;
    let mut engine = DcrSemantics::new(&graph).context("validation failed")?;
    let flat = engine.flatten_nestings();
    println!("{}", serde_json::to_string_pretty(flat)?);
    Ok(ExitCode::SUCCESS)
}

/// `+SECS` advances time; anything else names an event.
fn parse_step(raw: &str) -> Result<Input> {
    let Some(secs) = raw.strip_prefix('+') else {
        return Ok(Input::from(raw));
    };
    let secs: f64 = secs
        .parse()
        .with_context(|| format!("invalid time step '{raw}'"))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => Ok(Input::Elapse(duration)),
        Err(err) => bail!("invalid time step '{raw}': {err}"),
    }
}
