//! difftest CLI
//!
//! The host test runner embeds `difftest-orchestrator`'s plugin facade
//! directly and owns its own flag surface (`--diff`, `--diff-baseline`,
//! etc. — `spec.md` §6.3). This binary exposes only the one subcommand that
//! is normative outside the host: merging store shards.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(name = "difftest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Block-level test-impact-analysis store utilities", long_about = None)]
struct Cli {
    /// Emit JSON-formatted log lines.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deterministically merge one or more store shards into OUT.
    Merge {
        /// Path to the output store file.
        out: PathBuf,
        /// Input store files, merged in the given order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    difftest_orchestrator::init_tracing(cli.json, level);

    match cli.command {
        Commands::Merge { out, inputs } => run_merge(&out, &inputs),
    }
}

fn run_merge(out: &std::path::Path, inputs: &[PathBuf]) -> Result<()> {
    let input_refs: Vec<&std::path::Path> = inputs.iter().map(PathBuf::as_path).collect();
    difftest_store::merge(out, &input_refs)
        .with_context(|| format!("merging {} store(s) into {}", inputs.len(), out.display()))?;
    tracing::info!(output = %out.display(), inputs = inputs.len(), "merge complete");
    Ok(())
}
