//! skim - micro-Scheme interpreter CLI
//!
//! Reads and evaluates each file argument to completion, then switches to
//! stdin. Results print to stdout; diagnostics are `;;` comment lines so
//! the output stream stays re-readable.
//!
//! Usage:
//!   skim                     # read from stdin
//!   skim prelude.scm main.scm
//!   skim --write-quota 50 --no-syntax-check program.scm

use clap::Parser;
use skim::{Config, Interp, SchemeError};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Skim micro-Scheme interpreter", long_about = None)]
struct Args {
    /// Source files to evaluate before reading stdin
    files: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pair-cell region capacity
    #[arg(long)]
    pairs: Option<usize>,

    /// Block region capacity in bytes
    #[arg(long)]
    block_bytes: Option<usize>,

    /// Writer node quota
    #[arg(long)]
    write_quota: Option<usize>,

    /// Skip validation of special forms before evaluation
    #[arg(long)]
    no_syntax_check: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("skim: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(n) = args.pairs {
        config.pair_cells = n;
    }
    if let Some(n) = args.block_bytes {
        config.block_bytes = n;
    }
    if let Some(n) = args.write_quota {
        config.write_quota = n;
    }
    if args.no_syntax_check {
        config.syntax_check = false;
    }

    let mut interp = Interp::new(config).map_err(|e| format!("initialization failed: {e}"))?;
    let mut out = io::stdout().lock();

    for path in &args.files {
        info!(file = %path.display(), "evaluating");
        let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let mut src = BufReader::new(file);
        interp
            .run(&mut src, &mut out)
            .map_err(|e| fatal_message(&e, Some(path)))?;
    }

    let stdin = io::stdin();
    let mut src = stdin.lock();
    interp.run(&mut src, &mut out).map_err(|e| fatal_message(&e, None))
}

fn fatal_message(e: &SchemeError, path: Option<&PathBuf>) -> String {
    match path {
        Some(p) => format!("{}: unrecoverable {} error: {e}", p.display(), e.kind()),
        None => format!("unrecoverable {} error: {e}", e.kind()),
    }
}
