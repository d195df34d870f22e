//! Command-line surface (§6), following the sibling `otlp2pipeline`
//! binary's `clap::Parser` derive style.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "target-stitch", about = "Streaming Singer target for the Stitch import Gate")]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Validate records against the stream schema instead of sending them.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Write serialized batch bodies to this file instead of (or alongside) the Gate.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet (warn-level-only) logging.
    #[arg(short, long)]
    pub quiet: bool,

    #[arg(long, default_value_t = 20_000)]
    pub max_batch_records: usize,

    #[arg(long, default_value_t = 4_000_000)]
    pub max_batch_bytes: usize,

    #[arg(long, default_value_t = 300.0)]
    pub batch_delay_seconds: f64,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}
