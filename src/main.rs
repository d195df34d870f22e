use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use target_stitch::batcher::{Batcher, BatcherConfig};
use target_stitch::cli::Cli;
use target_stitch::config::Config;
use target_stitch::message::parse_line;
use target_stitch::runtime::Runtime;
use target_stitch::sink::{FileSink, HttpSink, Sink, ValidatingSink};
use tracing::error;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = tokio::runtime::Runtime::new().context("failed starting the Tokio runtime")?;
    runtime.block_on(run(cli))
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path).context("failed loading config file")?,
        None => Config {
            token: None,
            stitch_url: None,
            disable_collection: None,
        },
    };

    if !cli.dry_run {
        config.require_token().context("config must provide a token unless --dry-run is set")?;
    }

    let stdout: Arc<Mutex<Box<dyn Write + Send>>> =
        Arc::new(Mutex::new(Box::new(io::stdout()) as Box<dyn Write + Send>));

    let runtime = if cli.dry_run {
        None
    } else {
        let insecure = std::env::var("TARGET_STITCH_SSL_VERIFY")
            .map(|v| v == "false")
            .unwrap_or(false);
        let token = config.require_token()?;
        Some(Arc::new(
            Runtime::new(config.stitch_url(), token, insecure).context("failed constructing the HTTP runtime")?,
        ))
    };

    if !cli.dry_run && !config.disable_collection.unwrap_or(false) {
        tokio::spawn(target_stitch::collector::send_usage_ping(VERSION));
    }
    tokio::spawn(target_stitch::memory::report_memory_periodically());

    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if cli.dry_run {
        sinks.push(Box::new(ValidatingSink::new()));
    }
    if let Some(path) = &cli.output_file {
        let file = std::fs::File::create(path).with_context(|| format!("failed creating output file {}", path.display()))?;
        sinks.push(Box::new(FileSink::new(
            Box::new(file),
            cli.max_batch_bytes,
            cli.max_batch_records,
        )));
    }
    if let Some(runtime) = &runtime {
        sinks.push(Box::new(HttpSink::new(
            runtime.dispatcher.clone(),
            runtime.pending.clone(),
            stdout.clone(),
            cli.max_batch_bytes,
            cli.max_batch_records,
        )));
    }

    let batcher_config = BatcherConfig {
        max_batch_bytes: cli.max_batch_bytes,
        max_batch_records: cli.max_batch_records,
        batch_delay: Duration::from_secs_f64(cli.batch_delay_seconds),
    };
    let mut batcher = Batcher::new(batcher_config, sinks);

    let stdin = io::stdin();
    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed reading from standard input")?;
        let parsed = parse_line(&line, line_no + 1)?;
        batcher.handle(parsed.message, parsed.raw_len)?;
    }
    batcher.finish()?;

    if let Some(runtime) = runtime {
        if let Err(err) = runtime.drain().await {
            error!(error = %err, "target-stitch exiting with a fatal error");
            std::process::exit(1);
        }
    }

    Ok(())
}
