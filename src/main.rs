mod cli;
mod config;
mod metrics;
mod openreports;
mod processor;
mod types;
mod utils;

use clap::Parser;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, error, info, warn};

use cli::Cli;
use config::{Config, TYPE_STR};
use metrics::ProcessorMetrics;
use processor::SecurityEventProcessor;
use types::LogBatch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only batches.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.print_default_config {
        print!("{}", Config::default().to_yaml()?);
        return Ok(());
    }

    let config = load_config(&cli)?;
    if cli.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    info!(
        "Starting {} processor (openreports enabled: {}, status filter: {:?})",
        TYPE_STR,
        config.processors.openreports.enabled,
        config.processors.openreports.status_filter
    );

    let processor = Arc::new(SecurityEventProcessor::new(
        &config,
        Arc::new(ProcessorMetrics::new()?),
    ));
    if !processor.open_reports_enabled() {
        warn!("No processors enabled; batches pass through unchanged");
    }

    let result = if cli.inputs.is_empty() {
        run_stdin_mode(processor.clone(), cli.pretty).await
    } else {
        run_file_mode(processor.clone(), cli.inputs.clone(), cli.pretty).await
    };

    for line in processor
        .metrics()
        .encode_text()?
        .lines()
        .filter(|line| !line.starts_with('#'))
    {
        info!("{}", line);
    }
    result
}

/// Load the config file (or defaults), apply command line overrides and
/// validate the result.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    let openreports = &mut config.processors.openreports;
    if cli.openreports {
        openreports.enabled = true;
    }
    if let Some(filter) = &cli.status_filter {
        openreports.enabled = true;
        openreports.status_filter = filter
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

fn encode_batch(batch: &LogBatch, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(batch)
    } else {
        serde_json::to_string(batch)
    }
}

fn process_file(processor: &SecurityEventProcessor, path: &Path, pretty: bool) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let mut batch: LogBatch = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse batch {}: {}", path.display(), e))?;

    let stats = processor.process_logs(&mut batch);
    info!(
        "{}: {} in, {} out, {} dropped, {} reports expanded",
        path.display(),
        stats.incoming,
        stats.outgoing,
        stats.dropped,
        stats.expanded_reports
    );
    Ok(encode_batch(&batch, pretty)?)
}

/// Each file is an independent batch; files are processed concurrently and
/// written out in argument order.
async fn run_file_mode(
    processor: Arc<SecurityEventProcessor>,
    inputs: Vec<PathBuf>,
    pretty: bool,
) -> anyhow::Result<()> {
    let tasks = inputs.into_iter().map(|path| {
        let processor = processor.clone();
        tokio::task::spawn_blocking(move || {
            let output = process_file(&processor, &path, pretty);
            (path, output)
        })
    });

    let mut stdout = tokio::io::stdout();
    let mut failures = 0usize;
    for joined in futures::future::join_all(tasks).await {
        let (path, output) = joined?;
        match output {
            Ok(encoded) => {
                stdout.write_all(encoded.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            Err(e) => {
                error!("Skipping {}: {}", path.display(), e);
                failures += 1;
            }
        }
    }
    stdout.flush().await?;

    if failures > 0 {
        anyhow::bail!("{} input batch(es) could not be processed", failures);
    }
    Ok(())
}

/// Newline-delimited batches on stdin, one processed batch per output line.
async fn run_stdin_mode(processor: Arc<SecurityEventProcessor>, pretty: bool) -> anyhow::Result<()> {
    process_stream(
        &processor,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        pretty,
    )
    .await
}

/// A line that is not a batch is skipped; only read and write failures end
/// the stream.
async fn process_stream<R, W>(
    processor: &SecurityEventProcessor,
    reader: R,
    mut writer: W,
    pretty: bool,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = SplitStream::new(reader.split(b'\n'));
    let mut line_number = 0usize;

    while let Some(raw) = lines.try_next().await? {
        line_number += 1;
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping line {}: not valid UTF-8: {}", line_number, e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let mut batch: LogBatch = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Skipping line {}: not a log batch: {}", line_number, e);
                continue;
            }
        };

        let stats = processor.process_logs(&mut batch);
        debug!(
            "Line {}: {} in, {} out, {} dropped",
            line_number, stats.incoming, stats.outgoing, stats.dropped
        );
        writer.write_all(encode_batch(&batch, pretty)?.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
