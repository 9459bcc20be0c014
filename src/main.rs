//! CLI entry point for the harvester tool.

use anyhow::Result;
use clap::Parser;
use harvester::pipeline;
use harvester::shutdown;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = args.pipeline_config();

    // Ctrl-C requests a graceful stop: in-flight items are abandoned as
    // retryable and artifacts written so far are kept.
    let (handle, stop) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current items");
            handle.trigger();
        }
    });

    match args.command {
        Command::Discover => {
            let summary = pipeline::run_discovery(&config).await?;
            info!(
                links = summary.total,
                new = summary.added,
                failed_datasets = summary.failed_datasets,
                "discovery finished"
            );
        }
        Command::Download { .. } => {
            let summary = pipeline::run_download(&config, &stop).await?;
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                retried = summary.retried,
                pending = summary.pending,
                "download finished"
            );
            if summary.succeeded == 0 && summary.skipped == 0 && summary.failed > 0 {
                anyhow::bail!("every download in the batch failed");
            }
        }
        Command::Extract { .. } => {
            let summary = pipeline::run_extraction(&config, &stop).await?;
            info!(
                extracted = summary.extracted,
                failed = summary.failed,
                added = summary.merge.added,
                updated = summary.merge.updated,
                unchanged = summary.merge.unchanged,
                corpus_size = summary.corpus_size,
                "extraction finished"
            );
        }
        Command::Run { .. } => {
            let summary = pipeline::run_all(&config, &stop).await?;
            info!(
                links = summary.discovery.total,
                downloaded = summary.download.succeeded,
                download_failures = summary.download.failed,
                extracted = summary.extraction.extracted,
                corpus_size = summary.extraction.corpus_size,
                "pipeline finished"
            );
            let download = &summary.download;
            if download.succeeded == 0 && download.skipped == 0 && download.failed > 0 {
                anyhow::bail!("every download in the batch failed");
            }
        }
    }

    Ok(())
}
