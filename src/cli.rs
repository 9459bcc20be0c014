//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use harvester::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use harvester::pipeline::{DEFAULT_BASE_URL, DEFAULT_RATE_LIMIT_MS, PipelineConfig};

/// Build a searchable text corpus from published document datasets.
///
/// Harvester walks dataset listing pages for document links, downloads the
/// files with rate limiting and retries, extracts their text page by page,
/// and assembles everything into a single corpus file. Every stage is
/// resumable: rerunning picks up exactly where the last run stopped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory for artifacts and downloaded files
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Listing origin the dataset pages live under
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Dataset range to process, e.g. "3" or "1-12"
    #[arg(short, long, global = true, default_value = "1-12", value_parser = parse_dataset_range)]
    pub datasets: (u32, u32),

    #[command(subcommand)]
    pub command: Command,
}

/// Pipeline stage to run.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl dataset listings and record document links
    Discover,

    /// Download linked documents that are not yet on disk
    Download {
        /// Maximum concurrent downloads (1-100)
        #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
        concurrency: u8,

        /// Maximum retry attempts for transient failures (0-10)
        #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
        max_retries: u8,

        /// Minimum delay between requests to the same host in milliseconds (0 to disable, max 60000)
        #[arg(short = 'l', long, default_value_t = DEFAULT_RATE_LIMIT_MS, value_parser = clap::value_parser!(u64).range(0..=60000))]
        rate_limit: u64,

        /// Stop after attempting this many pending links
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Extract text from downloaded documents and rebuild the corpus
    Extract {
        /// Maximum concurrent extractions (1-100)
        #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
        concurrency: u8,
    },

    /// Run discover, download, and extract in sequence
    Run {
        /// Maximum concurrent downloads and extractions (1-100)
        #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
        concurrency: u8,

        /// Maximum retry attempts for transient failures (0-10)
        #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
        max_retries: u8,

        /// Minimum delay between requests to the same host in milliseconds (0 to disable, max 60000)
        #[arg(short = 'l', long, default_value_t = DEFAULT_RATE_LIMIT_MS, value_parser = clap::value_parser!(u64).range(0..=60000))]
        rate_limit: u64,

        /// Stop after attempting this many pending downloads
        #[arg(long)]
        limit: Option<usize>,
    },
}

impl Args {
    /// Builds the pipeline configuration from parsed arguments.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            base_url: self.base_url.clone(),
            datasets: self.datasets,
            data_dir: self.data_dir.clone(),
            show_progress: !self.quiet,
            ..PipelineConfig::default()
        };

        match &self.command {
            Command::Discover => {}
            Command::Extract { concurrency } => {
                config.concurrency = usize::from(*concurrency);
            }
            Command::Download {
                concurrency,
                max_retries,
                rate_limit,
                limit,
            }
            | Command::Run {
                concurrency,
                max_retries,
                rate_limit,
                limit,
            } => {
                config.concurrency = usize::from(*concurrency);
                config.max_retries = u32::from(*max_retries);
                config.rate_limit_ms = *rate_limit;
                config.download_limit = *limit;
            }
        }

        config
    }
}

/// Parses "N" or "N-M" into an inclusive dataset range.
fn parse_dataset_range(value: &str) -> Result<(u32, u32), String> {
    let parse_one = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("'{s}' is not a dataset number"))
    };

    let (first, last) = match value.split_once('-') {
        Some((first, last)) => (parse_one(first)?, parse_one(last)?),
        None => {
            let n = parse_one(value)?;
            (n, n)
        }
    };

    if first == 0 {
        return Err("dataset numbers start at 1".to_string());
    }
    if first > last {
        return Err(format!("range {first}-{last} is reversed"));
    }
    Ok((first, last))
}
