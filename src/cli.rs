//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::Provider;
use crate::models::Dimension;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use std::path::PathBuf;

/// WorkRecap - weekly work recaps from commits, tickets and timesheets
///
/// Collects your GitHub commits, ClickUp tickets and Harvest time entries
/// for a time window, groups them per repository, client or ticket, and
/// writes LLM-generated summaries into your standup documents.
///
/// Examples:
///   workrecap
///   workrecap --days 14 --group-by repository,client
///   workrecap --provider ollama --model llama3.2:latest --no-publish
///   workrecap --dry-run --sources github,local
///   workrecap --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Length of the time window in days
    #[arg(short, long, value_name = "DAYS")]
    pub days: Option<u32>,

    /// End of the time window (YYYY-MM-DD or RFC 3339). Default: now
    #[arg(long, value_name = "DATE")]
    pub until: Option<String>,

    /// Standup date used in section headings (YYYY-MM-DD). Default: today
    #[arg(long, value_name = "DATE")]
    pub date: Option<String>,

    /// Grouping dimensions (comma-separated)
    ///
    /// Example: --group-by repository,client,ticket
    #[arg(short, long, value_name = "DIMS", value_delimiter = ',')]
    pub group_by: Option<Vec<Dimension>>,

    /// Sources to fetch from (comma-separated). Default: all configured
    ///
    /// Example: --sources github,local,clickup,harvest
    #[arg(long, value_name = "SOURCES", value_delimiter = ',')]
    pub sources: Option<Vec<SourceName>>,

    /// Language model provider
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<Provider>,

    /// Model name
    #[arg(short, long, env = "WORKRECAP_MODEL")]
    pub model: Option<String>,

    /// Language model API base URL
    #[arg(long, value_name = "URL", env = "WORKRECAP_LLM_URL")]
    pub llm_url: Option<String>,

    /// Timeout for every external call, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum concurrent narrative generations
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .workrecap.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the run report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Run report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Fetch and group activity without calling the LLM or publishing
    #[arg(long)]
    pub dry_run: bool,

    /// Generate narratives but do not write any document
    #[arg(long)]
    pub no_publish: bool,

    /// Exit with code 2 when any source or group failed
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .workrecap.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Selectable activity sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SourceName {
    /// GitHub commit search
    Github,
    /// Local git repositories
    Local,
    /// ClickUp tickets
    Clickup,
    /// Harvest time entries
    Harvest,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.days == Some(0) {
            return Err("Days must be at least 1".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref url) = self.llm_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("LLM URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.dry_run && self.no_publish {
            return Err("--dry-run already skips publishing; drop --no-publish".to_string());
        }

        if let Some(ref dims) = self.group_by {
            if dims.is_empty() {
                return Err("--group-by needs at least one dimension".to_string());
            }
        }

        self.until_time()?;
        self.standup_date()?;

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// End of the time window. A bare date means the end of that day.
    pub fn until_time(&self) -> Result<Option<DateTime<Utc>>, String> {
        let Some(ref raw) = self.until else {
            return Ok(None);
        };

        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }

        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| format!("Invalid --until value: {}", raw))?;
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Ok(Some(date.and_time(end_of_day).and_utc()))
    }

    /// Standup date override.
    pub fn standup_date(&self) -> Result<Option<NaiveDate>, String> {
        match self.date {
            Some(ref raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| format!("Invalid --date value: {}", raw)),
            None => Ok(None),
        }
    }
}
