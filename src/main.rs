//! WorkRecap - weekly work recaps from commits, tickets and timesheets
//!
//! A CLI tool that collects a developer's activity from GitHub, local git
//! repositories, ClickUp and Harvest, groups it per repository, client or
//! ticket, and publishes LLM-written standup narratives.
//!
//! Exit codes:
//!   0 - Run completed
//!   1 - Runtime or configuration error, or the run failed (no activity)
//!   2 - Run completed but a source or group failed and --strict is set

mod analysis;
mod cli;
mod config;
mod error;
mod http;
mod models;
mod narrative;
mod pipeline;
mod publish;
mod report;
mod retry;
mod sources;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use cli::{Args, OutputFormat};
use config::{Config, Credentials, DEFAULT_CONFIG_FILE};
use models::{Actor, GroupStatus, RunReport, SourceStatus, TimeWindow};
use narrative::NarrativeGenerator;
use pipeline::{Pipeline, RunContext, RunMode};
use publish::Publisher;
use regex::Regex;
use retry::RetryPolicy;
use sources::ClickUpApi;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// A connector gets this many call timeouts for its whole fetch.
const SOURCE_DEADLINE_FACTOR: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("WorkRecap v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_recap(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Recap failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .workrecap.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set your identity, sources, clients and documents.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete recap workflow. Returns the exit code.
async fn run_recap(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    let credentials = Credentials::from_env(&config);

    let until = args.until_time().map_err(anyhow::Error::msg)?;
    let window = TimeWindow::past_days(config.general.days, until.unwrap_or_else(Utc::now));
    let standup_date = args
        .standup_date()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_else(|| Local::now().date_naive());

    let timeout = Duration::from_secs(config.model.timeout_seconds);
    let retry = RetryPolicy::from(&config.retry);

    let ticket_pattern = if config.aggregation.ticket_pattern.trim().is_empty() {
        None
    } else {
        Some(Regex::new(&config.aggregation.ticket_pattern).with_context(|| {
            format!(
                "Invalid [aggregation] ticket_pattern: {}",
                config.aggregation.ticket_pattern
            )
        })?)
    };

    let mode = if args.dry_run {
        RunMode::DryRun
    } else if args.no_publish {
        RunMode::NoPublish
    } else {
        RunMode::Full
    };

    // Step 1: Connectors
    let (connectors, notes) = sources::build_sources(
        &config,
        &credentials,
        args.sources.as_deref(),
        timeout,
        retry,
    )?;
    for note in &notes {
        println!("   ⚠️  {}", note);
    }
    if connectors.is_empty() {
        anyhow::bail!(
            "No activity source is configured. Set {} or configure [local_git], [clickup] or [harvest].",
            config.github.token_env
        );
    }

    println!("📥 Collecting activity for {}", window.label());
    let names: Vec<&str> = connectors.iter().map(|s| s.name()).collect();
    println!("   Sources: {}", names.join(", "));

    // Step 2: Language model
    let (model, model_note) = narrative::select_model(
        &config.model,
        credentials.llm_api_key.as_deref(),
        timeout,
    )?;
    if let Some(ref note) = model_note {
        warn!("{}", note);
        if mode != RunMode::DryRun {
            println!("   ⚠️  {}", note);
        }
    }
    if mode != RunMode::DryRun {
        println!("🤖 Model: {} ({} at a time)", model.name(), config.general.concurrency);
    }
    let generator = NarrativeGenerator::new(model, retry, timeout, config.general.concurrency);

    // Step 3: Publisher
    let publisher = match mode {
        RunMode::Full => {
            let clickup = match credentials.clickup_token {
                Some(ref token) => Some(ClickUpApi::new(
                    &config.clickup.api_url,
                    token,
                    timeout,
                    retry,
                )?),
                None => None,
            };
            Publisher::from_config(&config, clickup)?
        }
        RunMode::DryRun | RunMode::NoPublish => None,
    };

    let context = RunContext {
        actor: actor_from_config(&config),
        window,
        standup_date,
        dimensions: config.general.dimensions.clone(),
        lookup: analysis::ClientLookup::from_clients(&config.clients),
        ticket_pattern,
        source_deadline: timeout * SOURCE_DEADLINE_FACTOR,
        mode,
    };

    // Step 4: Run
    let pipeline = Pipeline::new(context, connectors, generator, publisher)
        .with_progress(!args.quiet);
    let report = pipeline.run().await;

    // Step 5: Save the run report
    let output_path = PathBuf::from(&config.general.output);
    let rendered = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    report::write_report(&rendered, &output_path)?;

    print_summary(&report);
    println!("\n📝 Run report saved to: {}", output_path.display());

    if report.state.is_failed() {
        eprintln!("\n❌ Run failed: {}", report.state);
        return Ok(1);
    }

    if args.strict && report.has_failures() {
        eprintln!("\n⛔ Some sources or groups failed. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

fn actor_from_config(config: &Config) -> Actor {
    Actor {
        github_login: config.actor.github_login.clone(),
        emails: config.actor.emails.clone(),
        clickup_user_id: config.actor.clickup_user_id.clone(),
        harvest_user_id: config.actor.harvest_user_id.clone(),
    }
}

/// Print the console summary.
fn print_summary(report: &RunReport) {
    println!("\n📊 Recap Summary:");
    for source in &report.sources {
        match source.status {
            SourceStatus::Fetched { records } => {
                println!("   ✅ {}: {} records", source.name, records)
            }
            SourceStatus::Failed { ref reason, .. } => {
                println!("   ❌ {}: {}", source.name, reason)
            }
        }
    }

    for group in &report.groups {
        let icon = match group.status {
            GroupStatus::Published { .. } => "📤",
            GroupStatus::AlreadyPublished { .. } => "🔁",
            GroupStatus::Generated { .. } => "📝",
            GroupStatus::Skipped { .. } => "⏭️ ",
            GroupStatus::Failed { .. } => "❌",
        };
        println!(
            "   {} {} {} ({} records): {}",
            icon,
            group.dimension,
            group.key,
            group.record_count,
            group.status.label()
        );
    }

    if !report.ungrouped.is_empty() {
        println!("   Ungrouped records: {}", report.ungrouped.len());
    }

    let s = &report.summary;
    println!(
        "   Published: {} | Already: {} | Generated: {} | Skipped: {} | Failed: {}",
        s.published, s.already_published, s.generated, s.skipped, s.failed
    );
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
