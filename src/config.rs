//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.workrecap.toml` files and resolving credentials from the environment.

use crate::models::Dimension;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".workrecap.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Identity of the developer.
    #[serde(default)]
    pub actor: ActorConfig,

    /// Language model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Retry settings shared by every external call.
    #[serde(default)]
    pub retry: RetryConfig,

    /// GitHub commit source.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Local repositories source.
    #[serde(default)]
    pub local_git: LocalGitConfig,

    /// ClickUp tickets source.
    #[serde(default)]
    pub clickup: ClickUpConfig,

    /// Harvest timesheet source.
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Grouping settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Publishing settings.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Client name to the repositories/projects billed to it.
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default run report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Length of the time window in days.
    #[serde(default = "default_days")]
    pub days: u32,

    /// Maximum concurrent narrative generations.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Grouping dimensions to produce narratives for.
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<Dimension>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            days: default_days(),
            concurrency: default_concurrency(),
            dimensions: default_dimensions(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "workrecap_report.md".to_string()
}

fn default_days() -> u32 {
    7
}

fn default_concurrency() -> usize {
    4
}

fn default_dimensions() -> Vec<Dimension> {
    vec![Dimension::Repository]
}

/// Identity of the developer whose activity is aggregated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorConfig {
    /// GitHub login. Resolved from the token when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_login: Option<String>,

    /// Commit author emails used for local repositories.
    #[serde(default)]
    pub emails: Vec<String>,

    /// ClickUp user id used as the assignee filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clickup_user_id: Option<String>,

    /// Harvest user id. Resolved from the token when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_user_id: Option<String>,
}

/// Language model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API.
    #[default]
    Anthropic,
    /// Local Ollama server.
    Ollama,
    /// No model: one bullet per distinct activity line.
    Offline,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-haiku-20240307",
            Provider::Ollama => "llama3.2:latest",
            Provider::Offline => "offline",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Ollama => "http://localhost:11434",
            Provider::Offline => "",
        }
    }
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which provider to call.
    #[serde(default)]
    pub provider: Provider,

    /// Model name. Defaults per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// API base URL. Defaults per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Temperature for generation.
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for every external call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            name: None,
            url: None,
            api_key_env: default_llm_key_env(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl ModelConfig {
    pub fn effective_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn effective_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| self.provider.default_url().to_string())
    }
}

fn default_llm_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_timeout() -> u64 {
    120
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call, including the first.
    #[serde(default = "default_attempts")]
    pub max_attempts: usize,

    /// Base backoff delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

fn default_attempts() -> usize {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

/// GitHub commit source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_github_url")]
    pub api_url: String,

    /// Environment variable holding the token.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_github_url(),
            token_env: default_github_token_env(),
        }
    }
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Local repositories source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalGitConfig {
    /// Directories searched for repositories. Empty disables the source.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// How deep below each root to look.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Directory names never descended into.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,
}

impl Default for LocalGitConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: default_max_depth(),
            excludes: default_excludes(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}

fn default_excludes() -> Vec<String> {
    vec!["node_modules", "target", "vendor", "dist", "build", "venv"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// ClickUp settings, for both tickets and docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickUpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_clickup_url")]
    pub api_url: String,

    #[serde(default = "default_clickup_token_env")]
    pub token_env: String,

    /// Workspace (team) id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    /// Only keep tickets updated inside the time window.
    #[serde(default)]
    pub only_updated_in_window: bool,
}

impl Default for ClickUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_clickup_url(),
            token_env: default_clickup_token_env(),
            team_id: None,
            only_updated_in_window: false,
        }
    }
}

fn default_clickup_url() -> String {
    "https://api.clickup.com".to_string()
}

fn default_clickup_token_env() -> String {
    "CLICKUP_TOKEN".to_string()
}

/// Harvest timesheet settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_harvest_url")]
    pub api_url: String,

    #[serde(default = "default_harvest_token_env")]
    pub token_env: String,

    #[serde(default = "default_harvest_account_env")]
    pub account_id_env: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_harvest_url(),
            token_env: default_harvest_token_env(),
            account_id_env: default_harvest_account_env(),
        }
    }
}

fn default_harvest_url() -> String {
    "https://api.harvestapp.com".to_string()
}

fn default_harvest_token_env() -> String {
    "HARVEST_TOKEN".to_string()
}

fn default_harvest_account_env() -> String {
    "HARVEST_ACCOUNT_ID".to_string()
}

/// Grouping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Pattern for ticket ids mentioned in commit messages and notes.
    #[serde(default = "default_ticket_pattern")]
    pub ticket_pattern: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            ticket_pattern: default_ticket_pattern(),
        }
    }
}

fn default_ticket_pattern() -> String {
    r"\b(?:CU-[0-9a-z]+|[A-Z][A-Z0-9]+-[0-9]+)\b".to_string()
}

/// Where narratives are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishBackend {
    /// Markdown files in a local directory.
    #[default]
    Markdown,
    /// ClickUp Docs pages (`docId/pageId`).
    Clickup,
}

/// Publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub backend: PublishBackend,

    /// Directory for the markdown backend.
    #[serde(default = "default_publish_dir")]
    pub directory: PathBuf,

    /// Document for repository/ticket narratives and clients without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_document: Option<String>,

    /// Push suggested ticket statuses to ClickUp.
    #[serde(default)]
    pub apply_status_suggestions: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backend: PublishBackend::default(),
            directory: default_publish_dir(),
            default_document: Some("weekly-notes".to_string()),
            apply_status_suggestions: false,
        }
    }
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from("recaps")
}

/// One client and what is billed to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Repository names (`owner/repo` or `repo`).
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Ticket-tracker or timesheet project names.
    #[serde(default)]
    pub projects: Vec<String>,

    /// Standup document for this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Secrets resolved from the environment once at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub github_token: Option<String>,
    pub clickup_token: Option<String>,
    pub harvest_token: Option<String>,
    pub harvest_account_id: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Credentials {
    /// Read the variables named in the configuration.
    pub fn from_env(config: &Config) -> Self {
        Self {
            github_token: env_secret(&config.github.token_env),
            clickup_token: env_secret(&config.clickup.token_env),
            harvest_token: env_secret(&config.harvest.token_env),
            harvest_account_id: env_secret(&config.harvest.account_id_env),
            llm_api_key: env_secret(&config.model.api_key_env),
        }
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| is_real_secret(name, v))
}

/// Rejects empty values and unedited `.env.example` placeholders.
fn is_real_secret(name: &str, value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.starts_with("your_") && !value.contains(name)
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(days) = args.days {
            self.general.days = days;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref dimensions) = args.group_by {
            self.general.dimensions = dimensions.clone();
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(provider) = args.provider {
            if provider != self.model.provider {
                // Provider-specific defaults no longer apply.
                self.model.name = None;
                self.model.url = None;
            }
            self.model.provider = provider;
        }
        if let Some(ref model) = args.model {
            self.model.name = Some(model.clone());
        }
        if let Some(ref url) = args.llm_url {
            self.model.url = Some(url.clone());
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.clients.insert(
            "Example Client".to_string(),
            ClientConfig {
                repositories: vec!["example-org/api".to_string()],
                projects: vec!["Example Retainer".to_string()],
                document: Some("example-client-standup".to_string()),
            },
        );
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
