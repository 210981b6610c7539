//! Activity sources.
//!
//! Each connector fetches the actor's activity from one external system for
//! a time window and owns its own pagination and retries.

pub mod clickup;
pub mod github;
pub mod harvest;
pub mod local_git;

use crate::cli::SourceName;
use crate::config::{Config, Credentials};
use crate::error::RecapError;
use crate::models::{ActivityRecord, Actor, SourceKind, TimeWindow};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use clickup::{ClickUpApi, ClickUpTicketConnector};
pub use github::GitHubCommitConnector;
pub use harvest::HarvestTimesheetConnector;
pub use local_git::LocalGitConnector;

/// Records fetched by one connector, plus partial failures that did not
/// stop it (e.g. one repository out of ten).
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: Vec<ActivityRecord>,
    pub warnings: Vec<String>,
}

impl FetchOutcome {
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self {
            records,
            warnings: Vec::new(),
        }
    }
}

/// A source of activity records.
///
/// An empty result is a valid outcome, not an error.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connector name used in logs and reports (e.g. `"github"`).
    fn name(&self) -> &str;

    /// Kind of records this connector produces.
    fn kind(&self) -> SourceKind;

    /// Fetch the actor's activity inside the window.
    async fn fetch(&self, actor: &Actor, window: &TimeWindow) -> Result<FetchOutcome, RecapError>;
}

/// Build every configured connector, restricted to `selection` when given.
///
/// Sources that were explicitly selected but lack configuration are
/// reported in the returned notes.
pub fn build_sources(
    config: &Config,
    credentials: &Credentials,
    selection: Option<&[SourceName]>,
    timeout: Duration,
    retry: RetryPolicy,
) -> Result<(Vec<Arc<dyn SourceConnector>>, Vec<String>), RecapError> {
    let wanted = |name: SourceName| selection.map_or(true, |s| s.contains(&name));
    let explicit = |name: SourceName| selection.is_some_and(|s| s.contains(&name));

    let mut sources: Vec<Arc<dyn SourceConnector>> = Vec::new();
    let mut notes = Vec::new();
    let mut skip = |name: SourceName, reason: &str| {
        if explicit(name) {
            warn!("Source {:?} skipped: {}", name, reason);
            notes.push(format!("{:?} skipped: {}", name, reason));
        } else {
            debug!("Source {:?} not configured: {}", name, reason);
        }
    };

    if wanted(SourceName::Github) {
        match (&credentials.github_token, config.github.enabled) {
            (Some(token), true) => sources.push(Arc::new(GitHubCommitConnector::new(
                &config.github.api_url,
                token,
                timeout,
                retry,
            )?)),
            (_, false) => skip(SourceName::Github, "disabled in config"),
            (None, _) => skip(
                SourceName::Github,
                &format!("{} is not set", config.github.token_env),
            ),
        }
    }

    if wanted(SourceName::Local) {
        if config.local_git.roots.is_empty() {
            skip(SourceName::Local, "no [local_git] roots configured");
        } else if config.actor.emails.is_empty() {
            skip(SourceName::Local, "no [actor] emails configured");
        } else {
            sources.push(Arc::new(LocalGitConnector::new(
                config.local_git.roots.clone(),
                config.local_git.max_depth,
                config.local_git.excludes.clone(),
            )));
        }
    }

    if wanted(SourceName::Clickup) {
        match (
            &credentials.clickup_token,
            &config.clickup.team_id,
            config.clickup.enabled,
        ) {
            (Some(token), Some(team_id), true) => {
                let api = ClickUpApi::new(&config.clickup.api_url, token, timeout, retry)?;
                sources.push(Arc::new(ClickUpTicketConnector::new(
                    api,
                    team_id,
                    config.clickup.only_updated_in_window,
                )));
            }
            (_, _, false) => skip(SourceName::Clickup, "disabled in config"),
            (None, _, _) => skip(
                SourceName::Clickup,
                &format!("{} is not set", config.clickup.token_env),
            ),
            (_, None, _) => skip(SourceName::Clickup, "no [clickup] team_id configured"),
        }
    }

    if wanted(SourceName::Harvest) {
        match (
            &credentials.harvest_token,
            &credentials.harvest_account_id,
            config.harvest.enabled,
        ) {
            (Some(token), Some(account), true) => {
                sources.push(Arc::new(HarvestTimesheetConnector::new(
                    &config.harvest.api_url,
                    token,
                    account,
                    timeout,
                    retry,
                )?))
            }
            (_, _, false) => skip(SourceName::Harvest, "disabled in config"),
            _ => skip(
                SourceName::Harvest,
                &format!(
                    "{} and {} must be set",
                    config.harvest.token_env, config.harvest.account_id_env
                ),
            ),
        }
    }

    Ok((sources, notes))
}
