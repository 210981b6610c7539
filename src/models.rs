//! Data models for the recap pipeline.
//!
//! This module contains the core data structures used throughout the
//! application: activity records, groups, narratives, and the run report.

use crate::error::ErrorKind;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of evidence an activity record carries.
///
/// The declaration order is the tie-breaker used when two records share a
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A source-control commit.
    Commit,
    /// A ticket-tracker item.
    Ticket,
    /// A timesheet entry.
    TimeEntry,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Commit => write!(f, "commit"),
            SourceKind::Ticket => write!(f, "ticket"),
            SourceKind::TimeEntry => write!(f, "time entry"),
        }
    }
}

/// One unit of work evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// What kind of evidence this is.
    pub kind: SourceKind,
    /// When the work happened.
    pub timestamp: DateTime<Utc>,
    /// Owning repository (`owner/repo`) or project name.
    pub project: Option<String>,
    /// Ticket identifier, if the record is or references a ticket.
    pub ticket_id: Option<String>,
    /// Commit message, ticket title or timesheet note.
    pub description: String,
    /// Tracked duration in minutes (time entries).
    pub duration_minutes: Option<u32>,
    /// Status label (tickets).
    pub status: Option<String>,
    /// Commit sha, ticket url or entry id.
    pub reference: Option<String>,
    /// Name of the connector that produced the record.
    pub source: String,
}

impl ActivityRecord {
    /// A commit in a repository.
    pub fn commit(
        repository: impl Into<String>,
        sha: impl Into<String>,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: SourceKind::Commit,
            timestamp,
            project: Some(repository.into()),
            ticket_id: None,
            description: message.into(),
            duration_minutes: None,
            status: None,
            reference: Some(sha.into()),
            source: "github".to_string(),
        }
    }

    /// A ticket with its current status.
    pub fn ticket(
        ticket_id: impl Into<String>,
        title: impl Into<String>,
        status: impl Into<String>,
        project: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: SourceKind::Ticket,
            timestamp,
            project,
            ticket_id: Some(ticket_id.into()),
            description: title.into(),
            duration_minutes: None,
            status: Some(status.into()),
            reference: None,
            source: "clickup".to_string(),
        }
    }

    /// A timesheet entry.
    pub fn time_entry(
        project: impl Into<String>,
        minutes: u32,
        note: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: SourceKind::TimeEntry,
            timestamp,
            project: Some(project.into()),
            ticket_id: None,
            description: note.into(),
            duration_minutes: Some(minutes),
            status: None,
            reference: None,
            source: "harvest".to_string(),
        }
    }

    /// Overrides the connector name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Returns the short reference (7 chars for commit shas).
    pub fn short_reference(&self) -> Option<&str> {
        self.reference.as_deref().map(|r| match self.kind {
            SourceKind::Commit if r.len() > 7 => &r[..7],
            _ => r,
        })
    }
}

/// The developer whose activity is being aggregated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// GitHub login; resolved from the token when empty.
    pub github_login: Option<String>,
    /// Commit author emails (local repositories).
    pub emails: Vec<String>,
    /// ClickUp assignee id.
    pub clickup_user_id: Option<String>,
    /// Harvest user id; resolved from the token when empty.
    pub harvest_user_id: Option<String>,
}

impl Actor {
    /// Human-readable identity for reports.
    pub fn display_name(&self) -> String {
        self.github_login
            .clone()
            .or_else(|| self.emails.first().cloned())
            .unwrap_or_else(|| "current user".to_string())
    }
}

/// A bounded date range used to filter fetched records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `days` days ending at `end`.
    pub fn past_days(days: u32, end: DateTime<Utc>) -> Self {
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }

    /// Inclusive containment check.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Returns e.g. `2026-10-11 to 2026-10-18`.
    pub fn label(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Attribute used to bucket activity records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Owning repository or project.
    Repository,
    /// Client, resolved through the repository/project mapping.
    Client,
    /// Ticket id.
    Ticket,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Repository => write!(f, "repository"),
            Dimension::Client => write!(f, "client"),
            Dimension::Ticket => write!(f, "ticket"),
        }
    }
}

/// Identifier of an activity group. `Ungrouped` sorts after every name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Named(String),
    Ungrouped,
}

impl GroupKey {
    pub fn named(name: impl Into<String>) -> Self {
        GroupKey::Named(name.into())
    }

    pub fn is_ungrouped(&self) -> bool {
        matches!(self, GroupKey::Ungrouped)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Named(name) => write!(f, "{}", name),
            GroupKey::Ungrouped => write!(f, "ungrouped"),
        }
    }
}

/// Records sharing one key under one dimension, in chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityGroup {
    pub dimension: Dimension,
    pub key: GroupKey,
    pub records: Vec<ActivityRecord>,
}

/// Prompt for one group, ready for the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeRequest {
    pub dimension: Dimension,
    pub key: GroupKey,
    /// Section heading the narrative is published under.
    pub heading: String,
    /// Output-shape instruction.
    pub instruction: String,
    /// Formatted records.
    pub context: String,
}

/// A proposed ticket status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSuggestion {
    pub ticket_id: String,
    pub current: Option<String>,
    pub proposed: String,
}

impl fmt::Display for StatusSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current {
            Some(ref current) => write!(f, "{}: {} -> {}", self.ticket_id, current, self.proposed),
            None => write!(f, "{}: -> {}", self.ticket_id, self.proposed),
        }
    }
}

/// Narrative returned by the language model for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativeResult {
    pub dimension: Dimension,
    pub key: GroupKey,
    pub heading: String,
    pub body: String,
    /// False when the model output lacked the expected structure and the raw
    /// text was kept.
    pub structured: bool,
    pub status_suggestions: Vec<StatusSuggestion>,
    pub warnings: Vec<String>,
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Aggregating,
    Generating,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetching => write!(f, "fetching"),
            Stage::Aggregating => write!(f, "aggregating"),
            Stage::Generating => write!(f, "generating"),
            Stage::Publishing => write!(f, "publishing"),
        }
    }
}

/// State of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Fetching,
    Aggregating,
    Generating,
    Publishing,
    Done,
    Failed { stage: Stage, reason: String },
}

impl RunState {
    /// Moves to the next stage. Terminal states stay where they are.
    pub fn advance(self) -> Self {
        match self {
            RunState::Fetching => RunState::Aggregating,
            RunState::Aggregating => RunState::Generating,
            RunState::Generating => RunState::Publishing,
            RunState::Publishing => RunState::Done,
            terminal => terminal,
        }
    }

    /// Fails the current stage. Terminal states stay where they are.
    pub fn fail(self, reason: impl Into<String>) -> Self {
        match self.stage() {
            Some(stage) => RunState::Failed {
                stage,
                reason: reason.into(),
            },
            None => self,
        }
    }

    /// The stage being executed, if the run is not terminal.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Fetching => Some(Stage::Fetching),
            RunState::Aggregating => Some(Stage::Aggregating),
            RunState::Generating => Some(Stage::Generating),
            RunState::Publishing => Some(Stage::Publishing),
            RunState::Done | RunState::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunState::Failed { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Done => write!(f, "done"),
            RunState::Failed { stage, reason } => write!(f, "failed({}, {})", stage, reason),
            other => match other.stage() {
                Some(stage) => write!(f, "{}", stage),
                None => Ok(()),
            },
        }
    }
}

/// Result of one connector fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Fetched { records: usize },
    Failed { kind: ErrorKind, reason: String },
}

/// Per-connector section of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub name: String,
    pub kind: SourceKind,
    pub status: SourceStatus,
    /// Partial failures that did not stop the connector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Final status of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    /// Narrative appended to the destination.
    Published { destination: String },
    /// The destination already had a section with the same heading.
    AlreadyPublished { destination: String },
    /// Narrative generated but not written anywhere.
    Generated {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// No narrative was attempted.
    Skipped { reason: String },
    /// Generation or publishing failed.
    Failed {
        stage: Stage,
        kind: ErrorKind,
        reason: String,
    },
}

impl GroupStatus {
    /// Short label for tables and console output.
    pub fn label(&self) -> String {
        match self {
            GroupStatus::Published { .. } => "published".to_string(),
            GroupStatus::AlreadyPublished { .. } => "already published".to_string(),
            GroupStatus::Generated { .. } => "generated".to_string(),
            GroupStatus::Skipped { .. } => "skipped".to_string(),
            GroupStatus::Failed { kind, .. } => format!("failed({})", kind),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, GroupStatus::Failed { .. })
    }
}

/// Per-group section of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub dimension: Dimension,
    pub key: String,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub status: GroupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_suggestions: Vec<StatusSuggestion>,
    /// Ticket ids whose status was updated at the destination.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_status_updates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl GroupOutcome {
    /// Outcome with no narrative attached yet.
    pub fn new(group: &ActivityGroup, status: GroupStatus) -> Self {
        Self {
            dimension: group.dimension,
            key: group.key.to_string(),
            record_count: group.records.len(),
            heading: None,
            status,
            narrative: None,
            status_suggestions: Vec::new(),
            applied_status_updates: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// A record that could not be assigned a group key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UngroupedRecord {
    pub dimension: Dimension,
    pub kind: SourceKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub reason: String,
}

/// Metadata about the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub actor: String,
    pub window: TimeWindow,
    pub standup_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub dimensions: Vec<Dimension>,
    pub total_records: usize,
    pub duration_seconds: f64,
}

/// Counts of group statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub published: usize,
    pub already_published: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_groups(groups: &[GroupOutcome]) -> Self {
        let mut summary = Self::default();
        for group in groups {
            match group.status {
                GroupStatus::Published { .. } => summary.published += 1,
                GroupStatus::AlreadyPublished { .. } => summary.already_published += 1,
                GroupStatus::Generated { .. } => summary.generated += 1,
                GroupStatus::Skipped { .. } => summary.skipped += 1,
                GroupStatus::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// The complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub state: RunState,
    pub sources: Vec<SourceOutcome>,
    pub groups: Vec<GroupOutcome>,
    pub ungrouped: Vec<UngroupedRecord>,
    pub summary: RunSummary,
}

impl RunReport {
    /// True when any group or source failed.
    pub fn has_failures(&self) -> bool {
        self.groups.iter().any(|g| g.status.is_failure())
            || self
                .sources
                .iter()
                .any(|s| matches!(s.status, SourceStatus::Failed { .. }))
    }
}
