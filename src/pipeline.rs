//! The recap pipeline.
//!
//! Fetching -> Aggregating -> Generating -> Publishing -> Done. Failures of
//! single sources or groups are recorded in the report; only a run without
//! any activity fails as a whole.

use crate::analysis::{aggregate, tag_ticket_refs, ClientLookup};
use crate::error::RecapError;
use crate::models::{
    ActivityGroup, ActivityRecord, Actor, Dimension, GroupKey, GroupOutcome, GroupStatus,
    RunMetadata, RunReport, RunState, RunSummary, SourceKind, SourceOutcome, SourceStatus,
    Stage, TimeWindow, UngroupedRecord,
};
use crate::narrative::{build_request, Generated, NarrativeGenerator};
use crate::publish::Publisher;
use crate::sources::{FetchOutcome, SourceConnector};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How far a run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Generate and publish.
    #[default]
    Full,
    /// Fetch and group only.
    DryRun,
    /// Generate without writing to any document.
    NoPublish,
}

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub actor: Actor,
    pub window: TimeWindow,
    pub standup_date: NaiveDate,
    pub dimensions: Vec<Dimension>,
    pub lookup: ClientLookup,
    pub ticket_pattern: Option<Regex>,
    /// Deadline for one connector's whole fetch.
    pub source_deadline: Duration,
    pub mode: RunMode,
}

/// One recap run over a set of sources.
pub struct Pipeline {
    context: RunContext,
    sources: Vec<Arc<dyn SourceConnector>>,
    generator: NarrativeGenerator,
    publisher: Option<Publisher>,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        context: RunContext,
        sources: Vec<Arc<dyn SourceConnector>>,
        generator: NarrativeGenerator,
        publisher: Option<Publisher>,
    ) -> Self {
        Self {
            context,
            sources,
            generator,
            publisher,
            show_progress: false,
        }
    }

    /// Show progress bars on the terminal.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Execute the run and describe what happened.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let mut state = RunState::Fetching;
        info!(
            "Recap for {} over {}",
            self.context.actor.display_name(),
            self.context.window.label()
        );

        let (mut records, sources) = self.fetch_all().await;
        let total_records = records.len();

        if records.is_empty() {
            let reason = RecapError::NoActivity.to_string();
            warn!("{}", reason);
            state = state.fail(reason);
            return self.report(state, sources, Vec::new(), Vec::new(), 0, started);
        }

        state = state.advance();
        let (groups, ungrouped) = self.aggregate(&mut records);

        state = state.advance();
        let generated = match self.context.mode {
            RunMode::DryRun => None,
            _ => Some(self.generate(&groups).await),
        };

        state = state.advance();
        let outcomes = match generated {
            None => groups
                .iter()
                .map(|g| GroupOutcome::new(g, skipped_status(g, "dry run")))
                .collect(),
            Some(generated) => self.publish_all(&groups, generated).await,
        };

        state = state.advance();
        self.report(state, sources, outcomes, ungrouped, total_records, started)
    }

    async fn fetch_all(&self) -> (Vec<ActivityRecord>, Vec<SourceOutcome>) {
        let spinner = self.spinner(format!("Fetching from {} sources", self.sources.len()));

        let fetches = self.sources.iter().map(|source| async move {
            debug!("Fetching from {}", source.name());
            let result = match tokio::time::timeout(
                self.context.source_deadline,
                source.fetch(&self.context.actor, &self.context.window),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RecapError::upstream(
                    source.name(),
                    format!(
                        "no answer within {}s",
                        self.context.source_deadline.as_secs()
                    ),
                )),
            };
            (source, result)
        });
        let results = join_all(fetches).await;

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        let mut records = Vec::new();
        let mut outcomes = Vec::new();
        let mut seen = HashSet::new();
        for (source, result) in results {
            let result = result.map(|fetched| drop_duplicates(source.name(), fetched, &mut seen));
            outcomes.push(source_outcome(source.as_ref(), result, &mut records));
        }
        (records, outcomes)
    }

    fn aggregate(&self, records: &mut [ActivityRecord]) -> (Vec<ActivityGroup>, Vec<UngroupedRecord>) {
        if let Some(ref pattern) = self.context.ticket_pattern {
            let tagged = tag_ticket_refs(records, pattern);
            debug!("Tagged {} records with ticket references", tagged);
        }

        let mut groups = Vec::new();
        let mut ungrouped = Vec::new();
        for dimension in &self.context.dimensions {
            let aggregation = aggregate(records, *dimension, &self.context.lookup);
            info!(
                "{}: {} groups, {} ungrouped records",
                dimension,
                aggregation.group_count(),
                aggregation.ungrouped_records().len()
            );
            groups.extend(aggregation.groups());
            ungrouped.extend(aggregation.ungrouped_records());
        }
        (groups, ungrouped)
    }

    async fn generate(&self, groups: &[ActivityGroup]) -> Vec<Generated> {
        let jobs: Vec<_> = groups
            .iter()
            .filter(|g| !g.key.is_ungrouped())
            .map(|g| {
                (
                    g.clone(),
                    build_request(g, &self.context.window, self.context.standup_date),
                )
            })
            .collect();

        let bar = self.progress_bar(jobs.len() as u64);
        let generated = self.generator.generate(jobs, bar.as_ref()).await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        generated
    }

    async fn publish_all(
        &self,
        groups: &[ActivityGroup],
        generated: Vec<Generated>,
    ) -> Vec<GroupOutcome> {
        let mut by_key: BTreeMap<(Dimension, GroupKey), Generated> = generated
            .into_iter()
            .map(|g| ((g.request.dimension, g.request.key.clone()), g))
            .collect();

        let work: Vec<_> = groups
            .iter()
            .map(|group| {
                let generated = by_key.remove(&(group.dimension, group.key.clone()));
                async move {
                    match generated {
                        Some(generated) => self.publish_one(group, generated).await,
                        None => GroupOutcome::new(
                            group,
                            skipped_status(group, "no narrative requested"),
                        ),
                    }
                }
            })
            .collect();
        join_all(work).await
    }

    async fn publish_one(&self, group: &ActivityGroup, generated: Generated) -> GroupOutcome {
        let narrative = match generated.result {
            Ok(narrative) => narrative,
            Err(e) => {
                let mut outcome = GroupOutcome::new(group, failed(Stage::Generating, &e));
                outcome.heading = Some(generated.request.heading);
                return outcome;
            }
        };

        let mut outcome = GroupOutcome::new(group, GroupStatus::Generated { note: None });
        outcome.heading = Some(narrative.heading.clone());
        outcome.narrative = Some(narrative.body.clone());
        outcome.status_suggestions = narrative.status_suggestions.clone();
        outcome.warnings = narrative.warnings.clone();

        if self.context.mode == RunMode::NoPublish {
            outcome.status = GroupStatus::Generated {
                note: Some("publishing disabled".to_string()),
            };
            return outcome;
        }

        let Some(ref publisher) = self.publisher else {
            outcome.status = GroupStatus::Generated {
                note: Some("no publisher available".to_string()),
            };
            return outcome;
        };

        let Some(destination) = publisher.destination(&narrative) else {
            outcome.status = GroupStatus::Generated {
                note: Some("no destination document configured".to_string()),
            };
            return outcome;
        };

        outcome.heading = Some(destination.heading.clone());
        match publisher.publish(&narrative, &destination).await {
            Ok(receipt) => {
                outcome.status = receipt.status;
                outcome.applied_status_updates = receipt.applied;
                outcome.warnings.extend(receipt.warnings);
            }
            Err(e) => {
                warn!("Publishing {} {} failed: {}", group.dimension, group.key, e);
                outcome.status = failed(Stage::Publishing, &e);
            }
        }
        outcome
    }

    fn report(
        &self,
        state: RunState,
        sources: Vec<SourceOutcome>,
        groups: Vec<GroupOutcome>,
        ungrouped: Vec<UngroupedRecord>,
        total_records: usize,
        started: Instant,
    ) -> RunReport {
        let summary = RunSummary::from_groups(&groups);
        RunReport {
            metadata: RunMetadata {
                actor: self.context.actor.display_name(),
                window: self.context.window,
                standup_date: self.context.standup_date,
                generated_at: Utc::now(),
                model_used: self.generator.model_name(),
                dimensions: self.context.dimensions.clone(),
                total_records,
                duration_seconds: started.elapsed().as_secs_f64(),
            },
            state,
            sources,
            groups,
            ungrouped,
            summary,
        }
    }

    fn spinner(&self, message: String) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.show_progress || len == 0 {
            return None;
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} narratives",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        Some(pb)
    }
}

/// Identity of a record across sources: the same commit fetched from GitHub
/// and from a local clone shares kind, project and reference.
type RecordIdentity = (SourceKind, String, String);

fn record_identity(record: &ActivityRecord) -> Option<RecordIdentity> {
    Some((
        record.kind,
        record.project.clone()?,
        record.reference.clone()?,
    ))
}

/// Drop records an earlier source already yielded, noting how many.
fn drop_duplicates(
    source: &str,
    mut fetched: FetchOutcome,
    seen: &mut HashSet<RecordIdentity>,
) -> FetchOutcome {
    let before = fetched.records.len();
    fetched
        .records
        .retain(|record| record_identity(record).map_or(true, |id| seen.insert(id)));

    let dropped = before - fetched.records.len();
    if dropped > 0 {
        debug!("{}: dropped {} duplicate records", source, dropped);
        fetched.warnings.push(format!(
            "{} duplicate records dropped (already fetched by another source)",
            dropped
        ));
    }
    fetched
}

fn source_outcome(
    source: &dyn SourceConnector,
    result: Result<FetchOutcome, RecapError>,
    records: &mut Vec<ActivityRecord>,
) -> SourceOutcome {
    match result {
        Ok(fetched) => {
            info!("{}: {} records", source.name(), fetched.records.len());
            let outcome = SourceOutcome {
                name: source.name().to_string(),
                kind: source.kind(),
                status: SourceStatus::Fetched {
                    records: fetched.records.len(),
                },
                warnings: fetched.warnings,
            };
            records.extend(fetched.records);
            outcome
        }
        Err(e) => {
            warn!("{} failed: {}", source.name(), e);
            SourceOutcome {
                name: source.name().to_string(),
                kind: source.kind(),
                status: SourceStatus::Failed {
                    kind: e.kind(),
                    reason: e.to_string(),
                },
                warnings: Vec::new(),
            }
        }
    }
}

fn skipped_status(group: &ActivityGroup, reason: &str) -> GroupStatus {
    let reason = if group.key.is_ungrouped() {
        "ungrouped records are not summarized"
    } else {
        reason
    };
    GroupStatus::Skipped {
        reason: reason.to_string(),
    }
}

fn failed(stage: Stage, error: &RecapError) -> GroupStatus {
    GroupStatus::Failed {
        stage,
        kind: error.kind(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::narrative::LanguageModel;
    use crate::publish::{DocumentStore, MarkdownDocumentStore};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use tempfile::TempDir;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, 10, 0, 0).unwrap()
    }

    struct FixedSource {
        name: &'static str,
        result: Result<Vec<ActivityRecord>, RecapError>,
    }

    #[async_trait]
    impl SourceConnector for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Commit
        }

        async fn fetch(
            &self,
            _actor: &Actor,
            _window: &TimeWindow,
        ) -> Result<FetchOutcome, RecapError> {
            self.result.clone().map(FetchOutcome::new)
        }
    }

    /// Bullets echo the context lines; contexts naming `hang_on` never answer.
    struct EchoModel {
        hang_on: Option<&'static str>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn name(&self) -> String {
            "echo".to_string()
        }

        async fn complete(&self, _instruction: &str, context: &str) -> Result<String, RecapError> {
            if self.hang_on.is_some_and(|key| context.starts_with(&format!("repository {}", key))) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(context
                .lines()
                .filter(|l| l.starts_with("- "))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    fn commits() -> Vec<ActivityRecord> {
        vec![
            ActivityRecord::commit("api", "a1", day(12), "Add limiter"),
            ActivityRecord::commit("web", "w1", day(13), "Fix nav DEV-7"),
            ActivityRecord::commit("api", "a2", day(14), "Tune limiter"),
        ]
    }

    fn context(mode: RunMode, dimensions: Vec<Dimension>) -> RunContext {
        RunContext {
            actor: Actor {
                github_login: Some("octocat".to_string()),
                ..Actor::default()
            },
            window: TimeWindow::past_days(7, day(18)),
            standup_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            dimensions,
            lookup: ClientLookup::new(),
            ticket_pattern: Some(Regex::new(r"\bDEV-[0-9]+\b").unwrap()),
            source_deadline: Duration::from_secs(5),
            mode,
        }
    }

    fn pipeline(
        context: RunContext,
        sources: Vec<Arc<dyn SourceConnector>>,
        model: EchoModel,
        publisher: Option<Publisher>,
    ) -> Pipeline {
        let generator = NarrativeGenerator::new(
            Arc::new(model),
            RetryPolicy::none(),
            Duration::from_millis(100),
            4,
        );
        Pipeline::new(context, sources, generator, publisher)
    }

    fn ok_source(name: &'static str, records: Vec<ActivityRecord>) -> Arc<dyn SourceConnector> {
        Arc::new(FixedSource {
            name,
            result: Ok(records),
        })
    }

    #[tokio::test]
    async fn test_timeout_in_one_group_does_not_stop_the_run() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MarkdownDocumentStore::new(temp.path().to_path_buf()));
        let publisher = Publisher::new(store.clone(), Some("weekly".to_string()));

        let run = pipeline(
            context(RunMode::Full, vec![Dimension::Repository]),
            vec![ok_source("github", commits())],
            EchoModel {
                hang_on: Some("web"),
            },
            Some(publisher),
        );
        let report = run.run().await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].key, "api");
        assert!(matches!(report.groups[0].status, GroupStatus::Published { .. }));
        assert_eq!(report.groups[1].key, "web");
        assert_eq!(report.groups[1].status.label(), "failed(UpstreamUnavailable)");

        let doc = store.read("weekly").await.unwrap();
        assert!(doc.contains("## api updates for 2026-10-19"));
        assert!(!doc.contains("web updates"));
    }

    #[tokio::test]
    async fn test_second_run_finds_sections_already_published() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MarkdownDocumentStore::new(temp.path().to_path_buf()));

        for _ in 0..2 {
            let run = pipeline(
                context(RunMode::Full, vec![Dimension::Repository]),
                vec![ok_source("github", commits())],
                EchoModel { hang_on: None },
                Some(Publisher::new(store.clone(), Some("weekly".to_string()))),
            );
            run.run().await;
        }

        let run = pipeline(
            context(RunMode::Full, vec![Dimension::Repository]),
            vec![ok_source("github", commits())],
            EchoModel { hang_on: None },
            Some(Publisher::new(store.clone(), Some("weekly".to_string()))),
        );
        let report = run.run().await;
        assert_eq!(report.summary.already_published, 2);

        let doc = store.read("weekly").await.unwrap();
        assert_eq!(doc.matches("## api updates for 2026-10-19").count(), 1);
        assert_eq!(doc.matches("## web updates for 2026-10-19").count(), 1);
    }

    #[tokio::test]
    async fn test_no_activity_fails_fetching() {
        let failing: Arc<dyn SourceConnector> = Arc::new(FixedSource {
            name: "harvest",
            result: Err(RecapError::upstream("harvest", "HTTP 401")),
        });
        let run = pipeline(
            context(RunMode::Full, vec![Dimension::Repository]),
            vec![ok_source("github", Vec::new()), failing],
            EchoModel { hang_on: None },
            None,
        );
        let report = run.run().await;

        assert_eq!(
            report.state,
            RunState::Failed {
                stage: Stage::Fetching,
                reason: "no activity found from any source".to_string()
            }
        );
        assert_eq!(report.sources.len(), 2);
        assert!(matches!(
            report.sources[1].status,
            SourceStatus::Failed {
                kind: ErrorKind::UpstreamUnavailable,
                ..
            }
        ));
        assert!(report.groups.is_empty());
    }

    #[tokio::test]
    async fn test_failed_source_does_not_stop_others() {
        let failing: Arc<dyn SourceConnector> = Arc::new(FixedSource {
            name: "clickup",
            result: Err(RecapError::transient("clickup", "HTTP 503")),
        });
        let run = pipeline(
            context(RunMode::NoPublish, vec![Dimension::Repository]),
            vec![failing, ok_source("github", commits())],
            EchoModel { hang_on: None },
            None,
        );
        let report = run.run().await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.metadata.total_records, 3);
        assert!(report.has_failures());
        assert_eq!(report.summary.generated, 2);
        assert_eq!(
            report.groups[0].status,
            GroupStatus::Generated {
                note: Some("publishing disabled".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_commit_seen_by_two_sources_counts_once() {
        let sha = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b";
        let remote = ActivityRecord::commit("acme/api", sha, day(14), "Add limiter");
        let local = remote.clone().with_source("local_git");
        let run = pipeline(
            context(RunMode::DryRun, vec![Dimension::Repository]),
            vec![
                ok_source("github", vec![remote]),
                ok_source("local_git", vec![local]),
            ],
            EchoModel { hang_on: None },
            None,
        );
        let report = run.run().await;

        assert_eq!(report.metadata.total_records, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].record_count, 1);

        assert!(report.sources[0].warnings.is_empty());
        assert!(matches!(
            report.sources[1].status,
            SourceStatus::Fetched { records: 0 }
        ));
        assert_eq!(report.sources[1].warnings.len(), 1);
        assert!(report.sources[1].warnings[0].starts_with("1 duplicate records dropped"));
    }

    #[test]
    fn test_records_without_reference_are_kept() {
        let mut fetched = FetchOutcome::new(vec![
            ActivityRecord::commit("acme/api", "a1", day(12), "Add limiter"),
            ActivityRecord::commit("acme/api", "a1", day(12), "Add limiter"),
        ]);
        fetched.records[0].reference = None;
        fetched.records[1].reference = None;

        let mut seen = HashSet::new();
        let kept = drop_duplicates("github", fetched, &mut seen);
        assert_eq!(kept.records.len(), 2);
        assert!(kept.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_skips_generation() {
        let run = pipeline(
            context(RunMode::DryRun, vec![Dimension::Repository, Dimension::Ticket]),
            vec![ok_source("github", commits())],
            EchoModel { hang_on: None },
            None,
        );
        let report = run.run().await;

        assert_eq!(report.state, RunState::Done);
        // api, web, then DEV-7 and the ticket-less commits.
        assert_eq!(report.groups.len(), 4);
        assert!(report
            .groups
            .iter()
            .all(|g| matches!(g.status, GroupStatus::Skipped { .. })));
        assert_eq!(report.groups[2].key, "DEV-7");
        assert_eq!(report.groups[3].key, "ungrouped");
        assert_eq!(report.ungrouped.len(), 2);
        assert!(report.ungrouped.iter().all(|u| u.reason == "no ticket id"));
    }

    #[tokio::test]
    async fn test_unmapped_client_lands_in_ungrouped() {
        let mut ctx = context(RunMode::NoPublish, vec![Dimension::Client]);
        ctx.lookup.insert("api", "Acme");
        let run = pipeline(
            ctx,
            vec![ok_source("github", commits())],
            EchoModel { hang_on: None },
            None,
        );
        let report = run.run().await;

        assert_eq!(report.groups.len(), 2);
        assert_eq!(report.groups[0].key, "Acme");
        assert_eq!(report.groups[0].record_count, 2);
        assert_eq!(report.groups[1].key, "ungrouped");
        assert_eq!(
            report.ungrouped[0].reason,
            "no client mapping for repository 'web'"
        );
    }
}
