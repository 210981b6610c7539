//! Run report generation.
//!
//! This module renders the run report as Markdown or JSON.

use crate::models::{
    GroupOutcome, GroupStatus, RunMetadata, RunReport, RunState, RunSummary, SourceOutcome,
    SourceStatus, UngroupedRecord,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Work Recap Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata, &report.state));
    output.push_str(&generate_sources_section(&report.sources));
    output.push_str(&generate_summary_section(&report.summary, &report.groups));
    output.push_str(&generate_narratives_section(&report.groups));
    output.push_str(&generate_suggestions_section(&report.groups));
    output.push_str(&generate_ungrouped_section(&report.ungrouped));
    output.push_str(&generate_warnings_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &RunMetadata, state: &RunState) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Actor:** {}\n", metadata.actor));
    section.push_str(&format!("- **Window:** {}\n", metadata.window.label()));
    section.push_str(&format!("- **Standup Date:** {}\n", metadata.standup_date));
    section.push_str(&format!(
        "- **Generated At:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    let dimensions: Vec<String> = metadata.dimensions.iter().map(|d| d.to_string()).collect();
    section.push_str(&format!("- **Grouped By:** {}\n", dimensions.join(", ")));
    section.push_str(&format!("- **Records:** {}\n", metadata.total_records));
    section.push_str(&format!("- **State:** {}\n", state));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the per-source table.
fn generate_sources_section(sources: &[SourceOutcome]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Sources\n\n");
    section.push_str("| Source | Kind | Result |\n");
    section.push_str("|:---|:---|:---|\n");

    for source in sources {
        let result = match source.status {
            SourceStatus::Fetched { records } => format!("{} records", records),
            SourceStatus::Failed { kind, ref reason } => {
                format!("failed({}): {}", kind, escape_cell(reason))
            }
        };
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            source.name, source.kind, result
        ));
    }
    section.push('\n');

    section
}

/// Generate the summary counts and the group table.
fn generate_summary_section(summary: &RunSummary, groups: &[GroupOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Published | Already Published | Generated | Skipped | Failed |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.published,
        summary.already_published,
        summary.generated,
        summary.skipped,
        summary.failed
    ));

    if groups.is_empty() {
        section.push_str("No activity groups were produced.\n\n");
        return section;
    }

    section.push_str("### Groups\n\n");
    section.push_str("| Dimension | Group | Records | Status | Detail |\n");
    section.push_str("|:---|:---|:---:|:---|:---|\n");

    for group in groups {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            group.dimension,
            escape_cell(&group.key),
            group.record_count,
            group.status.label(),
            escape_cell(&status_detail(&group.status))
        ));
    }
    section.push('\n');

    section
}

fn status_detail(status: &GroupStatus) -> String {
    match status {
        GroupStatus::Published { destination } | GroupStatus::AlreadyPublished { destination } => {
            destination.clone()
        }
        GroupStatus::Generated { note } => note.clone().unwrap_or_default(),
        GroupStatus::Skipped { reason } => reason.clone(),
        GroupStatus::Failed { stage, reason, .. } => format!("{}: {}", stage, reason),
    }
}

/// Generate one block per narrative.
fn generate_narratives_section(groups: &[GroupOutcome]) -> String {
    let with_narrative: Vec<_> = groups.iter().filter(|g| g.narrative.is_some()).collect();
    if with_narrative.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Narratives\n\n");

    for group in with_narrative {
        let heading = group.heading.as_deref().unwrap_or(&group.key);
        section.push_str(&format!("### {}\n\n", heading));
        section.push_str(&format!(
            "*{} {} | {} records | {}*\n\n",
            group.dimension,
            group.key,
            group.record_count,
            group.status.label()
        ));
        if let Some(ref narrative) = group.narrative {
            section.push_str(narrative.trim_end());
            section.push_str("\n\n");
        }
    }

    section
}

/// Generate the status suggestion list.
fn generate_suggestions_section(groups: &[GroupOutcome]) -> String {
    let suggestions: Vec<_> = groups
        .iter()
        .flat_map(|g| g.status_suggestions.iter().map(move |s| (g, s)))
        .collect();
    if suggestions.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Status Suggestions\n\n");
    section.push_str("| Ticket | Current | Proposed | Applied |\n");
    section.push_str("|:---|:---|:---|:---:|\n");

    for (group, suggestion) in suggestions {
        let applied = group.applied_status_updates.contains(&suggestion.ticket_id);
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            suggestion.ticket_id,
            suggestion.current.as_deref().unwrap_or("-"),
            escape_cell(&suggestion.proposed),
            if applied { "yes" } else { "no" }
        ));
    }
    section.push('\n');

    section
}

/// Generate the list of records that could not be grouped.
fn generate_ungrouped_section(ungrouped: &[UngroupedRecord]) -> String {
    if ungrouped.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Ungrouped Records\n\n");
    section.push_str("| Dimension | Kind | When | Description | Reason |\n");
    section.push_str("|:---|:---|:---|:---|:---|\n");

    for record in ungrouped {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            record.dimension,
            record.kind,
            record.timestamp.format("%Y-%m-%d %H:%M"),
            escape_cell(&record.description),
            escape_cell(&record.reason)
        ));
    }
    section.push('\n');

    section
}

/// Generate the warnings section from sources and groups.
fn generate_warnings_section(report: &RunReport) -> String {
    let mut warnings = Vec::new();
    for source in &report.sources {
        for warning in &source.warnings {
            warnings.push(format!("**{}:** {}", source.name, warning));
        }
    }
    for group in &report.groups {
        for warning in &group.warnings {
            warnings.push(format!("**{} {}:** {}", group.dimension, group.key, warning));
        }
    }

    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!("- {}\n", warning));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by workrecap v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the rendered report to a file, creating parent directories.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{
        Dimension, SourceKind, Stage, StatusSuggestion, TimeWindow,
    };
    use chrono::{NaiveDate, TimeZone, Utc};

    fn create_test_report() -> RunReport {
        let end = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let groups = vec![
            GroupOutcome {
                dimension: Dimension::Ticket,
                key: "DEV-7".to_string(),
                record_count: 3,
                heading: Some("Ticket DEV-7 updates for 2026-10-19".to_string()),
                status: GroupStatus::Published {
                    destination: "recaps/weekly-notes.md".to_string(),
                },
                narrative: Some("- Fixed the nav bar\n- Added tests".to_string()),
                status_suggestions: vec![StatusSuggestion {
                    ticket_id: "DEV-7".to_string(),
                    current: Some("in progress".to_string()),
                    proposed: "in review".to_string(),
                }],
                applied_status_updates: vec!["DEV-7".to_string()],
                warnings: vec![],
            },
            GroupOutcome {
                dimension: Dimension::Ticket,
                key: "DEV-9".to_string(),
                record_count: 1,
                heading: Some("Ticket DEV-9 updates for 2026-10-19".to_string()),
                status: GroupStatus::Failed {
                    stage: Stage::Generating,
                    kind: ErrorKind::UpstreamUnavailable,
                    reason: "llm unavailable: timed out after 120s".to_string(),
                },
                narrative: None,
                status_suggestions: vec![],
                applied_status_updates: vec![],
                warnings: vec![],
            },
        ];

        RunReport {
            metadata: RunMetadata {
                actor: "octocat".to_string(),
                window: TimeWindow::past_days(7, end),
                standup_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                generated_at: end,
                model_used: "claude-3-haiku-20240307".to_string(),
                dimensions: vec![Dimension::Ticket],
                total_records: 5,
                duration_seconds: 4.2,
            },
            state: RunState::Done,
            sources: vec![
                SourceOutcome {
                    name: "github".to_string(),
                    kind: SourceKind::Commit,
                    status: SourceStatus::Fetched { records: 5 },
                    warnings: vec!["acme/legacy: HTTP 409".to_string()],
                },
                SourceOutcome {
                    name: "harvest".to_string(),
                    kind: SourceKind::TimeEntry,
                    status: SourceStatus::Failed {
                        kind: ErrorKind::UpstreamUnavailable,
                        reason: "harvest unavailable: HTTP 401".to_string(),
                    },
                    warnings: vec![],
                },
            ],
            summary: RunSummary::from_groups(&groups),
            groups,
            ungrouped: vec![UngroupedRecord {
                dimension: Dimension::Ticket,
                kind: SourceKind::Commit,
                timestamp: end,
                description: "chore: bump deps".to_string(),
                reason: "no ticket id".to_string(),
            }],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Work Recap Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Window:** 2026-10-11 to 2026-10-18"));
        assert!(markdown.contains("| github | commit | 5 records |"));
        assert!(markdown.contains("| harvest | time entry | failed(UpstreamUnavailable)"));
        assert!(markdown.contains("| ticket | DEV-9 | 1 | failed(UpstreamUnavailable) |"));
        assert!(markdown.contains("### Ticket DEV-7 updates for 2026-10-19"));
        assert!(markdown.contains("- Fixed the nav bar"));
        assert!(markdown.contains("| DEV-7 | in progress | in review | yes |"));
        assert!(markdown.contains("| chore: bump deps | no ticket id |"));
        assert!(markdown.contains("- **github:** acme/legacy: HTTP 409"));
    }

    #[test]
    fn test_failed_group_has_no_narrative_block() {
        let report = create_test_report();
        let section = generate_narratives_section(&report.groups);
        assert!(section.contains("DEV-7"));
        assert!(!section.contains("### Ticket DEV-9"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let mut report = create_test_report();
        report.groups.clear();
        report.ungrouped.clear();
        report.sources.clear();

        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("No activity groups were produced."));
        assert!(!markdown.contains("## Sources"));
        assert!(!markdown.contains("## Ungrouped Records"));
        assert!(!markdown.contains("## Status Suggestions"));
        assert!(!markdown.contains("## Warnings"));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["state"]["state"], "done");
        assert_eq!(value["groups"][0]["status"]["status"], "published");
        assert_eq!(value["groups"][1]["status"]["kind"], "UpstreamUnavailable");
        assert_eq!(value["sources"][1]["status"]["status"], "failed");
        assert_eq!(value["summary"]["failed"], 1);
    }

    #[test]
    fn test_write_report_creates_directories() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("out/recap.md");
        write_report("# hi\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# hi\n");
    }
}
