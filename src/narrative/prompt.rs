//! Prompt construction for activity groups.

use crate::analysis::{format_minutes, kind_counts, total_minutes};
use crate::models::{
    ActivityGroup, ActivityRecord, Dimension, GroupKey, NarrativeRequest, SourceKind, TimeWindow,
};
use chrono::NaiveDate;

/// Section heading a group's narrative is published under.
pub fn heading(dimension: Dimension, key: &GroupKey, standup_date: NaiveDate) -> String {
    let date = standup_date.format("%Y-%m-%d");
    match dimension {
        Dimension::Client => format!("Updates for {} standup", date),
        Dimension::Repository => format!("{} updates for {}", key, date),
        Dimension::Ticket => format!("Ticket {} updates for {}", key, date),
    }
}

/// Build the deterministic request for one group.
pub fn build_request(
    group: &ActivityGroup,
    window: &TimeWindow,
    standup_date: NaiveDate,
) -> NarrativeRequest {
    let heading = heading(group.dimension, &group.key, standup_date);
    NarrativeRequest {
        dimension: group.dimension,
        key: group.key.clone(),
        instruction: instruction(group, &heading),
        context: context(group, window),
        heading,
    }
}

fn instruction(group: &ActivityGroup, heading: &str) -> String {
    let mut text = String::from(
        "You write concise weekly work summaries for a software developer. \
         Only mention work that appears in the activity list. \
         Use '- ' bullets, one per meaningful piece of work, merging related items.\n",
    );

    match group.dimension {
        Dimension::Repository => {
            text.push_str(&format!(
                "Summarize the work done in repository {} as a bulleted list. \
                 Output only the list.\n",
                group.key
            ));
        }
        Dimension::Client => {
            text.push_str(&format!(
                "Write a standup update for the client {}. Begin with the title line \
                 '# {}', then a bulleted list of what was done.\n\
                 If tickets are listed, end with a 'Status suggestions' section holding one \
                 line per ticket whose status should change, formatted exactly \
                 '<ticket id>: <current status> -> <proposed status>'.\n\
                 Title: {}\n",
                group.key, heading, heading
            ));
        }
        Dimension::Ticket => {
            text.push_str(&format!(
                "Summarize the work done on ticket {} as a bulleted list. \
                 If the ticket status should change, add a final line formatted exactly \
                 'Status: <current status> -> <proposed status>'.\n",
                group.key
            ));
        }
    }

    text
}

fn context(group: &ActivityGroup, window: &TimeWindow) -> String {
    let mut text = format!("{} {}, {}\n", group.dimension, group.key, window.label());

    let counts = kind_counts(&group.records);
    let summary: Vec<String> = counts
        .iter()
        .map(|(kind, n)| format!("{} {}", n, plural(*kind, *n)))
        .collect();
    if !summary.is_empty() {
        text.push_str(&summary.join(", "));
        let minutes = total_minutes(&group.records);
        if minutes > 0 {
            text.push_str(&format!(", {} tracked", format_minutes(minutes)));
        }
        text.push('\n');
    }

    text.push('\n');
    for record in &group.records {
        text.push_str(&context_line(record, group.dimension));
        text.push('\n');
    }
    text
}

fn plural(kind: SourceKind, n: usize) -> String {
    match (kind, n) {
        (SourceKind::TimeEntry, 1) => "time entry".to_string(),
        (SourceKind::TimeEntry, _) => "time entries".to_string(),
        (kind, 1) => kind.to_string(),
        (kind, _) => format!("{}s", kind),
    }
}

/// `- [<reference>] <timestamp> (<kind>[, status][, duration]): <description>`
pub fn context_line(record: &ActivityRecord, dimension: Dimension) -> String {
    let reference = match record.kind {
        SourceKind::Commit => {
            let sha = record.short_reference().unwrap_or("-");
            match (dimension, record.project.as_deref()) {
                (Dimension::Repository, _) | (_, None) => sha.to_string(),
                (_, Some(project)) => format!("{}@{}", project, sha),
            }
        }
        SourceKind::Ticket => record.ticket_id.clone().unwrap_or_else(|| "-".to_string()),
        SourceKind::TimeEntry => record
            .ticket_id
            .clone()
            .or_else(|| record.project.clone())
            .unwrap_or_else(|| "-".to_string()),
    };

    let mut details = vec![record.kind.to_string()];
    if let Some(ref status) = record.status {
        details.push(status.clone());
    }
    if let Some(minutes) = record.duration_minutes {
        details.push(format_minutes(minutes));
    }

    format!(
        "- [{}] {} ({}): {}",
        reference,
        record.timestamp.format("%Y-%m-%d %H:%M"),
        details.join(", "),
        record.description.replace('\n', " ")
    )
}
