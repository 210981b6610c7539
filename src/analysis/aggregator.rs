//! Activity aggregation and grouping.
//!
//! This module buckets activity records by repository, ticket or client and
//! computes the per-group statistics shown in the run report.

use crate::analysis::lookup::ClientLookup;
use crate::models::{
    ActivityGroup, ActivityRecord, Dimension, GroupKey, SourceKind, UngroupedRecord,
};
use regex::Regex;
use std::collections::BTreeMap;

/// A record plus its position in the original input, used as the final
/// ordering tie-breaker.
#[derive(Debug, Clone)]
struct Entry {
    seq: usize,
    record: ActivityRecord,
}

/// Records grouped under one dimension.
///
/// Every input record is held exactly once: either in a named group or in
/// the ungrouped bucket together with the reason it could not be keyed.
#[derive(Debug, Clone)]
pub struct Aggregation {
    dimension: Dimension,
    groups: BTreeMap<GroupKey, Vec<Entry>>,
    ungrouped: Vec<(Entry, String)>,
}

impl Aggregation {
    fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            groups: BTreeMap::new(),
            ungrouped: Vec::new(),
        }
    }

    fn sort(&mut self) {
        for entries in self.groups.values_mut() {
            entries.sort_by(chronological);
        }
        self.ungrouped.sort_by(|a, b| chronological(&a.0, &b.0));
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Named groups in key order, followed by the ungrouped bucket when it
    /// is not empty.
    pub fn groups(&self) -> Vec<ActivityGroup> {
        let mut groups: Vec<ActivityGroup> = self
            .groups
            .iter()
            .map(|(key, entries)| ActivityGroup {
                dimension: self.dimension,
                key: key.clone(),
                records: entries.iter().map(|e| e.record.clone()).collect(),
            })
            .collect();

        if !self.ungrouped.is_empty() {
            groups.push(ActivityGroup {
                dimension: self.dimension,
                key: GroupKey::Ungrouped,
                records: self.ungrouped.iter().map(|(e, _)| e.record.clone()).collect(),
            });
        }

        groups
    }

    /// Records of one named group.
    pub fn get(&self, key: &str) -> Option<Vec<&ActivityRecord>> {
        self.groups
            .get(&GroupKey::named(key))
            .map(|entries| entries.iter().map(|e| &e.record).collect())
    }

    /// Every ungrouped record with the reason it was not keyed.
    pub fn ungrouped_records(&self) -> Vec<UngroupedRecord> {
        self.ungrouped
            .iter()
            .map(|(entry, reason)| UngroupedRecord {
                dimension: self.dimension,
                kind: entry.record.kind,
                timestamp: entry.record.timestamp,
                description: entry.record.description.clone(),
                reason: reason.clone(),
            })
            .collect()
    }

    /// Number of named groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of records across all groups, ungrouped included.
    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum::<usize>() + self.ungrouped.len()
    }
}

fn chronological(a: &Entry, b: &Entry) -> std::cmp::Ordering {
    a.record
        .timestamp
        .cmp(&b.record.timestamp)
        .then_with(|| a.record.kind.cmp(&b.record.kind))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Derive the direct group key of a record, or the reason there is none.
fn direct_key(record: &ActivityRecord, dimension: Dimension) -> Result<String, &'static str> {
    let key = match dimension {
        Dimension::Repository => record.project.as_deref().ok_or("no repository or project")?,
        Dimension::Ticket => record.ticket_id.as_deref().ok_or("no ticket id")?,
        Dimension::Client => return Err("no client mapping"),
    };

    let key = key.trim();
    if key.is_empty() {
        return Err(match dimension {
            Dimension::Ticket => "no ticket id",
            _ => "no repository or project",
        });
    }
    Ok(key.to_string())
}

/// Group records by a field they carry directly (repository/project or
/// ticket id) in a single pass.
///
/// Clients are not a record field; use [`aggregate`] or
/// [`regroup_by_client`] for them.
pub fn group_records(records: &[ActivityRecord], dimension: Dimension) -> Aggregation {
    let mut aggregation = Aggregation::new(dimension);

    for (seq, record) in records.iter().enumerate() {
        let entry = Entry {
            seq,
            record: record.clone(),
        };
        match direct_key(record, dimension) {
            Ok(key) => aggregation
                .groups
                .entry(GroupKey::Named(key))
                .or_default()
                .push(entry),
            Err(reason) => aggregation.ungrouped.push((entry, reason.to_string())),
        }
    }

    aggregation.sort();
    aggregation
}

/// Compose a repository/project aggregation into client groups.
///
/// Each group key is resolved through `lookup`. Groups without a mapping,
/// and records the input could not key, end up in the ungrouped bucket.
pub fn regroup_by_client(input: &Aggregation, lookup: &ClientLookup) -> Aggregation {
    let mut aggregation = Aggregation::new(Dimension::Client);

    for (key, entries) in &input.groups {
        let name = key.to_string();
        match lookup.resolve(&name) {
            Some(client) => aggregation
                .groups
                .entry(GroupKey::named(client))
                .or_default()
                .extend(entries.iter().cloned()),
            None => {
                let reason = format!("no client mapping for {} '{}'", input.dimension, name);
                aggregation
                    .ungrouped
                    .extend(entries.iter().cloned().map(|e| (e, reason.clone())));
            }
        }
    }

    aggregation.ungrouped.extend(input.ungrouped.iter().cloned());
    aggregation.sort();
    aggregation
}

/// Group records under `dimension`, composing through the client lookup for
/// [`Dimension::Client`].
pub fn aggregate(
    records: &[ActivityRecord],
    dimension: Dimension,
    lookup: &ClientLookup,
) -> Aggregation {
    match dimension {
        Dimension::Client => {
            regroup_by_client(&group_records(records, Dimension::Repository), lookup)
        }
        direct => group_records(records, direct),
    }
}

/// Attach ticket ids mentioned in commit messages and timesheet notes.
///
/// Returns the number of records tagged.
pub fn tag_ticket_refs(records: &mut [ActivityRecord], pattern: &Regex) -> usize {
    let mut tagged = 0;

    for record in records.iter_mut() {
        if record.ticket_id.is_some() || record.kind == SourceKind::Ticket {
            continue;
        }
        if let Some(found) = pattern.find(&record.description) {
            record.ticket_id = Some(found.as_str().to_string());
            tagged += 1;
        }
    }

    tagged
}

/// Count records per source kind.
pub fn kind_counts(records: &[ActivityRecord]) -> BTreeMap<SourceKind, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.kind).or_default() += 1;
    }
    counts
}

/// Sum of tracked minutes.
pub fn total_minutes(records: &[ActivityRecord]) -> u32 {
    records.iter().filter_map(|r| r.duration_minutes).sum()
}

/// Formats minutes as `3h 05m`.
pub fn format_minutes(minutes: u32) -> String {
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
