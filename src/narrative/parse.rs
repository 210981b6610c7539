//! Interpretation of language model output.

use crate::error::RecapError;
use crate::models::{
    ActivityGroup, Dimension, GroupKey, NarrativeRequest, NarrativeResult, StatusSuggestion,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `<ticket>: <current> -> <proposed>`, optionally bulleted or emphasized.
static SUGGESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[-*]\s+)?[`*_]*(?P<id>[A-Za-z0-9][\w#.-]*)[`*_]*\s*:\s*(?P<current>[^\n>]*?)\s*(?:->|→)\s*(?P<proposed>[^\n]+?)\s*$",
    )
    .expect("valid status suggestion regex")
});

/// Turn raw model output into a narrative for `request`.
///
/// An empty answer is an error. Output lacking the expected structure is
/// kept verbatim with a warning.
pub fn parse_narrative(
    request: &NarrativeRequest,
    group: &ActivityGroup,
    raw: &str,
) -> Result<NarrativeResult, RecapError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(RecapError::malformed("llm", "empty response"));
    }

    let mut result = NarrativeResult {
        dimension: request.dimension,
        key: request.key.clone(),
        heading: request.heading.clone(),
        body: text.to_string(),
        structured: false,
        status_suggestions: Vec::new(),
        warnings: Vec::new(),
    };

    let has_bullets = text.lines().any(is_bullet);
    let title_line = text.lines().position(|l| is_title(l, &request.heading));
    let needs_title = request.dimension == Dimension::Client;

    let missing = match (has_bullets, needs_title && title_line.is_none()) {
        (true, false) => None,
        (false, false) => Some("no bulleted list"),
        (true, true) => Some("no title line"),
        (false, true) => Some("no title line or bulleted list"),
    };

    if let Some(missing) = missing {
        result
            .warnings
            .push(format!("unstructured model output ({}); kept raw text", missing));
        return Ok(result);
    }

    result.structured = true;
    result.body = match title_line {
        Some(index) => text
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, l)| l)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        None => text.to_string(),
    };
    result.status_suggestions = extract_suggestions(text, group);

    Ok(result)
}

fn is_bullet(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("- ") || line.starts_with("* ") || line.starts_with("• ")
}

fn is_title(line: &str, heading: &str) -> bool {
    let stripped = line
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim();
    stripped.eq_ignore_ascii_case(heading)
}

/// Status transitions for tickets that are part of the group.
///
/// Unknown tickets and transitions to the current status are dropped.
fn extract_suggestions(text: &str, group: &ActivityGroup) -> Vec<StatusSuggestion> {
    // Canonical ticket id (by lowercase) and its last known status.
    let mut known: BTreeMap<String, (String, Option<String>)> = BTreeMap::new();
    for record in &group.records {
        if let Some(ref id) = record.ticket_id {
            let entry = known
                .entry(id.to_lowercase())
                .or_insert_with(|| (id.clone(), None));
            if record.status.is_some() {
                entry.1 = record.status.clone();
            }
        }
    }

    let mut suggestions: Vec<StatusSuggestion> = Vec::new();
    for captures in suggestion_lines(text, group.dimension)
        .into_iter()
        .filter_map(|l| SUGGESTION.captures(l))
    {
        let mut id = captures["id"].to_string();
        if id.eq_ignore_ascii_case("status") {
            match (&group.dimension, &group.key) {
                (Dimension::Ticket, GroupKey::Named(key)) => id = key.clone(),
                _ => continue,
            }
        }

        let Some((canonical, known_status)) = known.get(&id.to_lowercase()) else {
            continue;
        };

        let proposed = clean(&captures["proposed"]);
        let current = Some(clean(&captures["current"]))
            .filter(|c| !c.is_empty())
            .or_else(|| known_status.clone());

        if proposed.is_empty()
            || current
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(&proposed))
            || suggestions.iter().any(|s| &s.ticket_id == canonical)
        {
            continue;
        }

        suggestions.push(StatusSuggestion {
            ticket_id: canonical.clone(),
            current,
            proposed,
        });
    }

    suggestions
}

/// Where transitions may appear: below the `Status suggestions` header for
/// clients, the final line for tickets. Arrows in ordinary bullets are prose.
fn suggestion_lines(text: &str, dimension: Dimension) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    match dimension {
        Dimension::Client => lines
            .iter()
            .position(|l| is_suggestions_header(l))
            .map(|index| lines[index + 1..].to_vec())
            .unwrap_or_default(),
        Dimension::Ticket => lines.last().copied().into_iter().collect(),
        Dimension::Repository => Vec::new(),
    }
}

fn is_suggestions_header(line: &str) -> bool {
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim_end_matches(':')
        .trim()
        .eq_ignore_ascii_case("status suggestions")
}

fn clean(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| matches!(c, '`' | '*' | '_' | '"' | '\'' | '.'))
        .trim()
        .to_string()
}
