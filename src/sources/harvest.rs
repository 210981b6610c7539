//! Harvest timesheet source.

use crate::error::RecapError;
use crate::http;
use crate::models::{ActivityRecord, Actor, SourceKind, TimeWindow};
use crate::retry::{with_retry, RetryPolicy};
use crate::sources::{FetchOutcome, SourceConnector};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "harvest";
const PER_PAGE: u32 = 100;
const MAX_PAGES: u32 = 50;

#[derive(Debug, Deserialize)]
struct HarvestUser {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TimeEntryPage {
    #[serde(default)]
    time_entries: Vec<TimeEntry>,
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TimeEntry {
    id: u64,
    spent_date: NaiveDate,
    #[serde(default)]
    hours: f64,
    notes: Option<String>,
    project: Option<Named>,
    task: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

/// Time entries logged by the actor.
pub struct HarvestTimesheetConnector {
    client: reqwest::Client,
    api_url: String,
    token: String,
    account_id: String,
    retry: RetryPolicy,
}

impl HarvestTimesheetConnector {
    pub fn new(
        api_url: &str,
        token: &str,
        account_id: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RecapError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            account_id: account_id.to_string(),
            retry,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RecapError> {
        let url = format!("{}{}", self.api_url, path);
        with_retry(&self.retry, SERVICE, || async {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Harvest-Account-Id", &self.account_id)
                .query(query)
                .send()
                .await
                .map_err(|e| http::transport_error(SERVICE, e))?;
            let response = http::check_status(SERVICE, response).await?;
            http::decode(SERVICE, response).await
        })
        .await
    }

    async fn resolve_user(&self, actor: &Actor) -> Result<String, RecapError> {
        if let Some(ref id) = actor.harvest_user_id {
            return Ok(id.clone());
        }
        let user: HarvestUser = self.get_json("/v2/users/me", &[]).await?;
        debug!("Resolved Harvest user id: {}", user.id);
        Ok(user.id.to_string())
    }
}

#[async_trait]
impl SourceConnector for HarvestTimesheetConnector {
    fn name(&self) -> &str {
        SERVICE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::TimeEntry
    }

    async fn fetch(&self, actor: &Actor, window: &TimeWindow) -> Result<FetchOutcome, RecapError> {
        let user_id = self.resolve_user(actor).await?;
        let mut records = Vec::new();
        let mut page = 1;

        for _ in 0..MAX_PAGES {
            let result: TimeEntryPage = self
                .get_json(
                    "/v2/time_entries",
                    &[
                        ("user_id", user_id.clone()),
                        ("from", window.start.format("%Y-%m-%d").to_string()),
                        ("to", window.end.format("%Y-%m-%d").to_string()),
                        ("page", page.to_string()),
                        ("per_page", PER_PAGE.to_string()),
                    ],
                )
                .await?;

            records.extend(result.time_entries.into_iter().map(entry_to_record));

            match result.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        info!("Fetched {} Harvest time entries", records.len());
        Ok(FetchOutcome::new(records))
    }
}

fn entry_to_record(entry: TimeEntry) -> ActivityRecord {
    let timestamp = entry.spent_date.and_time(NaiveTime::MIN).and_utc();
    let minutes = (entry.hours.max(0.0) * 60.0).round() as u32;

    let note = entry
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| entry.task.map(|t| t.name))
        .unwrap_or_default();

    let mut record = ActivityRecord::time_entry(String::new(), minutes, note, timestamp);
    record.project = entry.project.map(|p| p.name).filter(|n| !n.trim().is_empty());
    record.reference = Some(entry.id.to_string());
    record
}
