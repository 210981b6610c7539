//! ClickUp ticket source, plus the API client shared with the ClickUp
//! document and status publishers.

use crate::error::RecapError;
use crate::http;
use crate::models::{ActivityRecord, Actor, SourceKind, TimeWindow};
use crate::retry::{with_retry, RetryPolicy};
use crate::sources::{FetchOutcome, SourceConnector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "clickup";
/// Guards against an API that never reports its last page.
const MAX_PAGES: u32 = 50;

/// Authenticated access to the ClickUp REST API.
#[derive(Clone)]
pub struct ClickUpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl ClickUpApi {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RecapError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RecapError> {
        let url = format!("{}{}", self.base_url, path);
        with_retry(&self.retry, SERVICE, || async {
            let response = self
                .client
                .get(&url)
                .header("Authorization", &self.token)
                .query(query)
                .send()
                .await
                .map_err(|e| http::transport_error(SERVICE, e))?;
            let response = http::check_status(SERVICE, response).await?;
            http::decode(SERVICE, response).await
        })
        .await
    }

    /// PUT a JSON body, retrying transient failures. Errors are attributed
    /// to `destination`. Only for idempotent writes.
    pub async fn put_json<B: Serialize + Sync>(
        &self,
        destination: &str,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<(), RecapError> {
        let url = format!("{}{}", self.base_url, path);
        with_retry(&self.retry, destination, || {
            self.put_once(destination, &url, query, body)
        })
        .await
    }

    /// PUT a JSON body exactly once. A failed attempt may still have been
    /// applied, so appends are never replayed.
    pub async fn put_json_once<B: Serialize + Sync>(
        &self,
        destination: &str,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<(), RecapError> {
        let url = format!("{}{}", self.base_url, path);
        self.put_once(destination, &url, query, body).await
    }

    async fn put_once<B: Serialize + Sync>(
        &self,
        destination: &str,
        url: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<(), RecapError> {
        let response = self
            .client
            .put(url)
            .header("Authorization", &self.token)
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(|e| http::transport_error(destination, e))?;
        http::check_write_status(destination, response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: ClickUpUser,
}

#[derive(Debug, Deserialize)]
struct ClickUpUser {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default = "default_last_page")]
    last_page: bool,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Task {
    id: String,
    custom_id: Option<String>,
    #[serde(default)]
    name: String,
    status: Option<TaskStatus>,
    date_created: Option<String>,
    date_updated: Option<String>,
    url: Option<String>,
    list: Option<Container>,
    folder: Option<Container>,
    project: Option<Container>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct Container {
    name: Option<String>,
    #[serde(default)]
    hidden: bool,
}

impl Container {
    fn visible_name(&self) -> Option<&str> {
        match self.name.as_deref() {
            Some(name) if !self.hidden && !name.trim().is_empty() && name != "hidden" => {
                Some(name)
            }
            _ => None,
        }
    }
}

/// Tickets assigned to the actor in one ClickUp workspace.
pub struct ClickUpTicketConnector {
    api: ClickUpApi,
    team_id: String,
    only_updated_in_window: bool,
}

impl ClickUpTicketConnector {
    pub fn new(api: ClickUpApi, team_id: &str, only_updated_in_window: bool) -> Self {
        Self {
            api,
            team_id: team_id.to_string(),
            only_updated_in_window,
        }
    }

    async fn resolve_user(&self, actor: &Actor) -> Result<String, RecapError> {
        if let Some(ref id) = actor.clickup_user_id {
            return Ok(id.clone());
        }
        let envelope: UserEnvelope = self.api.get_json("/api/v2/user", &[]).await?;
        debug!("Resolved ClickUp user id: {}", envelope.user.id);
        Ok(envelope.user.id.to_string())
    }
}

#[async_trait]
impl SourceConnector for ClickUpTicketConnector {
    fn name(&self) -> &str {
        SERVICE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Ticket
    }

    async fn fetch(&self, actor: &Actor, window: &TimeWindow) -> Result<FetchOutcome, RecapError> {
        let user_id = self.resolve_user(actor).await?;
        let path = format!("/api/v2/team/{}/task", self.team_id);
        let mut records = Vec::new();

        for page in 0..MAX_PAGES {
            let mut query = vec![
                ("assignees[]", user_id.clone()),
                ("include_closed", "true".to_string()),
                ("subtasks", "true".to_string()),
                ("page", page.to_string()),
            ];
            if self.only_updated_in_window {
                query.push(("date_updated_gt", window.start.timestamp_millis().to_string()));
            }

            let result: TaskPage = self.api.get_json(&path, &query).await?;
            let empty = result.tasks.is_empty();
            records.extend(result.tasks.into_iter().filter_map(|task| {
                let record = task_to_record(task, window);
                match self.only_updated_in_window {
                    true if !window.contains(record.timestamp) => None,
                    _ => Some(record),
                }
            }));

            if result.last_page || empty {
                break;
            }
        }

        info!("Fetched {} ClickUp tickets", records.len());
        Ok(FetchOutcome::new(records))
    }
}

fn task_to_record(task: Task, window: &TimeWindow) -> ActivityRecord {
    let timestamp = parse_millis(task.date_updated.as_deref())
        .or_else(|| parse_millis(task.date_created.as_deref()))
        .unwrap_or(window.end);

    let project = [&task.project, &task.folder, &task.list]
        .into_iter()
        .flatten()
        .find_map(Container::visible_name)
        .map(String::from);

    let status = task
        .status
        .map(|s| s.status)
        .unwrap_or_else(|| "unknown".to_string());

    let ticket_id = task
        .custom_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(task.id);

    let mut record = ActivityRecord::ticket(ticket_id, task.name, status, project, timestamp);
    record.reference = task.url;
    record
}

/// ClickUp timestamps are millisecond strings.
fn parse_millis(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
