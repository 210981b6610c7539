//! ClickUp Docs pages and task statuses.

use crate::error::RecapError;
use crate::publish::{render_section, DocumentStore, TicketStatusStore};
use crate::sources::ClickUpApi;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PageEdit<'a> {
    content: &'a str,
    content_edit_mode: &'a str,
    content_format: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
}

/// ClickUp Docs pages addressed as `docId/pageId`.
pub struct ClickUpDocStore {
    api: ClickUpApi,
    workspace_id: String,
}

impl ClickUpDocStore {
    pub fn new(api: ClickUpApi, workspace_id: &str) -> Self {
        Self {
            api,
            workspace_id: workspace_id.to_string(),
        }
    }

    fn page_path(&self, document: &str) -> Result<String, RecapError> {
        let (doc, page) = split_document_id(document).ok_or_else(|| {
            RecapError::rejected(
                self.describe(document),
                "expected a ClickUp document id of the form docId/pageId",
            )
        })?;
        Ok(format!(
            "/api/v3/workspaces/{}/docs/{}/pages/{}",
            self.workspace_id, doc, page
        ))
    }
}

fn split_document_id(document: &str) -> Option<(&str, &str)> {
    let (doc, page) = document.trim().split_once('/')?;
    if doc.is_empty() || page.is_empty() || page.contains('/') {
        return None;
    }
    Some((doc, page))
}

#[async_trait]
impl DocumentStore for ClickUpDocStore {
    async fn read(&self, document: &str) -> Result<String, RecapError> {
        let path = self.page_path(document)?;
        let page: PageResponse = self
            .api
            .get_json(&path, &[("content_format", "text/md".to_string())])
            .await?;
        Ok(page.content)
    }

    async fn append_section(
        &self,
        document: &str,
        heading: &str,
        body: &str,
    ) -> Result<(), RecapError> {
        let path = self.page_path(document)?;
        let content = format!("\n{}", render_section(heading, body));
        let edit = PageEdit {
            content: &content,
            content_edit_mode: "append",
            content_format: "text/md",
        };
        self.api
            .put_json_once(&self.describe(document), &path, &[], &edit)
            .await
    }

    fn describe(&self, document: &str) -> String {
        format!("clickup doc {}", document)
    }
}

/// Task status updates through the ClickUp task API.
pub struct ClickUpTicketStatus {
    api: ClickUpApi,
    team_id: String,
}

impl ClickUpTicketStatus {
    pub fn new(api: ClickUpApi, team_id: &str) -> Self {
        Self {
            api,
            team_id: team_id.to_string(),
        }
    }
}

/// Custom task ids (`DEV-42`) need the workspace to be resolved.
fn status_query(ticket_id: &str, team_id: &str) -> Vec<(&'static str, String)> {
    if ticket_id.contains('-') {
        vec![
            ("custom_task_ids", "true".to_string()),
            ("team_id", team_id.to_string()),
        ]
    } else {
        Vec::new()
    }
}

#[async_trait]
impl TicketStatusStore for ClickUpTicketStatus {
    async fn set_status(&self, ticket_id: &str, status: &str) -> Result<(), RecapError> {
        let path = format!("/api/v2/task/{}", ticket_id);
        let query = status_query(ticket_id, &self.team_id);
        self.api
            .put_json(
                &format!("clickup task {}", ticket_id),
                &path,
                &query,
                &StatusUpdate { status },
            )
            .await
    }
}
