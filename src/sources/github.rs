//! GitHub commit source.
//!
//! Finds the repositories the actor committed to with the commit search API,
//! then lists the actor's commits per repository. Repositories are never
//! enumerated wholesale.

use crate::error::RecapError;
use crate::http;
use crate::models::{ActivityRecord, Actor, SourceKind, TimeWindow};
use crate::retry::{with_retry, RetryPolicy};
use crate::sources::{FetchOutcome, SourceConnector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "github";
const PER_PAGE: u32 = 100;
/// The search API never returns more than 1000 results.
const SEARCH_RESULT_CAP: u64 = 1000;
const MAX_COMMIT_PAGES: u32 = 10;

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitSearchPage {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    repository: SearchRepository,
}

#[derive(Debug, Deserialize)]
struct SearchRepository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RepoCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    author: Option<CommitSignature>,
    committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

/// Commits authored by the actor on GitHub.
pub struct GitHubCommitConnector {
    client: reqwest::Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
}

impl GitHubCommitConnector {
    pub fn new(
        api_url: &str,
        token: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RecapError> {
        Ok(Self {
            client: http::build_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
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
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
                .query(query)
                .send()
                .await
                .map_err(|e| http::transport_error(SERVICE, e))?;
            let response = http::check_status(SERVICE, response).await?;
            http::decode(SERVICE, response).await
        })
        .await
    }

    async fn resolve_login(&self, actor: &Actor) -> Result<String, RecapError> {
        if let Some(ref login) = actor.github_login {
            return Ok(login.clone());
        }
        let user: GitHubUser = self.get_json("/user", &[]).await?;
        debug!("Resolved GitHub login: {}", user.login);
        Ok(user.login)
    }

    /// Repositories with at least one commit by `login` in the window.
    async fn touched_repositories(
        &self,
        login: &str,
        window: &TimeWindow,
    ) -> Result<BTreeSet<String>, RecapError> {
        let q = search_query(login, window);
        let mut repositories = BTreeSet::new();
        let mut page = 1;

        loop {
            let result: CommitSearchPage = self
                .get_json(
                    "/search/commits",
                    &[
                        ("q", q.clone()),
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            let items = result.items.len();
            repositories.extend(result.items.into_iter().map(|i| i.repository.full_name));

            if search_done(page, items, result.total_count) {
                break;
            }
            page += 1;
        }

        Ok(repositories)
    }

    /// The actor's commits in one repository.
    async fn repository_commits(
        &self,
        repository: &str,
        login: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ActivityRecord>, RecapError> {
        let path = format!("/repos/{}/commits", repository);
        let mut records = Vec::new();

        for page in 1..=MAX_COMMIT_PAGES {
            let commits: Vec<RepoCommit> = self
                .get_json(
                    &path,
                    &[
                        ("author", login.to_string()),
                        ("since", window.start.to_rfc3339()),
                        ("until", window.end.to_rfc3339()),
                        ("per_page", PER_PAGE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            let count = commits.len();
            records.extend(
                commits
                    .into_iter()
                    .filter_map(|c| commit_to_record(repository, c, window)),
            );

            if count < PER_PAGE as usize {
                break;
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for GitHubCommitConnector {
    fn name(&self) -> &str {
        SERVICE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Commit
    }

    async fn fetch(&self, actor: &Actor, window: &TimeWindow) -> Result<FetchOutcome, RecapError> {
        let login = self.resolve_login(actor).await?;
        let repositories = self.touched_repositories(&login, window).await?;
        info!(
            "Found {} repositories with commits by {}",
            repositories.len(),
            login
        );

        let mut outcome = FetchOutcome::default();
        for repository in &repositories {
            debug!("Fetching commits for {}", repository);
            match self.repository_commits(repository, &login, window).await {
                Ok(records) => outcome.records.extend(records),
                Err(e) => {
                    warn!("Skipping {}: {}", repository, e);
                    outcome.warnings.push(format!("{}: {}", repository, e));
                }
            }
        }

        Ok(outcome)
    }
}

/// Commit search query for the window.
fn search_query(login: &str, window: &TimeWindow) -> String {
    format!(
        "author:{} author-date:{}..{}",
        login,
        window.start.format("%Y-%m-%d"),
        window.end.format("%Y-%m-%d")
    )
}

/// Whether the search pagination is exhausted after `page`.
fn search_done(page: u32, items_on_page: usize, total_count: u64) -> bool {
    let seen = u64::from(page) * u64::from(PER_PAGE);
    items_on_page == 0 || seen >= total_count || seen >= SEARCH_RESULT_CAP
}

/// Convert a listed commit, dropping commits outside the window.
fn commit_to_record(
    repository: &str,
    commit: RepoCommit,
    window: &TimeWindow,
) -> Option<ActivityRecord> {
    let date = commit
        .commit
        .author
        .as_ref()
        .and_then(|a| a.date)
        .or_else(|| commit.commit.committer.as_ref().and_then(|c| c.date))?;

    if !window.contains(date) {
        return None;
    }

    Some(ActivityRecord::commit(
        repository,
        commit.sha,
        date,
        first_line(&commit.commit.message),
    ))
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn window() -> TimeWindow {
        TimeWindow::past_days(7, Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_search_query() {
        assert_eq!(
            search_query("octocat", &window()),
            "author:octocat author-date:2026-10-11..2026-10-18"
        );
    }

    #[test]
    fn test_search_pagination() {
        assert!(search_done(1, 0, 0));
        assert!(search_done(1, 42, 42));
        assert!(!search_done(1, 100, 250));
        assert!(!search_done(2, 100, 250));
        assert!(search_done(3, 50, 250));
        assert!(search_done(10, 100, 5000));
    }

    #[test]
    fn test_parse_search_page() {
        let json = r#"{
            "total_count": 2,
            "incomplete_results": false,
            "items": [
                {"sha": "a1", "repository": {"full_name": "acme/api", "url": "https://api.github.com/repos/acme/api"}},
                {"sha": "b2", "repository": {"full_name": "acme/web", "url": "https://api.github.com/repos/acme/web"}}
            ]
        }"#;

        let page: CommitSearchPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items[1].repository.full_name, "acme/web");
    }

    #[test]
    fn test_commit_to_record() {
        let json = r#"[
            {"sha": "0123456789abcdef", "commit": {"message": "Fix token refresh\n\nLonger body", "author": {"name": "Octo", "date": "2026-10-14T09:30:00Z"}}},
            {"sha": "fedcba9876543210", "commit": {"message": "Old work", "author": {"date": "2026-09-01T09:30:00Z"}}},
            {"sha": "aaaaaaaaaaaaaaaa", "commit": {"message": "No author date", "author": null, "committer": {"date": "2026-10-15T10:00:00Z"}}}
        ]"#;

        let commits: Vec<RepoCommit> = serde_json::from_str(json).unwrap();
        let records: Vec<_> = commits
            .into_iter()
            .filter_map(|c| commit_to_record("acme/api", c, &window()))
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].description, "Fix token refresh");
        assert_eq!(records[0].project.as_deref(), Some("acme/api"));
        assert_eq!(records[0].short_reference(), Some("0123456"));
        assert_eq!(records[1].description, "No author date");
    }

    type Params = Query<HashMap<String, String>>;

    fn page_of(params: &HashMap<String, String>) -> u32 {
        params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1)
    }

    fn repo_item(name: &str) -> Value {
        json!({"repository": {"full_name": name}})
    }

    fn commit_json(sha: String, date: &str) -> Value {
        json!({"sha": sha, "commit": {"message": "Routine work", "author": {"date": date}}})
    }

    /// 101 hits over two pages: api and broken on the first, web on the second.
    async fn two_page_search(
        State(calls): State<Arc<AtomicU32>>,
        Query(params): Params,
    ) -> Json<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        let items: Vec<Value> = match page_of(&params) {
            1 => (0..100)
                .map(|i| repo_item(if i == 1 { "acme/broken" } else { "acme/api" }))
                .collect(),
            2 => vec![repo_item("acme/web")],
            _ => Vec::new(),
        };
        Json(json!({"total_count": 101, "items": items}))
    }

    /// Always a full page, far more hits than the API will ever return.
    async fn endless_search(
        State(calls): State<Arc<AtomicU32>>,
        Query(_params): Params,
    ) -> Json<Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        let items: Vec<Value> = (0..100).map(|_| repo_item("acme/api")).collect();
        Json(json!({"total_count": 5000, "items": items}))
    }

    async fn repo_commits(
        Path((_owner, repo)): Path<(String, String)>,
        Query(params): Params,
    ) -> Response {
        match (repo.as_str(), page_of(&params)) {
            ("broken", _) => StatusCode::NOT_FOUND.into_response(),
            ("api", 1) => Json(
                (0..100)
                    .map(|i| commit_json(format!("api{:04}", i), "2026-10-14T09:00:00Z"))
                    .collect::<Vec<_>>(),
            )
            .into_response(),
            ("api", 2) => {
                Json(vec![commit_json("api0100".into(), "2026-10-15T09:00:00Z")]).into_response()
            }
            ("web", 1) => {
                Json(vec![commit_json("web0000".into(), "2026-10-16T09:00:00Z")]).into_response()
            }
            _ => Json(Vec::<Value>::new()).into_response(),
        }
    }

    async fn connector_for(
        search: Router<Arc<AtomicU32>>,
        calls: Arc<AtomicU32>,
    ) -> GitHubCommitConnector {
        let router = search
            .route("/repos/{owner}/{repo}/commits", get(repo_commits))
            .with_state(calls);
        let base = stub::serve(router).await;
        GitHubCommitConnector::new(&base, "token", Duration::from_secs(5), RetryPolicy::none())
            .unwrap()
    }

    fn octocat() -> Actor {
        Actor {
            github_login: Some("octocat".to_string()),
            ..Actor::default()
        }
    }

    #[tokio::test]
    async fn test_failing_repository_becomes_a_warning() {
        let calls = Arc::new(AtomicU32::new(0));
        let search = Router::new().route("/search/commits", get(two_page_search));
        let connector = connector_for(search, calls.clone()).await;

        let outcome = connector.fetch(&octocat(), &window()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("acme/broken: "));

        let api = outcome
            .records
            .iter()
            .filter(|r| r.project.as_deref() == Some("acme/api"))
            .count();
        let web = outcome
            .records
            .iter()
            .filter(|r| r.project.as_deref() == Some("acme/web"))
            .count();
        assert_eq!(api, 101);
        assert_eq!(web, 1);
        assert_eq!(outcome.records.len(), 102);
    }

    #[tokio::test]
    async fn test_search_stops_at_result_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let search = Router::new().route("/search/commits", get(endless_search));
        let connector = connector_for(search, calls.clone()).await;

        let outcome = connector.fetch(&octocat(), &window()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(outcome.records.len(), 101);
        assert!(outcome.warnings.is_empty());
    }
}
