//! Local repository commit source.
//!
//! Walks configured directories for git repositories and reads the actor's
//! commits straight from the object database, matched by author email.

use crate::error::RecapError;
use crate::models::{ActivityRecord, Actor, SourceKind, TimeWindow};
use crate::sources::{FetchOutcome, SourceConnector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Sort};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SERVICE: &str = "local-git";

/// Commits found in repositories on disk.
pub struct LocalGitConnector {
    roots: Vec<PathBuf>,
    max_depth: usize,
    excludes: Vec<String>,
}

impl LocalGitConnector {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize, excludes: Vec<String>) -> Self {
        Self {
            roots,
            max_depth,
            excludes,
        }
    }

    /// Repositories below the configured roots.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                warn!("Local git root does not exist: {}", root.display());
                continue;
            }
            found.extend(discover_repositories(root, self.max_depth, &self.excludes));
        }
        found.sort();
        found.dedup();
        found
    }
}

#[async_trait]
impl SourceConnector for LocalGitConnector {
    fn name(&self) -> &str {
        SERVICE
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Commit
    }

    async fn fetch(&self, actor: &Actor, window: &TimeWindow) -> Result<FetchOutcome, RecapError> {
        let repositories = self.discover();
        info!("Found {} local repositories", repositories.len());

        let emails: Vec<String> = actor.emails.iter().map(|e| e.to_lowercase()).collect();
        let window = *window;

        tokio::task::spawn_blocking(move || {
            let mut outcome = FetchOutcome::default();
            for path in &repositories {
                match read_commits(path, &emails, &window) {
                    Ok(records) => {
                        debug!("{}: {} commits", path.display(), records.len());
                        outcome.records.extend(records);
                    }
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        outcome.warnings.push(format!("{}: {}", path.display(), e));
                    }
                }
            }
            outcome
        })
        .await
        .map_err(|e| RecapError::upstream(SERVICE, format!("reader task failed: {}", e)))
    }
}

/// Directories containing a `.git` entry, at most `max_depth` below `root`.
fn discover_repositories(root: &Path, max_depth: usize, excludes: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root).max_depth(max_depth).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Cannot read directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if entry.depth() > 0 && (name.starts_with('.') || excludes.iter().any(|x| *x == name)) {
            walker.skip_current_dir();
            continue;
        }

        if entry.path().join(".git").exists() {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    found
}

/// The actor's commits on every local branch of one repository.
fn read_commits(
    path: &Path,
    emails: &[String],
    window: &TimeWindow,
) -> Result<Vec<ActivityRecord>, RecapError> {
    let git_err = |e: git2::Error| RecapError::upstream(SERVICE, e.message().to_string());

    let repo = Repository::open(path).map_err(git_err)?;
    let name = repository_name(&repo, path);

    let mut revwalk = repo.revwalk().map_err(git_err)?;
    revwalk.set_sorting(Sort::TIME).map_err(git_err)?;
    if let Err(e) = revwalk.push_glob("refs/heads/*") {
        // Freshly initialised repositories have no branches yet.
        debug!("{}: no branches to walk: {}", name, e.message());
        return Ok(Vec::new());
    }

    let mut seen: HashSet<Oid> = HashSet::new();
    let mut records = Vec::new();

    for oid in revwalk {
        let oid = oid.map_err(git_err)?;
        if !seen.insert(oid) {
            continue;
        }
        let commit = repo.find_commit(oid).map_err(git_err)?;

        // Walk is newest-first by committer time.
        if epoch(commit.time().seconds()).is_some_and(|t| t < window.start) {
            break;
        }

        let author = commit.author();
        let matches = author
            .email()
            .is_some_and(|email| emails.iter().any(|e| e.eq_ignore_ascii_case(email)));
        if !matches {
            continue;
        }

        let Some(when) = epoch(author.when().seconds()) else {
            continue;
        };
        if !window.contains(when) {
            continue;
        }

        let summary = commit.summary().unwrap_or("").trim().to_string();
        records.push(
            ActivityRecord::commit(name.as_str(), oid.to_string(), when, summary)
                .with_source(SERVICE),
        );
    }

    Ok(records)
}

fn epoch(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

/// `owner/repo` from the origin remote, or the directory name.
fn repository_name(repo: &Repository, path: &Path) -> String {
    let from_remote = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().and_then(parse_github_url))
        .map(|(owner, name)| format!("{}/{}", owner, name));

    from_remote.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    })
}

/// Parse a GitHub URL to extract owner and repo name.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let url = url.trim_end_matches('/').trim_end_matches(".git");

    let rest = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
        .or_else(|| url.strip_prefix("git@github.com:"))?;

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        Some((parts[0].to_string(), parts[1].to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
    }

    fn commit(repo: &Repository, email: &str, when: DateTime<Utc>, message: &str) {
        let sig = Signature::new("Dev", email, &Time::new(when.timestamp(), 0)).unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    #[test]
    fn test_parse_github_url_https() {
        let result = parse_github_url("https://github.com/rust-lang/rust");
        assert_eq!(result, Some(("rust-lang".to_string(), "rust".to_string())));
    }

    #[test]
    fn test_parse_github_url_https_with_git() {
        let result = parse_github_url("https://github.com/rust-lang/rust.git");
        assert_eq!(result, Some(("rust-lang".to_string(), "rust".to_string())));
    }

    #[test]
    fn test_parse_github_url_ssh() {
        let result = parse_github_url("git@github.com:rust-lang/rust");
        assert_eq!(result, Some(("rust-lang".to_string(), "rust".to_string())));
    }

    #[test]
    fn test_parse_github_url_invalid() {
        assert_eq!(parse_github_url("https://gitlab.com/user/repo"), None);
        assert_eq!(parse_github_url("https://github.com/user"), None);
    }

    #[test]
    fn test_discover_skips_excluded_and_hidden() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        Repository::init(root.join("api")).unwrap();
        Repository::init(root.join("clients/web")).unwrap();
        Repository::init(root.join("node_modules/dep")).unwrap();
        Repository::init(root.join(".cache/tool")).unwrap();

        let excludes = vec!["node_modules".to_string()];
        let mut found: Vec<_> = discover_repositories(root, 3, &excludes)
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        found.sort();

        assert_eq!(
            found,
            vec![PathBuf::from("api"), PathBuf::from("clients/web")]
        );
    }

    #[test]
    fn test_read_commits_filters_author_and_window() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init(temp.path().join("api")).unwrap();
        commit(&repo, "dev@example.com", at(2, 9), "Too old");
        commit(&repo, "other@example.com", at(12, 9), "Someone else");
        commit(&repo, "Dev@Example.com", at(13, 9), "Add rate limiter\n\nDetails");
        commit(&repo, "dev@example.com", at(14, 9), "Fix flaky test");

        let window = TimeWindow::past_days(7, at(18, 0));
        let emails = vec!["dev@example.com".to_string()];
        let mut records = read_commits(&temp.path().join("api"), &emails, &window).unwrap();
        records.sort_by_key(|r| r.timestamp);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].description, "Add rate limiter");
        assert_eq!(records[1].description, "Fix flaky test");
        assert_eq!(records[0].project.as_deref(), Some("api"));
        assert_eq!(records[0].source, "local-git");
    }

    #[test]
    fn test_repository_name_from_origin() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init(temp.path().join("checkout")).unwrap();
        repo.remote("origin", "git@github.com:acme/api.git").unwrap();

        assert_eq!(
            repository_name(&repo, &temp.path().join("checkout")),
            "acme/api"
        );
    }

    #[tokio::test]
    async fn test_fetch_with_no_repositories() {
        let temp = TempDir::new().unwrap();
        let connector = LocalGitConnector::new(vec![temp.path().to_path_buf()], 3, Vec::new());
        let actor = Actor {
            emails: vec!["dev@example.com".to_string()],
            ..Actor::default()
        };

        let outcome = connector
            .fetch(&actor, &TimeWindow::past_days(7, at(18, 0)))
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert!(outcome.warnings.is_empty());
    }
}
