//! Publishing narratives to documents.
//!
//! Each narrative becomes one section of a destination document. A section
//! whose heading is already present is not written again, so re-running a
//! week is harmless.

pub mod clickup;
pub mod markdown;

use crate::config::{Config, PublishBackend};
use crate::error::RecapError;
use crate::models::{Dimension, GroupKey, GroupStatus, NarrativeResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use clickup::{ClickUpDocStore, ClickUpTicketStatus};
pub use markdown::MarkdownDocumentStore;

/// A store of documents that sections can be appended to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current content. A document that does not exist yet reads as empty.
    async fn read(&self, document: &str) -> Result<String, RecapError>;

    /// Append a section at the end of the document.
    async fn append_section(
        &self,
        document: &str,
        heading: &str,
        body: &str,
    ) -> Result<(), RecapError>;

    /// Human-readable location of a document.
    fn describe(&self, document: &str) -> String;
}

/// Where ticket statuses are changed.
#[async_trait]
pub trait TicketStatusStore: Send + Sync {
    async fn set_status(&self, ticket_id: &str, status: &str) -> Result<(), RecapError>;
}

/// Whether `content` already has a markdown heading equal to `heading`.
pub fn has_section(content: &str, heading: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim();
        line.starts_with('#') && line.trim_start_matches('#').trim() == heading.trim()
    })
}

/// Markdown for one section.
pub fn render_section(heading: &str, body: &str) -> String {
    format!("## {}\n\n{}\n", heading.trim(), body.trim())
}

/// Resolved target of one narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub document: String,
    pub heading: String,
}

/// What publishing one narrative did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub status: GroupStatus,
    /// Tickets whose status was changed.
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
}

/// Writes narratives to their destination documents.
pub struct Publisher {
    store: Arc<dyn DocumentStore>,
    statuses: Option<Arc<dyn TicketStatusStore>>,
    default_document: Option<String>,
    client_documents: BTreeMap<String, String>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(store: Arc<dyn DocumentStore>, default_document: Option<String>) -> Self {
        Self {
            store,
            statuses: None,
            default_document,
            client_documents: BTreeMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply suggested ticket statuses after publishing.
    pub fn with_status_store(mut self, statuses: Arc<dyn TicketStatusStore>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_client_document(mut self, client: &str, document: &str) -> Self {
        self.client_documents
            .insert(client.to_string(), document.to_string());
        self
    }

    /// Build the publisher for the configured backend.
    ///
    /// Returns `Ok(None)` when the backend cannot be used (ClickUp without a
    /// token or workspace); the caller reports groups as generated.
    pub fn from_config(
        config: &Config,
        clickup: Option<crate::sources::ClickUpApi>,
    ) -> Result<Option<Self>, RecapError> {
        let default_document = config.publish.default_document.clone();

        let mut publisher = match config.publish.backend {
            PublishBackend::Markdown => Self::new(
                Arc::new(MarkdownDocumentStore::new(config.publish.directory.clone())),
                default_document,
            ),
            PublishBackend::Clickup => {
                let (Some(api), Some(team_id)) = (clickup.clone(), config.clickup.team_id.clone())
                else {
                    warn!("ClickUp publishing needs a token and [clickup] team_id");
                    return Ok(None);
                };
                Self::new(
                    Arc::new(ClickUpDocStore::new(api, &team_id)),
                    default_document,
                )
            }
        };

        for (client, settings) in &config.clients {
            if let Some(ref document) = settings.document {
                publisher = publisher.with_client_document(client, document);
            }
        }

        if config.publish.apply_status_suggestions {
            match (clickup, config.clickup.team_id.as_deref()) {
                (Some(api), Some(team_id)) => {
                    publisher =
                        publisher.with_status_store(Arc::new(ClickUpTicketStatus::new(api, team_id)))
                }
                _ => warn!("Status suggestions cannot be applied without ClickUp access"),
            }
        }

        Ok(Some(publisher))
    }

    /// Destination of a narrative, if any.
    ///
    /// Clients publish to their own document. Everything else, and clients
    /// without one, go to the default document; client sections there are
    /// prefixed with the client name so they stay distinct.
    pub fn destination(&self, result: &NarrativeResult) -> Option<Destination> {
        let client = match (result.dimension, &result.key) {
            (Dimension::Client, GroupKey::Named(name)) => Some(name.as_str()),
            _ => None,
        };

        if let Some(document) = client.and_then(|c| self.client_documents.get(c)) {
            return Some(Destination {
                document: document.clone(),
                heading: result.heading.clone(),
            });
        }

        let document = self.default_document.clone()?;
        let heading = match client {
            Some(name) => format!("{}: {}", name, result.heading),
            None => result.heading.clone(),
        };
        Some(Destination { document, heading })
    }

    pub fn describe(&self, destination: &Destination) -> String {
        self.store.describe(&destination.document)
    }

    /// Keyed on the described location: distinct ids may name one file.
    async fn lock_for(&self, location: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(location.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append the narrative unless its section already exists.
    ///
    /// Writes to one document are serialized; different documents proceed
    /// independently.
    pub async fn publish(
        &self,
        result: &NarrativeResult,
        destination: &Destination,
    ) -> Result<PublishReceipt, RecapError> {
        let described = self.store.describe(&destination.document);
        let lock = self.lock_for(&described).await;
        let _guard = lock.lock().await;

        let content = self.store.read(&destination.document).await?;
        if has_section(&content, &destination.heading) {
            info!("'{}' already in {}", destination.heading, described);
            return Ok(PublishReceipt {
                status: GroupStatus::AlreadyPublished {
                    destination: described,
                },
                applied: Vec::new(),
                warnings: Vec::new(),
            });
        }

        self.store
            .append_section(&destination.document, &destination.heading, &result.body)
            .await?;
        info!("Published '{}' to {}", destination.heading, described);

        let mut receipt = PublishReceipt {
            status: GroupStatus::Published {
                destination: described,
            },
            applied: Vec::new(),
            warnings: Vec::new(),
        };

        if let Some(ref statuses) = self.statuses {
            for suggestion in &result.status_suggestions {
                match statuses
                    .set_status(&suggestion.ticket_id, &suggestion.proposed)
                    .await
                {
                    Ok(()) => {
                        debug!("Applied {}", suggestion);
                        receipt.applied.push(suggestion.ticket_id.clone());
                    }
                    Err(e) => {
                        warn!("Could not apply {}: {}", suggestion, e);
                        receipt
                            .warnings
                            .push(format!("status update {} failed: {}", suggestion, e));
                    }
                }
            }
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusSuggestion;

    /// Documents kept in memory.
    #[derive(Default)]
    struct MemoryStore {
        docs: Mutex<HashMap<String, String>>,
        reject: bool,
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn read(&self, document: &str) -> Result<String, RecapError> {
            Ok(self
                .docs
                .lock()
                .await
                .get(document)
                .cloned()
                .unwrap_or_default())
        }

        async fn append_section(
            &self,
            document: &str,
            heading: &str,
            body: &str,
        ) -> Result<(), RecapError> {
            if self.reject {
                return Err(RecapError::rejected(document, "read-only"));
            }
            // Yield between read and write to expose missing locking.
            tokio::task::yield_now().await;
            let mut docs = self.docs.lock().await;
            docs.entry(document.to_string())
                .or_default()
                .push_str(&render_section(heading, body));
            Ok(())
        }

        fn describe(&self, document: &str) -> String {
            format!("memory:{}", document)
        }
    }

    #[derive(Default)]
    struct RecordingStatuses {
        applied: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TicketStatusStore for RecordingStatuses {
        async fn set_status(&self, ticket_id: &str, status: &str) -> Result<(), RecapError> {
            if ticket_id == "DEV-404" {
                return Err(RecapError::rejected(ticket_id, "HTTP 404"));
            }
            self.applied
                .lock()
                .await
                .push((ticket_id.to_string(), status.to_string()));
            Ok(())
        }
    }

    fn narrative(dimension: Dimension, key: &str, heading: &str) -> NarrativeResult {
        NarrativeResult {
            dimension,
            key: GroupKey::named(key),
            heading: heading.to_string(),
            body: "- Did the work".to_string(),
            structured: true,
            status_suggestions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_has_section() {
        let doc = "# Notes\n\n## api updates for 2026-10-19\n\n- x\n";
        assert!(has_section(doc, "api updates for 2026-10-19"));
        assert!(!has_section(doc, "web updates for 2026-10-19"));
        assert!(!has_section("api updates for 2026-10-19", "api updates for 2026-10-19"));
    }

    #[test]
    fn test_destination_resolution() {
        let store = Arc::new(MemoryStore::default());
        let publisher = Publisher::new(store, Some("weekly".to_string()))
            .with_client_document("Acme", "acme-standup");

        let acme = narrative(Dimension::Client, "Acme", "Updates for 2026-10-19 standup");
        assert_eq!(
            publisher.destination(&acme),
            Some(Destination {
                document: "acme-standup".to_string(),
                heading: "Updates for 2026-10-19 standup".to_string(),
            })
        );

        let globex = narrative(Dimension::Client, "Globex", "Updates for 2026-10-19 standup");
        assert_eq!(
            publisher.destination(&globex).unwrap().heading,
            "Globex: Updates for 2026-10-19 standup"
        );

        let repo = narrative(Dimension::Repository, "api", "api updates for 2026-10-19");
        assert_eq!(publisher.destination(&repo).unwrap().document, "weekly");

        let nowhere = Publisher::new(Arc::new(MemoryStore::default()), None);
        assert_eq!(nowhere.destination(&repo), None);
    }

    #[tokio::test]
    async fn test_publishing_twice_yields_one_section() {
        let store = Arc::new(MemoryStore::default());
        let publisher = Publisher::new(store.clone(), Some("weekly".to_string()));
        let result = narrative(Dimension::Repository, "api", "api updates for 2026-10-19");
        let destination = publisher.destination(&result).unwrap();

        let first = publisher.publish(&result, &destination).await.unwrap();
        let second = publisher.publish(&result, &destination).await.unwrap();

        assert!(matches!(first.status, GroupStatus::Published { .. }));
        assert_eq!(
            second.status,
            GroupStatus::AlreadyPublished {
                destination: "memory:weekly".to_string()
            }
        );
        let doc = store.read("weekly").await.unwrap();
        assert_eq!(doc.matches("## api updates for 2026-10-19").count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_to_one_document() {
        let store = Arc::new(MemoryStore::default());
        let publisher = Publisher::new(store.clone(), Some("weekly".to_string()));
        let api = narrative(Dimension::Repository, "api", "api updates for 2026-10-19");
        let dest = publisher.destination(&api).unwrap();

        let (a, b) = tokio::join!(
            publisher.publish(&api, &dest),
            publisher.publish(&api, &dest)
        );
        let statuses = [a.unwrap().status, b.unwrap().status];
        assert_eq!(
            statuses
                .iter()
                .filter(|s| matches!(s, GroupStatus::Published { .. }))
                .count(),
            1
        );
        let doc = store.read("weekly").await.unwrap();
        assert_eq!(doc.matches("## api updates").count(), 1);
    }

    #[tokio::test]
    async fn test_ids_naming_one_file_share_a_lock() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MarkdownDocumentStore::new(temp.path().to_path_buf()));
        let publisher = Publisher::new(store.clone(), None);
        let result = narrative(Dimension::Repository, "api", "api updates for 2026-10-19");
        let spaced = Destination {
            document: "Acme Standup".to_string(),
            heading: result.heading.clone(),
        };
        let dashed = Destination {
            document: "Acme-Standup".to_string(),
            heading: result.heading.clone(),
        };

        let (a, b) = tokio::join!(
            publisher.publish(&result, &spaced),
            publisher.publish(&result, &dashed)
        );
        a.unwrap();
        b.unwrap();

        let doc = store.read("Acme-Standup").await.unwrap();
        assert_eq!(doc.matches("## api updates for 2026-10-19").count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_write_is_an_error() {
        let store = Arc::new(MemoryStore {
            reject: true,
            ..MemoryStore::default()
        });
        let publisher = Publisher::new(store, Some("weekly".to_string()));
        let result = narrative(Dimension::Repository, "api", "api updates for 2026-10-19");
        let destination = publisher.destination(&result).unwrap();

        let err = publisher.publish(&result, &destination).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PublishRejected);
    }

    #[tokio::test]
    async fn test_status_suggestions_applied_after_publish() {
        let statuses = Arc::new(RecordingStatuses::default());
        let publisher = Publisher::new(Arc::new(MemoryStore::default()), Some("weekly".into()))
            .with_status_store(statuses.clone());

        let mut result = narrative(Dimension::Ticket, "DEV-4", "Ticket DEV-4 updates for 2026-10-19");
        result.status_suggestions = vec![
            StatusSuggestion {
                ticket_id: "DEV-4".to_string(),
                current: Some("in progress".to_string()),
                proposed: "review".to_string(),
            },
            StatusSuggestion {
                ticket_id: "DEV-404".to_string(),
                current: None,
                proposed: "done".to_string(),
            },
        ];
        let destination = publisher.destination(&result).unwrap();

        let receipt = publisher.publish(&result, &destination).await.unwrap();
        assert_eq!(receipt.applied, vec!["DEV-4"]);
        assert_eq!(receipt.warnings.len(), 1);
        assert_eq!(
            *statuses.applied.lock().await,
            vec![("DEV-4".to_string(), "review".to_string())]
        );
    }
}
