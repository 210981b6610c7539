//! Repository/project to client lookup.

use crate::config::ClientConfig;
use std::collections::BTreeMap;
use tracing::warn;

/// Explicit mapping from repository or project names to client names.
#[derive(Debug, Clone, Default)]
pub struct ClientLookup {
    exact: BTreeMap<String, String>,
    folded: BTreeMap<String, String>,
}

impl ClientLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to `client`. The first mapping of a name wins.
    pub fn insert(&mut self, name: &str, client: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        if let Some(existing) = self.exact.get(name) {
            if existing != client {
                warn!(
                    "'{}' is mapped to both '{}' and '{}'; keeping '{}'",
                    name, existing, client, existing
                );
            }
            return;
        }

        self.exact.insert(name.to_string(), client.to_string());
        self.folded
            .entry(name.to_lowercase())
            .or_insert_with(|| client.to_string());
    }

    /// Build the lookup from the `[clients]` configuration tables.
    pub fn from_clients(clients: &BTreeMap<String, ClientConfig>) -> Self {
        let mut lookup = Self::new();
        for (client, config) in clients {
            for name in config.repositories.iter().chain(config.projects.iter()) {
                lookup.insert(name, client);
            }
        }
        lookup
    }

    /// Resolve a repository or project name.
    ///
    /// Tries the exact name, then a case-insensitive match, then the bare
    /// repository name of an `owner/repo` key.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.resolve_name(name).or_else(|| {
            name.rsplit_once('/')
                .and_then(|(_, repo)| self.resolve_name(repo))
        })
    }

    fn resolve_name(&self, name: &str) -> Option<&str> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}
