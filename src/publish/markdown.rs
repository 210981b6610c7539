//! Markdown files as documents.

use crate::error::RecapError;
use crate::publish::{render_section, DocumentStore};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// One markdown file per document id, inside a directory.
pub struct MarkdownDocumentStore {
    directory: PathBuf,
}

impl MarkdownDocumentStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn path(&self, document: &str) -> PathBuf {
        let name: String = document
            .trim()
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '-',
            })
            .collect();
        let name = name.trim_matches('.');
        let name = if name.is_empty() { "recap" } else { name };
        self.directory.join(format!("{}.md", name.trim_end_matches(".md")))
    }
}

#[async_trait]
impl DocumentStore for MarkdownDocumentStore {
    async fn read(&self, document: &str) -> Result<String, RecapError> {
        let path = self.path(document);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(RecapError::upstream(
                path.display().to_string(),
                format!("cannot read: {}", e),
            )),
        }
    }

    async fn append_section(
        &self,
        document: &str,
        heading: &str,
        body: &str,
    ) -> Result<(), RecapError> {
        let path = self.path(document);
        let described = path.display().to_string();
        let reject = |e: std::io::Error| RecapError::rejected(described.clone(), e.to_string());

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(reject)?;

        let existing = self.read(document).await?;
        let mut section = String::new();
        if !existing.is_empty() {
            if !existing.ends_with('\n') {
                section.push('\n');
            }
            section.push('\n');
        }
        section.push_str(&render_section(heading, body));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(reject)?;
        file.write_all(section.as_bytes()).await.map_err(reject)?;
        file.flush().await.map_err(reject)?;
        Ok(())
    }

    fn describe(&self, document: &str) -> String {
        self.path(document).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::has_section;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_reads_empty() {
        let temp = TempDir::new().unwrap();
        let store = MarkdownDocumentStore::new(temp.path().to_path_buf());
        assert_eq!(store.read("weekly-notes").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_append_sections() {
        let temp = TempDir::new().unwrap();
        let store = MarkdownDocumentStore::new(temp.path().join("recaps"));

        store
            .append_section("weekly-notes", "api updates for 2026-10-19", "- Added a limiter")
            .await
            .unwrap();
        store
            .append_section("weekly-notes", "web updates for 2026-10-19", "- Fixed the nav")
            .await
            .unwrap();

        let content = store.read("weekly-notes").await.unwrap();
        assert_eq!(
            content,
            "## api updates for 2026-10-19\n\n- Added a limiter\n\n\
             ## web updates for 2026-10-19\n\n- Fixed the nav\n"
        );
        assert!(has_section(&content, "web updates for 2026-10-19"));
        assert!(temp.path().join("recaps/weekly-notes.md").exists());
    }

    #[test]
    fn test_document_names_are_sanitized() {
        let store = MarkdownDocumentStore::new(PathBuf::from("out"));
        assert_eq!(store.describe("Acme Standup"), "out/Acme-Standup.md");
        assert_eq!(store.describe("../etc/passwd"), "out/-etc-passwd.md");
        assert_eq!(store.describe("notes.md"), "out/notes.md");
    }
}
