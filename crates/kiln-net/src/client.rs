//! [`HttpTransport`] — the reqwest-based fetch client.

use std::path::Path;

use async_trait::async_trait;
use kiln_store::{FetchTransport, StoreError};
use kiln_types::FsStat;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::DIRECTORY_HEADER;

fn fetch_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Fetch(e.to_string())
}

/// Fetch client streaming artifacts over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn stream_to_file(
        mut response: reqwest::Response,
        dest: &Path,
    ) -> Result<(), StoreError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Reject listing entries that would escape the destination.
    fn validate_entry(entry: &str) -> Result<(), StoreError> {
        let escapes = entry.starts_with('/')
            || Path::new(entry)
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes {
            return Err(StoreError::Fetch(format!(
                "directory listing entry escapes destination: {entry}"
            )));
        }
        Ok(())
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn fetch_sector(&self, url: &str, dest: &Path) -> Result<(), StoreError> {
        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        if !response.status().is_success() {
            return Err(StoreError::Fetch(format!(
                "fetch {url}: unexpected status {}",
                response.status()
            )));
        }

        if !response.headers().contains_key(DIRECTORY_HEADER) {
            debug!(%url, dest = %dest.display(), "fetching artifact file");
            return Self::stream_to_file(response, dest).await;
        }

        // Directory artifact: the body lists relative entries, fetched
        // one by one under the destination directory.
        let entries: Vec<String> = response.json().await.map_err(fetch_err)?;
        debug!(%url, entries = entries.len(), "fetching artifact directory");
        tokio::fs::create_dir_all(dest).await?;

        for entry in entries {
            Self::validate_entry(&entry)?;
            let entry_url = format!("{}/{}", url.trim_end_matches('/'), entry);
            let response = self
                .client
                .get(&entry_url)
                .send()
                .await
                .map_err(fetch_err)?;
            if !response.status().is_success() {
                return Err(StoreError::Fetch(format!(
                    "fetch {entry_url}: unexpected status {}",
                    response.status()
                )));
            }
            Self::stream_to_file(response, &dest.join(&entry)).await?;
        }
        Ok(())
    }

    async fn fetch_stat(&self, url: &str) -> Result<FsStat, StoreError> {
        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        if !response.status().is_success() {
            return Err(StoreError::Fetch(format!(
                "stat {url}: unexpected status {}",
                response.status()
            )));
        }
        response.json().await.map_err(fetch_err)
    }

    async fn delete(&self, url: &str) -> Result<(), StoreError> {
        let response = self.client.delete(url).send().await.map_err(fetch_err)?;
        if !response.status().is_success() {
            return Err(StoreError::Fetch(format!(
                "delete {url}: unexpected status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
