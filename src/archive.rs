//! # Remote index archive
//!
//! A durable, shared copy of the two index artifacts, addressed by an object-name
//! prefix. The lifecycle manager talks to it through the [`IndexArchive`] trait so
//! tests and alternative stores can stand in for the real backend.
//!
//! [`GcsArchive`] speaks the Google Cloud Storage JSON API directly over `reqwest`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list      | `GET  {base}/storage/v1/b/{bucket}/o?prefix={prefix}/` |
//! | upload    | `POST {base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={object}` |
//! | download  | `GET  {base}/storage/v1/b/{bucket}/o/{object}?alt=media` |
//!
//! A bearer token is attached when configured; otherwise requests are anonymous
//! (public buckets, emulators).

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ArchiveConfig;
use crate::error::{RagError, Result};
use crate::vector_store::{ARTIFACT_FILES, partial_path};

/// Remote store for the index artifacts.
#[async_trait]
pub trait IndexArchive: Send + Sync {
    /// `true` only if every artifact exists under `prefix`. A partial set is absent.
    async fn exists(&self, prefix: &str) -> Result<bool>;

    /// Copy both artifacts from `local_dir` to `prefix`.
    async fn upload(&self, local_dir: &Path, prefix: &str) -> Result<()>;

    /// Copy both artifacts from `prefix` into `local_dir`.
    async fn download(&self, prefix: &str, local_dir: &Path) -> Result<()>;
}

/// Object name of `file` under `prefix`.
pub fn object_name(prefix: &str, file: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file.to_string()
    } else {
        format!("{prefix}/{file}")
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectMeta>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

/// Google Cloud Storage bucket accessed through the JSON API.
pub struct GcsArchive {
    client: reqwest::Client,
    base_url: Url,
    bucket: String,
    token: Option<String>,
}

impl GcsArchive {
    /// Client for the bucket in `config`. Every request is bounded by
    /// `archive.timeout_secs`, which covers a whole artifact transfer.
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RagError::Config(format!("invalid archive.base_url `{}`: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RagError::Config(format!(
                "archive.base_url `{}` cannot be a base URL",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn list_url(&self, prefix: &str, page_token: Option<&str>) -> Url {
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        url
    }

    fn upload_url(&self, name: &str) -> Url {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name);
        url
    }

    fn download_url(&self, name: &str) -> Url {
        // a single path segment, so `/` in the object name is percent-encoded
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o", name]);
        url.query_pairs_mut().append_pair("alt", "media");
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Download object `name` to `dest`.
    async fn fetch(&self, name: &str, dest: &Path) -> Result<()> {
        info!("Downloading gs://{}/{}", self.bucket, name);
        let bytes = self
            .authorize(self.client.get(self.download_url(name)))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    /// Names of every object starting with `prefix`, following pagination.
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.list_url(prefix, page_token.as_deref());
            debug!("Listing {}", url);
            let page: ObjectList = self
                .authorize(self.client.get(url))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl IndexArchive for GcsArchive {
    async fn exists(&self, prefix: &str) -> Result<bool> {
        let listing_prefix = object_name(prefix, "");
        let names = self.list(&listing_prefix).await?;
        let present = ARTIFACT_FILES
            .iter()
            .all(|file| names.iter().any(|n| *n == object_name(prefix, file)));
        debug!(
            "Archive gs://{}/{} has index: {}",
            self.bucket, listing_prefix, present
        );
        Ok(present)
    }

    async fn upload(&self, local_dir: &Path, prefix: &str) -> Result<()> {
        for file in ARTIFACT_FILES {
            let name = object_name(prefix, file);
            let bytes = tokio::fs::read(local_dir.join(file)).await?;
            info!("Uploading {} ({} bytes) to gs://{}/{}", file, bytes.len(), self.bucket, name);
            self.authorize(self.client.post(self.upload_url(&name)))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }

    async fn download(&self, prefix: &str, local_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(local_dir).await?;
        let staged: Vec<_> = ARTIFACT_FILES
            .iter()
            .map(|file| (object_name(prefix, file), local_dir.join(file)))
            .collect();
        for (name, dest) in &staged {
            if let Err(e) = self.fetch(name, &partial_path(dest)).await {
                for (_, dest) in &staged {
                    let _ = tokio::fs::remove_file(partial_path(dest)).await;
                }
                return Err(e);
            }
        }
        // docstore last: its presence marks a complete pair
        for (_, dest) in &staged {
            tokio::fs::rename(partial_path(dest), dest).await?;
        }
        Ok(())
    }
}
