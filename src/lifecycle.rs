//! # Index lifecycle
//!
//! Runs once at startup and guarantees that a complete local index exists before
//! the first query, building it or synchronising it with the remote archive as
//! needed. Decision order:
//!
//! 1. Local artifacts present and readable:
//!    - in the `local` environment they are used as-is and the archive is never contacted;
//!    - elsewhere the archive is checked and, if it lacks a copy, the local one is published.
//!      An archived copy is never compared for staleness.
//! 2. No usable local artifacts, not `local`, archive has a copy: download it.
//! 3. Otherwise build from the dataset, persist locally and, outside `local`, publish.
//!
//! Archive trouble never stops startup: a failed existence check counts as "absent",
//! a failed download falls back to a rebuild, and a failed publish is logged and
//! leaves the valid local index in place. Only build failures are fatal.
//!
//! Local artifacts that fail verification (a truncated document store, leftovers of an
//! interrupted save) are deleted and handled as absent, so they are never published.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archive::IndexArchive;
use crate::config::{DatasetConfig, LOCAL_ENVIRONMENT, RagConfig};
use crate::dataset::load_documents;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::vector_store::{VectorStore, artifact_paths, partial_path, verify_artifacts};

/// Which branch produced the ready index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Existing local index, archive not consulted.
    Local,
    /// Existing local index; the archive already held a copy.
    LocalArchived,
    /// Existing local index, now published to the archive.
    LocalPublished,
    /// Existing local index; the archive lacked a copy or could not be checked, and
    /// publishing it failed.
    LocalUnpublished,
    /// Fetched from the archive.
    Downloaded,
    /// Freshly built, not published.
    Built,
    /// Freshly built and published.
    BuiltPublished,
}

/// Startup-time owner of the local index directory.
pub struct IndexLifecycle {
    index_dir: PathBuf,
    archive_prefix: String,
    dataset: DatasetConfig,
    embedder: Arc<dyn Embedder>,
    archive: Arc<dyn IndexArchive>,
}

impl IndexLifecycle {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        archive: Arc<dyn IndexArchive>,
    ) -> Self {
        Self {
            index_dir: config.index_dir.clone(),
            archive_prefix: config.archive_prefix(),
            dataset: config.dataset.clone(),
            embedder,
            archive,
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Make sure a complete index exists in the local index directory.
    ///
    /// # Errors
    /// [`RagError::IndexBuild`] when a rebuild is required and fails. Archive failures
    /// are logged and never returned.
    pub async fn ensure_index_ready(&self, environment: &str) -> Result<IndexSource> {
        let remote = environment != LOCAL_ENVIRONMENT;
        info!(
            "Ensuring index in {} (environment `{}`)",
            self.index_dir.display(),
            environment
        );

        if self.local_index_usable() {
            if !remote {
                info!("Using local index");
                return Ok(IndexSource::Local);
            }
            if self.archive_has_index().await {
                info!("Local index already archived under `{}`", self.archive_prefix);
                return Ok(IndexSource::LocalArchived);
            }
            return Ok(if self.publish().await {
                IndexSource::LocalPublished
            } else {
                IndexSource::LocalUnpublished
            });
        }

        if remote && self.archive_has_index().await {
            match self.download().await {
                Ok(()) => return Ok(IndexSource::Downloaded),
                Err(e) => warn!("Download failed, rebuilding instead: {}", e),
            }
        }

        self.build().await?;

        if remote && self.publish().await {
            Ok(IndexSource::BuiltPublished)
        } else {
            Ok(IndexSource::Built)
        }
    }

    /// Verify the local artifacts. Anything unusable left in the index directory is
    /// removed so later steps start clean.
    fn local_index_usable(&self) -> bool {
        match verify_artifacts(&self.index_dir) {
            Ok(()) => true,
            Err(e) => {
                if self.has_leftovers() {
                    warn!("Discarding unusable local index: {}", e);
                    self.remove_artifacts();
                }
                false
            }
        }
    }

    fn has_leftovers(&self) -> bool {
        artifact_paths(&self.index_dir)
            .iter()
            .any(|path| path.exists() || partial_path(path).exists())
    }

    async fn archive_has_index(&self) -> bool {
        match self.archive.exists(&self.archive_prefix).await {
            Ok(present) => present,
            Err(e) => {
                warn!("Archive check failed, treating as absent: {}", e);
                false
            }
        }
    }

    async fn publish(&self) -> bool {
        info!("Publishing index to archive prefix `{}`", self.archive_prefix);
        match self.archive.upload(&self.index_dir, &self.archive_prefix).await {
            Ok(()) => true,
            Err(e) => {
                error!("Publishing index failed, keeping local copy only: {}", e);
                false
            }
        }
    }

    async fn download(&self) -> Result<()> {
        let result = self
            .archive
            .download(&self.archive_prefix, &self.index_dir)
            .await
            .and_then(|()| {
                verify_artifacts(&self.index_dir).map_err(|e| {
                    RagError::ArchiveConnectivity(format!("downloaded index is unusable: {e}"))
                })
            });
        if result.is_err() {
            self.remove_artifacts();
        }
        result
    }

    /// Delete both artifacts and their `.partial` staging files, whichever exist.
    fn remove_artifacts(&self) {
        for artifact in artifact_paths(&self.index_dir) {
            for path in [partial_path(&artifact), artifact] {
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("Cannot remove stale artifact {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    async fn build(&self) -> Result<()> {
        let dataset = self.dataset.clone();
        let index_dir = self.index_dir.clone();
        let embedder = Arc::clone(&self.embedder);

        info!("Building index from {}", dataset.path.display());
        let built = tokio::task::spawn_blocking(move || -> Result<usize> {
            let documents = load_documents(&dataset.path, &dataset.column)?;
            let mut store = VectorStore::build_from_documents(documents, embedder.as_ref())?;
            store.save(&index_dir)?;
            Ok(store.len())
        })
        .await
        .map_err(|e| RagError::IndexBuild(format!("build task failed: {e}")))?
        .map_err(RagError::into_index_build)?;

        info!("Built index with {} documents", built);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::tests::WordHashEmbedder;
    use crate::vector_store::{DOCSTORE_FILE, INDEX_FILE, artifacts_exist};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    /// In-memory archive that records every call.
    #[derive(Default)]
    struct FakeArchive {
        reachable: bool,
        holds_index: Mutex<bool>,
        /// Directory whose artifacts a download copies.
        source: Option<PathBuf>,
        fail_download: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeArchive {
        fn reachable(holds_index: bool) -> Self {
            Self {
                reachable: true,
                holds_index: Mutex::new(holds_index),
                ..Self::default()
            }
        }

        fn unreachable() -> Self {
            Self::default()
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.reachable {
                Ok(())
            } else {
                Err(RagError::ArchiveConnectivity("connection refused".into()))
            }
        }
    }

    #[async_trait]
    impl IndexArchive for FakeArchive {
        async fn exists(&self, _prefix: &str) -> Result<bool> {
            self.record("exists")?;
            Ok(*self.holds_index.lock().unwrap())
        }

        async fn upload(&self, local_dir: &Path, _prefix: &str) -> Result<()> {
            self.record("upload")?;
            assert!(artifacts_exist(local_dir));
            *self.holds_index.lock().unwrap() = true;
            Ok(())
        }

        async fn download(&self, _prefix: &str, local_dir: &Path) -> Result<()> {
            self.record("download")?;
            std::fs::create_dir_all(local_dir)?;
            if self.fail_download {
                std::fs::write(local_dir.join(INDEX_FILE), b"partial")?;
                return Err(RagError::ArchiveConnectivity("connection reset".into()));
            }
            let source = self.source.as_ref().expect("fake archive has no source");
            for file in [INDEX_FILE, DOCSTORE_FILE] {
                std::fs::copy(source.join(file), local_dir.join(file))?;
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: RagConfig,
    }

    fn fixture(csv: Option<&str>) -> Fixture {
        let dir = tempdir().unwrap();
        let mut config = RagConfig::default();
        config.index_dir = dir.path().join("vector_index");
        config.dataset.path = dir.path().join("quotes.csv");
        if let Some(csv) = csv {
            std::fs::write(&config.dataset.path, csv).unwrap();
        }
        Fixture { _dir: dir, config }
    }

    fn lifecycle(config: &RagConfig, archive: &Arc<FakeArchive>) -> IndexLifecycle {
        let archive: Arc<dyn IndexArchive> = archive.clone();
        IndexLifecycle::new(config, Arc::new(WordHashEmbedder), archive)
    }

    const QUOTES: &str = "author,quote\nA,Be kind.\nB,Practice patience.\n";

    #[tokio::test]
    async fn test_local_with_unreachable_archive_builds_without_contacting_it() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::unreachable());

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("local")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::Built);
        assert!(archive.calls().is_empty());
        let store = VectorStore::load(&fx.config.index_dir).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_local_reuses_existing_index() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::reachable(false));
        let lc = lifecycle(&fx.config, &archive);
        lc.ensure_index_ready("local").await.unwrap();

        // Removing the dataset proves the second call does not rebuild.
        std::fs::remove_file(&fx.config.dataset.path).unwrap();
        assert_eq!(lc.ensure_index_ready("local").await.unwrap(), IndexSource::Local);
        assert!(archive.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remote_with_local_and_archived_index_does_not_upload() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::reachable(true));
        let lc = lifecycle(&fx.config, &archive);
        lc.ensure_index_ready("local").await.unwrap();

        assert_eq!(
            lc.ensure_index_ready("prod").await.unwrap(),
            IndexSource::LocalArchived
        );
        assert_eq!(archive.calls(), vec!["exists"]);
    }

    #[tokio::test]
    async fn test_remote_publishes_local_index_missing_from_archive() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::reachable(false));
        let lc = lifecycle(&fx.config, &archive);
        lc.ensure_index_ready("local").await.unwrap();

        assert_eq!(
            lc.ensure_index_ready("prod").await.unwrap(),
            IndexSource::LocalPublished
        );
        assert_eq!(archive.calls(), vec!["exists", "upload"]);
    }

    #[tokio::test]
    async fn test_remote_downloads_archived_index() {
        // Build a reference index somewhere else to play the archived copy.
        let origin = fixture(Some(QUOTES));
        let seed = Arc::new(FakeArchive::unreachable());
        lifecycle(&origin.config, &seed)
            .ensure_index_ready("local")
            .await
            .unwrap();

        let fx = fixture(None);
        let archive = Arc::new(FakeArchive {
            source: Some(origin.config.index_dir.clone()),
            ..FakeArchive::reachable(true)
        });

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("prod")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::Downloaded);
        assert_eq!(archive.calls(), vec!["exists", "download"]);
        assert_eq!(VectorStore::load(&fx.config.index_dir).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_builds_and_publishes_when_archive_is_empty() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::reachable(false));

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("staging")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::BuiltPublished);
        assert_eq!(archive.calls(), vec!["exists", "upload"]);
    }

    #[tokio::test]
    async fn test_remote_with_unreachable_archive_still_builds() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::unreachable());

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("prod")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::Built);
        assert_eq!(archive.calls(), vec!["exists", "upload"]);
        assert!(artifacts_exist(&fx.config.index_dir));
    }

    #[tokio::test]
    async fn test_failed_download_cleans_up_and_rebuilds() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive {
            fail_download: true,
            ..FakeArchive::reachable(true)
        });

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("prod")
            .await
            .unwrap();

        // The rebuilt index replaces the unusable archived copy.
        assert_eq!(source, IndexSource::BuiltPublished);
        assert_eq!(archive.calls(), vec!["exists", "download", "upload"]);
        assert_eq!(VectorStore::load(&fx.config.index_dir).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_local_index_is_rebuilt() {
        let fx = fixture(Some(QUOTES));
        std::fs::create_dir_all(&fx.config.index_dir).unwrap();
        std::fs::write(fx.config.index_dir.join(INDEX_FILE), b"stale").unwrap();
        let archive = Arc::new(FakeArchive::unreachable());

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("local")
            .await
            .unwrap();
        assert_eq!(source, IndexSource::Built);
        assert!(VectorStore::load(&fx.config.index_dir).is_ok());
    }

    #[tokio::test]
    async fn test_remote_with_unreachable_archive_reports_unpublished_local_index() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::unreachable());
        let lc = lifecycle(&fx.config, &archive);
        lc.ensure_index_ready("local").await.unwrap();

        assert_eq!(
            lc.ensure_index_ready("prod").await.unwrap(),
            IndexSource::LocalUnpublished
        );
        assert_eq!(archive.calls(), vec!["exists", "upload"]);
        assert!(VectorStore::load(&fx.config.index_dir).is_ok());
    }

    #[tokio::test]
    async fn test_truncated_local_docstore_is_rebuilt() {
        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive::unreachable());
        let lc = lifecycle(&fx.config, &archive);
        lc.ensure_index_ready("local").await.unwrap();
        std::fs::write(fx.config.index_dir.join(DOCSTORE_FILE), b"").unwrap();

        assert_eq!(lc.ensure_index_ready("local").await.unwrap(), IndexSource::Built);
        assert_eq!(VectorStore::load(&fx.config.index_dir).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_local_docstore_is_not_treated_as_archived() {
        let origin = fixture(Some(QUOTES));
        let seed = Arc::new(FakeArchive::unreachable());
        lifecycle(&origin.config, &seed)
            .ensure_index_ready("local")
            .await
            .unwrap();

        let fx = fixture(Some(QUOTES));
        let local = Arc::new(FakeArchive::unreachable());
        lifecycle(&fx.config, &local)
            .ensure_index_ready("local")
            .await
            .unwrap();
        std::fs::write(fx.config.index_dir.join(DOCSTORE_FILE), [1u8]).unwrap();

        let archive = Arc::new(FakeArchive {
            source: Some(origin.config.index_dir.clone()),
            ..FakeArchive::reachable(true)
        });
        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("prod")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::Downloaded);
        assert_eq!(archive.calls(), vec!["exists", "download"]);
        assert_eq!(VectorStore::load(&fx.config.index_dir).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_leftover_partial_files_are_not_an_index() {
        let fx = fixture(Some(QUOTES));
        std::fs::create_dir_all(&fx.config.index_dir).unwrap();
        for path in artifact_paths(&fx.config.index_dir) {
            std::fs::write(partial_path(&path), b"interrupted").unwrap();
        }
        let archive = Arc::new(FakeArchive::unreachable());

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("local")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::Built);
        for path in artifact_paths(&fx.config.index_dir) {
            assert!(!partial_path(&path).exists());
        }
        assert!(VectorStore::load(&fx.config.index_dir).is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_download_falls_back_to_rebuild() {
        let corrupt = tempdir().unwrap();
        std::fs::write(corrupt.path().join(INDEX_FILE), b"graph").unwrap();
        std::fs::write(corrupt.path().join(DOCSTORE_FILE), b"").unwrap();

        let fx = fixture(Some(QUOTES));
        let archive = Arc::new(FakeArchive {
            source: Some(corrupt.path().to_path_buf()),
            ..FakeArchive::reachable(true)
        });

        let source = lifecycle(&fx.config, &archive)
            .ensure_index_ready("prod")
            .await
            .unwrap();

        assert_eq!(source, IndexSource::BuiltPublished);
        assert_eq!(archive.calls(), vec!["exists", "download", "upload"]);
        assert_eq!(VectorStore::load(&fx.config.index_dir).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_fatal() {
        let fx = fixture(None);
        let archive = Arc::new(FakeArchive::unreachable());

        let err = lifecycle(&fx.config, &archive)
            .ensure_index_ready("local")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexBuild(_)));
        assert!(!artifacts_exist(&fx.config.index_dir));
    }

    #[tokio::test]
    async fn test_empty_dataset_builds_empty_index() {
        let fx = fixture(Some("quote\n"));
        let archive = Arc::new(FakeArchive::unreachable());

        lifecycle(&fx.config, &archive)
            .ensure_index_ready("local")
            .await
            .unwrap();
        assert!(VectorStore::load(&fx.config.index_dir).unwrap().is_empty());
    }
}
