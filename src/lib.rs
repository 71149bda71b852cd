//! # Sage (library root)
//!
//! Retrieval-augmented advice: answer a question from the passages of a reference
//! dataset that are closest to it, using a language model constrained to a small JSON
//! schema.
//!
//! - Index lifecycle & storage (`lifecycle`, `vector_store`, `archive`, `dataset`).
//! - Query pipeline (`retriever`, `prompt`, `splitter`, `template`, `generation`,
//!   `orchestrator`, `response`).
//! - Model backends (`embedding`, `generation`).
//! - CLI & configuration (`commands`, `config`, `error`).
//!
//! The two entry points used by the `sage` binary are [`seed`] (prepare the index only)
//! and [`ask`] (prepare the index, then answer one query).
//!
//! ## Environments
//! Every entry point takes an environment tag. `local` keeps everything on disk and never
//! touches the remote archive; any other tag (`prod`, `staging`, ...) synchronises the
//! local index with the archive bucket.

use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod archive;
pub mod commands;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod retriever;
pub mod splitter;
pub mod template;
pub mod vector_store;

use crate::archive::{GcsArchive, IndexArchive};
use crate::config::RagConfig;
use crate::embedding::{Embedder, load_embedder};
use crate::error::{RagError, Result};
use crate::generation::{Generator, OpenAiGenerator};
use crate::lifecycle::{IndexLifecycle, IndexSource};
use crate::orchestrator::RagOrchestrator;
use crate::response::AdviceResponse;
use crate::vector_store::VectorStore;

/// File name of the configuration inside [`config_dir`].
pub const CONFIG_FILE: &str = "config.yaml";

/// Return the per-platform configuration directory used by Sage.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "sage-rag", "sage")`, e.g. `~/.config/sage` on Linux.
/// The directory is **not** created by this function.
///
/// # Errors
/// [`RagError::Config`] if the platform configuration directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "sage-rag", "sage")
        .ok_or_else(|| RagError::Config("Unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Write a default [`RagConfig`] to `path`, creating parent directories as needed.
///
/// An existing file is left untouched.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        info!("Config file {} already exists, leaving it", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&RagConfig::default())?;
    fs::write(path, yaml)?;
    info!("Created config file: {}", path.display());
    Ok(())
}

fn lifecycle_for(config: &RagConfig, embedder: Arc<dyn Embedder>) -> Result<IndexLifecycle> {
    let archive: Arc<dyn IndexArchive> = Arc::new(GcsArchive::new(&config.archive)?);
    Ok(IndexLifecycle::new(config, embedder, archive))
}

/// Make the local index ready for `environment`.
pub async fn seed(config: &RagConfig, environment: &str) -> Result<IndexSource> {
    let embedder = load_embedder(&config.embedding)?;
    lifecycle_for(config, embedder)?
        .ensure_index_ready(environment)
        .await
}

/// Make the index ready, then answer `query` with it.
pub async fn ask(config: &RagConfig, environment: &str, query: &str) -> Result<AdviceResponse> {
    let embedder = load_embedder(&config.embedding)?;
    let source = lifecycle_for(config, Arc::clone(&embedder))?
        .ensure_index_ready(environment)
        .await?;
    info!("Index ready ({:?})", source);

    let store = Arc::new(VectorStore::load(&config.index_dir)?);
    let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(config)?);
    let orchestrator = RagOrchestrator::from_config(config, store, embedder, generator)?;
    orchestrator.run(query).await
}
