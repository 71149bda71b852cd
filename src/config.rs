//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RagConfig`] struct, which holds every knob the pipeline reads, and a
//! [`load_config`] function to load it from a YAML file. Every section has defaults, so a
//! config file only needs to name what it changes.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use sage_rag::config::{RagConfig, load_config};
//!
//! let config: RagConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.retrieval.top_k);
//! ```
//!
//! A minimal file:
//!
//! ```yaml
//! api_key: "sk-..."
//! api_base: "https://api.openai.com/v1"
//! model: "gpt-4o-mini"
//! dataset:
//!   path: "data/quotes.csv"
//!   column: "quote"
//! archive:
//!   bucket: "minimal-rag-bucket"
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::error::{RagError, Result};
use crate::template::DEFAULT_PROMPT_TEMPLATE;

/// Environment tag that suppresses every remote archive call.
pub const LOCAL_ENVIRONMENT: &str = "local";

/// Represents the application's configuration.
///
/// Constructed once at process start and handed by reference (or `Arc`) to each
/// component's constructor. Nothing in the pipeline looks configuration up globally.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RagConfig {
    /// The API key used to authenticate requests to the generation API.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// The name of the model used for generating answers.
    pub model: String,

    /// Upper bound for one generation call, in seconds.
    pub request_timeout_secs: u64,

    pub embedding: EmbeddingConfig,

    pub dataset: DatasetConfig,

    /// Directory holding the two local index artifacts. Also used as the archive prefix
    /// unless `archive.folder_prefix` is set.
    pub index_dir: PathBuf,

    pub archive: ArchiveConfig,

    pub retrieval: RetrievalConfig,

    pub prompt: PromptConfig,
}

/// Which embedding backend to load, and which model.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Hugging Face model id, also reported in every response's metadata.
    pub model_id: String,
    /// Hub revision to fetch.
    pub revision: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// BERT sentence embeddings run locally through Candle.
    #[default]
    Candle,
}

/// Tabular source of documents.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    /// CSV file with a header row.
    pub path: PathBuf,
    /// Column whose non-empty cells become documents.
    pub column: String,
}

/// Remote object store holding a shareable copy of the index.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Storage API endpoint. Overridable for emulators and tests.
    pub base_url: String,
    pub bucket: String,
    /// Object-name prefix the artifacts live under. Defaults to `index_dir`.
    pub folder_prefix: Option<String>,
    /// OAuth bearer token; requests are sent unauthenticated when absent.
    pub token: Option<String>,
    /// Per-request timeout for archive calls, in seconds. Applies to whole artifact
    /// transfers, so it is kept separate from `request_timeout_secs`.
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages retrieved per query.
    pub top_k: usize,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum chunk length, in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Token budget for the context slot of the prompt.
    pub max_context_tokens: usize,
    /// Two-slot template with `{context}` and `{query}` placeholders.
    pub template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 60,
            embedding: EmbeddingConfig::default(),
            dataset: DatasetConfig::default(),
            index_dir: PathBuf::from("vector_index"),
            archive: ArchiveConfig::default(),
            retrieval: RetrievalConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Candle,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/quotes.csv"),
            column: "quote".to_string(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://storage.googleapis.com".to_string(),
            bucket: "minimal-rag-bucket".to_string(),
            folder_prefix: None,
            token: None,
            timeout_secs: 600,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 100,
            max_context_tokens: 2000,
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

impl RagConfig {
    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.chunk_size == 0 {
            return Err(RagError::Config("prompt.chunk_size must be > 0".into()));
        }
        if self.prompt.chunk_overlap >= self.prompt.chunk_size {
            return Err(RagError::Config(format!(
                "prompt.chunk_overlap ({}) must be smaller than prompt.chunk_size ({})",
                self.prompt.chunk_overlap, self.prompt.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }
        if self.archive.timeout_secs == 0 {
            return Err(RagError::Config("archive.timeout_secs must be > 0".into()));
        }
        if self.dataset.column.trim().is_empty() {
            return Err(RagError::Config("dataset.column must not be empty".into()));
        }
        Ok(())
    }

    /// Object-name prefix used for the archive copy of the index.
    pub fn archive_prefix(&self) -> String {
        match &self.archive.folder_prefix {
            Some(prefix) => prefix.trim_end_matches('/').to_string(),
            None => self
                .index_dir
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

/// Loads the application's configuration from a YAML file and validates it.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(RagConfig)`: The loaded configuration.
/// - `Err(RagError::Config)`: The file could not be read, parsed, or failed validation.
pub fn load_config(file: &str) -> Result<RagConfig> {
    tracing::debug!("Loading config from {}", file);
    let content = fs::read_to_string(file)
        .map_err(|e| RagError::Config(format!("cannot read {file}: {e}")))?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
