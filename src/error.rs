//! # Error kinds
//!
//! Every fallible operation in the pipeline returns [`RagError`]. The variants map
//! onto how each failure is treated:
//!
//! | Variant | Raised by | Treatment |
//! |---------|-----------|-----------|
//! | [`RagError::IndexBuild`] | lifecycle, vector store | fatal at startup |
//! | [`RagError::ArchiveConnectivity`] | archive | degrades to "absent" |
//! | [`RagError::Retrieval`] | retriever | degrades to an empty result |
//! | [`RagError::Generation`] | generation provider | surfaced to the caller |
//!
//! The remaining variants cover configuration, dataset and embedding problems that
//! are folded into one of the above by the component that observes them.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// The vector index could not be built, persisted or loaded.
    #[error("index build failed: {0}")]
    IndexBuild(String),

    /// The remote archive could not be reached or answered with an error.
    #[error("archive connectivity failure: {0}")]
    ArchiveConnectivity(String),

    /// Embedding the query or searching the index failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The language model call failed (HTTP, API error, malformed body, timeout).
    #[error("generation failed: {0}")]
    Generation(String),

    /// The embedding model failed to load or to encode text.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The source dataset could not be read.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Re-label any failure as an index build failure, keeping its message.
    ///
    /// Used by the lifecycle manager so that every error escaping a rebuild has
    /// the fatal kind.
    pub fn into_index_build(self) -> Self {
        match self {
            RagError::IndexBuild(_) => self,
            other => RagError::IndexBuild(other.to_string()),
        }
    }
}

impl From<csv::Error> for RagError {
    fn from(err: csv::Error) -> Self {
        RagError::Dataset(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::ArchiveConnectivity(err.to_string())
    }
}

impl From<serde_yaml::Error> for RagError {
    fn from(err: serde_yaml::Error) -> Self {
        RagError::Config(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for RagError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        RagError::Generation(err.to_string())
    }
}
