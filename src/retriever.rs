//! # Retriever
//!
//! Query → top-k documents. Failures never escape: an embedding error, a dimension
//! mismatch or a search error is logged and turned into an empty
//! [`RetrievalResult`], which the orchestrator answers with its fixed
//! "no documents" response.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::dataset::Document;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::vector_store::{ScoredDocument, VectorStore};

/// Ranked documents for one query, best (lowest distance) first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    hits: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn hits(&self) -> &[ScoredDocument] {
        &self.hits
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.hits.iter().map(|hit| &hit.document)
    }

    /// Scores in rank order.
    pub fn scores(&self) -> Vec<f32> {
        self.hits.iter().map(|hit| hit.score).collect()
    }
}

impl From<Vec<ScoredDocument>> for RetrievalResult {
    fn from(hits: Vec<ScoredDocument>) -> Self {
        Self { hits }
    }
}

/// Similarity search over a shared, read-only index.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        if store.embedding_model_id() != embedder.model_id() {
            warn!(
                "Index was built with `{}` but queries use `{}`",
                store.embedding_model_id(),
                embedder.model_id()
            );
        }
        Self { store, embedder }
    }

    /// At most `k` documents most similar to `query`. `k == 0` is treated as 1.
    pub fn retrieve(&self, query: &str, k: usize) -> RetrievalResult {
        match self.try_retrieve(query, k.max(1)) {
            Ok(result) => {
                debug!("Retrieved {} documents", result.len());
                result
            }
            Err(e) => {
                error!("Error during retrieval: {}", e);
                RetrievalResult::empty()
            }
        }
    }

    fn try_retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        let vector = self.embedder.embed(query)?;
        Ok(self.store.search(&vector, k)?.into())
    }

    pub fn embedding_model_id(&self) -> &str {
        self.embedder.model_id()
    }
}
