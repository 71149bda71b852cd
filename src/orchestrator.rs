//! # RAG orchestrator
//!
//! One query, end to end: retrieve → assemble prompt → generate → respond.
//!
//! Stateless per call; the orchestrator only holds shared, read-only components, so one
//! instance can serve concurrent queries. There are two terminal outcomes:
//!
//! - [`Outcome::NoDocumentsFound`]: retrieval came back empty (no match, empty index, or
//!   a swallowed retrieval failure). The model is not called; the advice is
//!   [`NO_DOCUMENTS_ADVICE`] and the prompt is the template with an empty context.
//! - [`Outcome::Answered`]: the model answered a prompt built from the retrieved passages.
//!
//! Generation failures are returned as errors; no partial response is produced.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::generation::{AdviceSchema, Generator};
use crate::prompt::PromptAssembler;
use crate::response::{AdviceResponse, ResponseMetadata};
use crate::retriever::Retriever;
use crate::vector_store::VectorStore;

/// Advice returned when nothing relevant was retrieved.
pub const NO_DOCUMENTS_ADVICE: &str = "No relevant Documents found";

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NoDocumentsFound(AdviceResponse),
    Answered(AdviceResponse),
}

impl Outcome {
    pub fn response(&self) -> &AdviceResponse {
        match self {
            Outcome::NoDocumentsFound(r) | Outcome::Answered(r) => r,
        }
    }

    pub fn into_response(self) -> AdviceResponse {
        match self {
            Outcome::NoDocumentsFound(r) | Outcome::Answered(r) => r,
        }
    }
}

pub struct RagOrchestrator {
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Arc<dyn Generator>,
    schema: AdviceSchema,
    top_k: usize,
}

impl RagOrchestrator {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        generator: Arc<dyn Generator>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
            schema: AdviceSchema::life_advice(),
            top_k,
        }
    }

    /// Wire the pipeline from configuration around a loaded index.
    pub fn from_config(
        config: &RagConfig,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        Ok(Self::new(
            Retriever::new(store, embedder),
            PromptAssembler::from_config(&config.prompt)?,
            generator,
            config.retrieval.top_k,
        ))
    }

    /// Answer `query`, reporting which terminal state was reached.
    pub async fn answer(&self, query: &str) -> Result<Outcome> {
        info!("Answering query: {}", query);
        let retrieved = self.retriever.retrieve(query, self.top_k);
        let embedding_model_id = self.retriever.embedding_model_id().to_string();

        if retrieved.is_empty() {
            info!("No documents retrieved");
            return Ok(Outcome::NoDocumentsFound(AdviceResponse {
                advice: NO_DOCUMENTS_ADVICE.to_string(),
                retrieved_chunks: Vec::new(),
                metadata: ResponseMetadata {
                    retrieval_scores: Vec::new(),
                    embedding_model_id,
                    prompt_used: self.assembler.empty_prompt(query),
                },
            }));
        }

        let (chunks, prompt) = self
            .assembler
            .build_prompt(query, &retrieved, self.generator.as_ref());
        debug!("Prompt built from {} chunks", chunks.len());

        let advice = self.generator.generate(&prompt, Some(&self.schema)).await?;

        Ok(Outcome::Answered(AdviceResponse {
            advice,
            retrieved_chunks: chunks,
            metadata: ResponseMetadata {
                retrieval_scores: retrieved.scores(),
                embedding_model_id,
                prompt_used: prompt,
            },
        }))
    }

    /// Answer `query`.
    pub async fn run(&self, query: &str) -> Result<AdviceResponse> {
        Ok(self.answer(query).await?.into_response())
    }
}
