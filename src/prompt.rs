//! # Prompt assembly
//!
//! Retrieved documents → chunks → token-bounded context → rendered prompt.
//!
//! Chunks are packed greedily in rank order, joined by a blank line. Packing stops at
//! the first chunk whose addition would push the context past the token budget; that
//! chunk and every later one are dropped, even if a later, shorter chunk would fit.
//! The packed context is therefore always a prefix of the chunk sequence.

use tracing::debug;

use crate::config::PromptConfig;
use crate::error::Result;
use crate::generation::TokenCounter;
use crate::retriever::RetrievalResult;
use crate::splitter::TextSplitter;
use crate::template::PromptTemplate;

const CHUNK_SEPARATOR: &str = "\n\n";

/// Builds prompts from retrieval results.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    splitter: TextSplitter,
    template: PromptTemplate,
    max_context_tokens: usize,
}

impl PromptAssembler {
    pub fn new(splitter: TextSplitter, template: PromptTemplate, max_context_tokens: usize) -> Self {
        Self {
            splitter,
            template,
            max_context_tokens,
        }
    }

    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        Ok(Self::new(
            TextSplitter::new(config.chunk_size, config.chunk_overlap),
            PromptTemplate::parse(&config.template)?,
            config.max_context_tokens,
        ))
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Split every retrieved document, keeping document rank then chunk order.
    pub fn split_documents(&self, result: &RetrievalResult) -> Vec<String> {
        result
            .documents()
            .flat_map(|doc| self.splitter.split_text(&doc.text))
            .collect()
    }

    /// Longest prefix of `chunks` whose joined text fits the token budget.
    pub fn pack_context<C: TokenCounter + ?Sized>(&self, chunks: &[String], counter: &C) -> String {
        let mut context = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let candidate = if context.is_empty() {
                chunk.clone()
            } else {
                format!("{context}{CHUNK_SEPARATOR}{chunk}")
            };
            let tokens = counter.count_tokens(&candidate);
            if tokens > self.max_context_tokens {
                debug!(
                    "Context budget of {} tokens reached, keeping {} of {} chunks",
                    self.max_context_tokens,
                    i,
                    chunks.len()
                );
                break;
            }
            context = candidate;
        }
        context.trim().to_string()
    }

    /// Returns the full (untruncated) chunk list and the prompt holding the packed context.
    pub fn build_prompt<C: TokenCounter + ?Sized>(
        &self,
        query: &str,
        result: &RetrievalResult,
        counter: &C,
    ) -> (Vec<String>, String) {
        let chunks = self.split_documents(result);
        let context = self.pack_context(&chunks, counter);
        let prompt = self.template.render(&context, query);
        (chunks, prompt)
    }

    /// The template rendered with no context.
    pub fn empty_prompt(&self, query: &str) -> String {
        self.template.render("", query)
    }
}
