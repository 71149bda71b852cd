//! # Prompt template
//!
//! A fixed two-slot template: one `{context}` placeholder for the packed passages and
//! one `{query}` placeholder for the user's question. The template text comes from
//! [`PromptConfig::template`](crate::config::PromptConfig::template) and is parsed once;
//! rendering is a single pass over the parsed segments, so placeholder-looking text
//! inside a query or a passage is copied verbatim and never substituted again.
//!
//! ```rust
//! use sage_rag::template::PromptTemplate;
//!
//! let tpl = PromptTemplate::parse("Context:\n{context}\n\nQuestion:\n{query}").unwrap();
//! let prompt = tpl.render("Be kind.", "How to be happier?");
//! assert_eq!(prompt, "Context:\nBe kind.\n\nQuestion:\nHow to be happier?");
//! ```

use crate::error::{RagError, Result};

/// Template used when the configuration does not override it.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Context:\n{context}\n\nQuestion:\n{query}\n";

const CONTEXT_SLOT: &str = "{context}";
const QUERY_SLOT: &str = "{query}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Query,
}

/// A parsed two-slot prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `source`, requiring at least one `{context}` and one `{query}` slot.
    ///
    /// # Errors
    /// [`RagError::Config`] when either placeholder is missing.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        let (mut has_context, mut has_query) = (false, false);

        loop {
            let next_context = rest.find(CONTEXT_SLOT);
            let next_query = rest.find(QUERY_SLOT);

            let (at, slot, len) = match (next_context, next_query) {
                (Some(c), Some(q)) if c < q => (c, Segment::Context, CONTEXT_SLOT.len()),
                (Some(_), Some(q)) => (q, Segment::Query, QUERY_SLOT.len()),
                (Some(c), None) => (c, Segment::Context, CONTEXT_SLOT.len()),
                (None, Some(q)) => (q, Segment::Query, QUERY_SLOT.len()),
                (None, None) => break,
            };

            if at > 0 {
                segments.push(Segment::Literal(rest[..at].to_string()));
            }
            match slot {
                Segment::Context => has_context = true,
                Segment::Query => has_query = true,
                Segment::Literal(_) => {}
            }
            segments.push(slot);
            rest = &rest[at + len..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        if !has_context || !has_query {
            return Err(RagError::Config(format!(
                "prompt template must contain both {CONTEXT_SLOT} and {QUERY_SLOT}"
            )));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Substitute `context` and `query` into the template.
    pub fn render(&self, context: &str, query: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + context.len() + query.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Context => out.push_str(context),
                Segment::Query => out.push_str(query),
            }
        }
        out
    }

    /// The unparsed template text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_PROMPT_TEMPLATE.to_string(),
            segments: vec![
                Segment::Literal("Context:\n".to_string()),
                Segment::Context,
                Segment::Literal("\n\nQuestion:\n".to_string()),
                Segment::Query,
                Segment::Literal("\n".to_string()),
            ],
        }
    }
}
