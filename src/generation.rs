//! # Generation provider
//!
//! Turns an assembled prompt into an answer. The pipeline depends on the
//! [`Generator`] trait only; [`OpenAiGenerator`] implements it against any
//! OpenAI-compatible chat-completions endpoint with `async-openai`.
//!
//! Each call sends two messages: a fixed advisor system message and the prompt as the
//! user message. When an [`AdviceSchema`] is given it is sent as a JSON-schema
//! `response_format`, and the named field is extracted from the JSON reply. Replies that
//! are not JSON objects carrying that field are returned verbatim.
//!
//! Token counting (used to budget the prompt context) goes through the same provider so
//! that the budget matches the model's tokenizer; see [`TokenCounter`].

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tracing::{debug, error, warn};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// System message sent with every generation request.
pub const SYSTEM_PROMPT: &str = "You are a wise advisor. Based on the following advice fragments, answer the user's question thoughtfully.";

/// Counts tokens the way the generation model does.
pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Structured-output constraint: a single required string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceSchema {
    pub name: String,
    pub description: String,
    pub field: String,
    pub field_description: String,
}

impl AdviceSchema {
    /// The `life-advice` schema with its single `advice` field.
    pub fn life_advice() -> Self {
        Self {
            name: "life-advice".to_string(),
            description: "Give a life advice based on the user's query".to_string(),
            field: "advice".to_string(),
            field_description: "The advice based on the input query".to_string(),
        }
    }

    /// JSON schema of an object with exactly one required string property.
    pub fn json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.field.clone(),
            json!({"type": "string", "description": self.field_description}),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": [self.field],
            "additionalProperties": false,
        })
    }

    fn response_format(&self) -> ResponseFormat {
        ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some(self.description.clone()),
                name: self.name.clone(),
                schema: Some(self.json_schema()),
                strict: Some(true),
            },
        }
    }

    /// The schema field from a JSON reply, or the whole reply when it has none.
    pub fn extract(&self, content: &str) -> String {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => match map.get(&self.field) {
                Some(Value::String(value)) => value.clone(),
                _ => {
                    warn!("Reply lacks a string `{}` field, using raw text", self.field);
                    content.to_string()
                }
            },
            _ => content.to_string(),
        }
    }
}

impl Default for AdviceSchema {
    fn default() -> Self {
        Self::life_advice()
    }
}

/// Language model capability.
#[async_trait]
pub trait Generator: TokenCounter + Send + Sync {
    /// Generate an answer for `prompt`, constrained by `schema` when given.
    ///
    /// # Errors
    /// Every provider failure is reported as [`RagError::Generation`].
    async fn generate(&self, prompt: &str, schema: Option<&AdviceSchema>) -> Result<String>;
}

/// BPE token counter from `tiktoken-rs`.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Tokenizer for `model`, falling back to `cl100k_base` for unknown models.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                debug!("No tokenizer known for `{}`, using cl100k_base", model);
                tiktoken_rs::cl100k_base().map_err(|e| RagError::Generation(e.to_string()))?
            }
        };
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Chat-completions client for OpenAI-compatible APIs.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    tokens: TiktokenCounter,
}

impl OpenAiGenerator {
    pub fn new(config: &RagConfig) -> Result<Self> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Generation client for {} at {}", config.model, config.api_base);
        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            tokens: TiktokenCounter::for_model(&config.model)?,
        })
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request(
        &self,
        prompt: &str,
        schema: Option<&AdviceSchema>,
    ) -> Result<CreateChatCompletionRequest> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessage {
                content: SYSTEM_PROMPT.into(),
                name: None,
            }
            .into(),
            ChatCompletionRequestUserMessage {
                content: prompt.into(),
                name: None,
            }
            .into(),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone()).messages(messages);
        if let Some(schema) = schema {
            args.response_format(schema.response_format());
        }
        Ok(args.build()?)
    }
}

impl TokenCounter for OpenAiGenerator {
    fn count_tokens(&self, text: &str) -> usize {
        self.tokens.count_tokens(text)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, schema: Option<&AdviceSchema>) -> Result<String> {
        let request = self.build_request(prompt, schema)?;
        debug!("Sending generation request: {:?}", request);

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                error!("Generation timed out after {:?}", self.timeout);
                RagError::Generation(format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| {
                error!("Generation request failed: {}", e);
                RagError::from(e)
            })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("response has no message content".into()))?;

        Ok(match schema {
            Some(schema) => schema.extract(&content),
            None => content,
        })
    }
}
