//! # Embedding provider
//!
//! Converts text into fixed-dimension vectors. The rest of the crate only sees the
//! [`Embedder`] capability; which backend sits behind it is decided by
//! [`EmbeddingConfig::backend`](crate::config::EmbeddingConfig::backend) in
//! [`load_embedder`].
//!
//! The bundled backend is [`SentenceEmbeddingsModel`]: a BERT sentence-transformer run
//! with Candle (pure Rust). Weights, config and tokenizer are fetched from the Hugging
//! Face hub on first use and cached by `hf-hub`. Sentences are embedded by mean pooling
//! the last hidden state over the attention mask, then L2-normalising.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::info;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{RagError, Result};

/// Text → vector capability shared by index construction and query-time retrieval.
pub trait Embedder: Send + Sync {
    /// Embed one text. Every vector has length [`Embedder::dimension`].
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of the vectors produced by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    /// Identifier of the underlying model, reported in response metadata.
    fn model_id(&self) -> &str;
}

/// Build the embedder selected by `config`.
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Candle => Ok(Arc::new(SentenceEmbeddingsModel::load(
            &config.model_id,
            &config.revision,
        )?)),
    }
}

fn candle_err(e: candle_core::Error) -> RagError {
    RagError::Embedding(e.to_string())
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub
    pub fn load(model_id: &str, revision: &str) -> Result<Self> {
        let device = Device::Cpu;
        info!("Loading embedding model {} ({})", model_id, revision);

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new().map_err(|e| RagError::Embedding(e.to_string()))?;
        let api_repo = api.repo(repo);

        let fetch = |name: &str| {
            api_repo
                .get(name)
                .map_err(|e| RagError::Embedding(format!("cannot fetch {name}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config =
            serde_json::from_str(&config).map_err(|e| RagError::Embedding(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| RagError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        // SAFETY: the safetensors file is owned by the hf-hub cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(candle_err)?
        };
        let model = BertModel::load(vb, &config).map_err(candle_err)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            model_id: model_id.to_string(),
            dimension: config.hidden_size,
        })
    }

    /// Encode text into an embedding
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        // Tokenize with automatic truncation at 512 tokens
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| RagError::Embedding(format!("Tokenization error: {}", e)))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(candle_err)?;

        let pooled = mean_pooling(&output, tokens.get_attention_mask(), &self.device)?;
        let normalized = l2_normalize(&pooled)?;
        normalized.to_vec1::<f32>().map_err(candle_err)
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Mean pooling over token embeddings, considering attention mask.
///
/// `embeddings` is `[1, seq_len, hidden]`; the result is `[hidden]`.
fn mean_pooling(embeddings: &Tensor, attention_mask: &[u32], device: &Device) -> Result<Tensor> {
    let pooled = (|| {
        // [1, seq_len, 1] so the mask broadcasts over the hidden dimension
        let mask = Tensor::new(attention_mask, device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    })();
    pooled.map_err(candle_err)
}

/// L2 normalize the embedding vector
fn l2_normalize(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .sqr()
        .and_then(|t| t.sum_all())
        .and_then(|t| t.sqrt())
        .and_then(|norm| tensor.broadcast_div(&norm))
        .map_err(candle_err)
}
