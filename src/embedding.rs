//! # Embeddings
//!
//! The [`Embedder`] trait is the only thing the rest of the pipeline knows
//! about text vectorisation: a synchronous batch call with a fixed output
//! dimensionality. [`MiniLmEmbedder`] is the production implementation, a
//! sentence-transformers MiniLM model run with Candle (pure Rust, no Python),
//! producing L2-normalised 384-d vectors.
//!
//! Model inference is CPU-bound and blocking, so async callers go through
//! [`embed_blocking`], which moves the call onto tokio's blocking pool and
//! puts a deadline on it.
//!
//! ```no_run
//! use osdr_rag::embedding::{Embedder, MiniLmEmbedder};
//!
//! # fn main() -> osdr_rag::Result<()> {
//! let model = MiniLmEmbedder::load("sentence-transformers/all-MiniLM-L6-v2")?;
//! let vectors = model.embed(&["Microgravity alters bone density".to_string()])?;
//! assert_eq!(vectors[0].len(), model.dimension());
//! # Ok(()) }
//! ```

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::{sync::Arc, time::Duration};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::debug;

use crate::error::{RagError, Result};

/// BERT position embeddings stop here.
const MAX_TOKENS: usize = 512;

/// Maps text to fixed-length vectors.
///
/// Implementations must be deterministic for identical input and return
/// exactly one vector of [`dimension`](Embedder::dimension) floats per input,
/// in input order.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts in one provider call.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn dimension(&self) -> usize;
}

/// Run [`Embedder::embed`] on the blocking pool under `timeout`.
///
/// The output is checked against the input count and the declared
/// dimensionality, so callers can hand it straight to the index. `texts` is
/// shared with the blocking task; once the call returns the caller holds
/// the only reference again.
///
/// A timed-out call keeps running on its blocking thread; its result is
/// discarded.
pub async fn embed_blocking<E>(
    embedder: Arc<E>,
    texts: Arc<Vec<String>>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>>
where
    E: Embedder + ?Sized + 'static,
{
    let expected = texts.len();
    let dimension = embedder.dimension();

    let task = tokio::task::spawn_blocking(move || embedder.embed(&texts));
    let vectors = match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            return Err(RagError::Timeout {
                operation: "embed",
                elapsed: timeout,
            });
        }
        Ok(Err(join_error)) => {
            return Err(RagError::provider(
                "embedding",
                format!("embedding task aborted: {join_error}"),
            ));
        }
        Ok(Ok(result)) => result?,
    };

    if vectors.len() != expected {
        return Err(RagError::provider(
            "embedding",
            format!("expected {expected} vectors, got {}", vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    Ok(vectors)
}

/// Sentence embeddings model using Candle (pure Rust).
pub struct MiniLmEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl MiniLmEmbedder {
    /// Load the model from the Hugging Face Hub (cached after the first run).
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(|e| RagError::provider("embedding", e))?;
        let api_repo = api.repo(repo);

        let fetch = |file: &str| {
            api_repo
                .get(file)
                .map_err(|e| RagError::provider("embedding", format!("fetching {file}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let raw_config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&raw_config)?;
        let dimension = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RagError::provider("embedding", "config.json has no hidden_size"))?
            as usize;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| RagError::provider("embedding", format!("loading tokenizer: {e}")))?;
        // Pad each batch to its longest text; the attention mask hides the padding.
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| RagError::provider("embedding", format!("configuring tokenizer: {e}")))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        debug!(model_id, dimension, "embedding model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Encode a whole batch in one forward pass.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RagError::provider("embedding", format!("tokenization: {e}")))?;

        let rows = encodings.len();
        let width = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        let flatten = |field: fn(&Encoding) -> &[u32]| -> Vec<u32> {
            encodings.iter().flat_map(|e| field(e).iter().copied()).collect()
        };

        let token_ids = Tensor::from_vec(flatten(Encoding::get_ids), (rows, width), &self.device)?;
        let token_type_ids =
            Tensor::from_vec(flatten(Encoding::get_type_ids), (rows, width), &self.device)?;
        let attention_mask = Tensor::from_vec(
            flatten(Encoding::get_attention_mask),
            (rows, width),
            &self.device,
        )?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = mean_pooling(&output, &attention_mask)?;

        Ok(normalize_rows(&pooled)?.to_vec2::<f32>()?)
    }
}

/// Mean over token embeddings `[batch, seq, hidden]`, counting only the
/// positions the mask `[batch, seq]` keeps.
fn mean_pooling(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
    let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
    Ok(sum.broadcast_div(&count)?)
}

/// L2 normalise every row of a `[batch, hidden]` tensor.
fn normalize_rows(tensor: &Tensor) -> Result<Tensor> {
    let norm = tensor
        .sqr()?
        .sum_keepdim(1)?
        .sqrt()?
        .clamp(f32::EPSILON, f32::INFINITY)?;
    Ok(tensor.broadcast_div(&norm)?)
}

impl Embedder for MiniLmEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
