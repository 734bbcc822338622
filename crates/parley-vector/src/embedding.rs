//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with the HuggingFace
//!   tokenizers crate. Used by the server and the indexer.
//! - `MockEmbedding` produces deterministic hash-based vectors for tests.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use parley_core::error::ParleyError;

/// Dimensionality of all-MiniLM-L6-v2, also used by [`MockEmbedding`].
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Longest token sequence fed to the model; longer input is truncated.
pub const MAX_SEQUENCE_TOKENS: usize = 256;

/// Service turning text into fixed-dimensional vectors.
///
/// The same service must be used to build an index and to query it.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, ParleyError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Boxed future returned by [`DynEmbeddingService::embed_boxed`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Every `EmbeddingService` implements it through the blanket impl below, so
/// callers can hold a `Box<dyn DynEmbeddingService>` without generics.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed sentence-transformer.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// The model takes `input_ids`, `attention_mask` and `token_type_ids` (i64,
/// shape `[1, seq_len]`) and returns token embeddings `[1, seq_len, hidden]`,
/// which are mean-pooled over the attention mask and L2-normalized.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// SAFETY: the ort Session is only reached through the Mutex, and the
// tokenizer is read-only after loading.
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self, ParleyError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, ParleyError> {
        for (what, path) in [("ONNX model", model_path), ("Tokenizer", tokenizer_path)] {
            if !path.exists() {
                return Err(ParleyError::Embedding(format!(
                    "{} not found at {}",
                    what,
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| ParleyError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| ParleyError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| ParleyError::Embedding(format!("Failed to load ONNX model: {}", e)))?;

        // Last axis of [batch, seq_len, hidden]; dynamic axes report -1.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_DIMENSIONS);

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ParleyError::Embedding(format!("Failed to load tokenizer: {}", e)))?;
        cap_truncation(&mut tokenizer, MAX_SEQUENCE_TOKENS)?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        if text.trim().is_empty() {
            return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ParleyError::Embedding(format!("Tokenization failed: {}", e)))?;

        let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<i64>>();
        let attention_mask = to_i64(encoding.get_attention_mask());
        let seq_len = attention_mask.len();

        let as_batch = |name: &str, values: Vec<i64>| {
            ndarray::Array2::from_shape_vec((1, seq_len), values)
                .map_err(|e| ParleyError::Embedding(format!("{} array: {}", name, e)))
        };
        let ids = as_batch("input_ids", to_i64(encoding.get_ids()))?;
        let mask = as_batch("attention_mask", attention_mask.clone())?;
        let types = as_batch("token_type_ids", to_i64(encoding.get_type_ids()))?;

        let ids_ref = tensor_ref(&ids)?;
        let mask_ref = tensor_ref(&mask)?;
        let types_ref = tensor_ref(&types)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ParleyError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, types_ref])
            .map_err(|e| ParleyError::Embedding(format!("ONNX inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ParleyError::Embedding(format!("Extract embeddings: {}", e)))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let hidden = match dims.last() {
            Some(&d) if dims.len() >= 2 && d > 0 => d as usize,
            _ => {
                return Err(ParleyError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    dims
                )))
            }
        };

        let mut pooled = mean_pool(data, &attention_mask, hidden);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        // Inference is CPU-bound; keep it off the async workers.
        let service = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || service.embed_sync(&text))
            .await
            .map_err(|e| ParleyError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Limit encodings to `max_length` tokens unless the tokenizer already
/// truncates shorter.
fn cap_truncation(tokenizer: &mut Tokenizer, max_length: usize) -> Result<(), ParleyError> {
    let params = match tokenizer.get_truncation() {
        Some(existing) if existing.max_length <= max_length => return Ok(()),
        Some(existing) => TruncationParams {
            max_length,
            ..existing.clone()
        },
        None => TruncationParams {
            max_length,
            ..TruncationParams::default()
        },
    };
    tokenizer
        .with_truncation(Some(params))
        .map_err(|e| ParleyError::Embedding(format!("Failed to set truncation: {}", e)))?;
    Ok(())
}

fn tensor_ref(array: &ndarray::Array2<i64>) -> Result<TensorRef<'_, i64>, ParleyError> {
    TensorRef::from_array_view(array)
        .map_err(|e| ParleyError::Embedding(format!("Tensor conversion: {}", e)))
}

/// Average the token vectors whose attention mask is set.
///
/// `tokens` is the row-major `[seq_len, hidden]` output for one input.
fn mean_pool(tokens: &[f32], attention_mask: &[i64], hidden: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden];
    let mut count = 0usize;

    for (token, &mask) in tokens.chunks_exact(hidden).zip(attention_mask) {
        if mask > 0 {
            for (acc, value) in pooled.iter_mut().zip(token) {
                *acc += value;
            }
            count += 1;
        }
    }

    if count > 0 {
        for value in &mut pooled {
            *value /= count as f32;
        }
    }
    pooled
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Deterministic embedding for tests.
///
/// Vectors are derived from a hash of the input, so identical texts map to
/// identical unit vectors and different texts to (almost surely) different ones.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut vector: Vec<f32> = (0..DEFAULT_DIMENSIONS)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        if text.trim().is_empty() {
            return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }
}
