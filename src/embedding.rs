//! Embedding strategies and vector utilities.
//!
//! Two interchangeable strategies sit behind [`EmbeddingStrategy`]:
//!
//! - **[`OpenAiEmbeddings`]** — calls the remote embeddings endpoint.
//! - **[`HashEmbeddings`]** — a deterministic 128-dimension bag-of-words
//!   hash embedder that needs no network access. Identical text always
//!   yields an identical vector, which keeps reindexing reproducible in
//!   tests and keeps retrieval working when no remote engine is configured.
//!
//! [`embed_texts`] selects the remote strategy when configured and falls
//! back to the hash strategy on failure or an empty response; a batch never
//! mixes strategies, and the resulting model id is stored per chunk so a
//! mixed history can be audited later.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codec for
//!   SQLite storage

use anyhow::Result;
use async_trait::async_trait;

use crate::config::OpenAiConfig;
use crate::openai;

/// Dimensionality of the deterministic hash embedding.
pub const HASH_EMBEDDING_DIM: usize = 128;

/// Model identifier stored for vectors produced by [`HashEmbeddings`].
pub const HASH_MODEL_ID: &str = "mock-bow-128";

/// A batch text-embedding backend.
#[async_trait]
pub trait EmbeddingStrategy: Send + Sync {
    /// Identifier persisted alongside each vector this strategy produces.
    fn model_id(&self) -> &str;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Remote embeddings via the configured engine.
pub struct OpenAiEmbeddings {
    config: OpenAiConfig,
}

impl OpenAiEmbeddings {
    pub fn new(config: OpenAiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EmbeddingStrategy for OpenAiEmbeddings {
    fn model_id(&self) -> &str {
        &self.config.embed_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        openai::generate_embeddings(&self.config, texts).await
    }
}

/// Deterministic bag-of-words hash embedder.
pub struct HashEmbeddings;

#[async_trait]
impl EmbeddingStrategy for HashEmbeddings {
    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embedding(t)).collect())
    }
}

/// An embedded batch together with the strategy that produced it.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model_id: String,
}

/// Embed a batch of texts, preferring the remote strategy when configured.
///
/// A remote failure or a response with the wrong cardinality degrades to the
/// hash strategy instead of propagating an error; the whole batch is then
/// re-embedded so one pass never mixes strategies.
pub async fn embed_texts(config: &OpenAiConfig, texts: &[String]) -> EmbeddingBatch {
    if texts.is_empty() {
        let model_id = if config.is_enabled() {
            config.embed_model.clone()
        } else {
            HASH_MODEL_ID.to_string()
        };
        return EmbeddingBatch {
            vectors: Vec::new(),
            model_id,
        };
    }

    if config.is_enabled() {
        let remote = OpenAiEmbeddings::new(config.clone());
        match remote.embed(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return EmbeddingBatch {
                    vectors,
                    model_id: remote.model_id().to_string(),
                };
            }
            Ok(vectors) => {
                tracing::warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "remote embedding returned wrong cardinality, using hash fallback"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote embedding failed, using hash fallback");
            }
        }
    }

    EmbeddingBatch {
        vectors: texts.iter().map(|t| hash_embedding(t)).collect(),
        model_id: HASH_MODEL_ID.to_string(),
    }
}

/// Embed a single query text. Same selection and fallback policy as
/// [`embed_texts`].
pub async fn embed_query(config: &OpenAiConfig, text: &str) -> (Vec<f32>, String) {
    let batch = embed_texts(config, &[text.to_string()]).await;
    let model_id = batch.model_id.clone();
    match batch.vectors.into_iter().next() {
        Some(v) => (v, model_id),
        None => (hash_embedding(text), HASH_MODEL_ID.to_string()),
    }
}

/// Compute the deterministic 128-dimension hash embedding of a text:
/// lowercase, whitespace-tokenize, bump the hashed slot per token, then
/// L2-normalize. Empty text yields the zero vector.
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; HASH_EMBEDDING_DIM];
    for token in text.to_lowercase().split_whitespace() {
        let slot = hash_token(token) as usize % HASH_EMBEDDING_DIM;
        vector[slot] += 1.0;
    }
    l2_normalize(&mut vector);
    vector
}

/// Polynomial string hash (base 31, wrapping i32), absolute value.
fn hash_token(token: &str) -> u32 {
    let mut hash: i32 = 0;
    for c in token.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(c as i32);
    }
    hash.unsigned_abs()
}

/// Normalize in place; a zero norm is treated as 1 so the zero vector
/// stays zero instead of becoming NaN.
fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    for v in vector.iter_mut() {
        *v /= norm;
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or when
/// either norm is zero — never divides by zero, never panics.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
