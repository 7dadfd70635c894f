//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: calls the `/embeddings` endpoint of an OpenAI-compatible API.
//! - **[`HashingEmbedder`]**: deterministic bag-of-words feature hashing; offline, no model.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding used by the persisted index
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named in the
//! configuration:
//!
//! ```rust
//! # use docqa::config::Config;
//! # use docqa::embedding::create_embedder;
//! let mut config = Config::minimal();
//! config.embedding.provider = "disabled".to_string();
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Failures
//!
//! Embedding failures (missing credential, quota, network, malformed
//! response) are not retried. They surface as
//! [`ServiceError::EmbeddingUnavailable`] or
//! [`ServiceError::CredentialMissing`].

use anyhow::bail;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::ServiceError;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `3072`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Embed `texts` in batches of at most `batch_size`.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(ServiceError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != embedder.dims()) {
            return Err(ServiceError::EmbeddingUnavailable(format!(
                "expected {}-dimensional embeddings, got {}",
                embedder.dims(),
                v.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, ServiceError> {
    embed_batched(embedder, &[text.to_string()], 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::EmbeddingUnavailable("empty embedding response".to_string()))
}

/// Instantiate the provider named by `embedding.provider`.
pub fn create_embedder(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config))),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.embedding.dims.unwrap_or(HashingEmbedder::DEFAULT_DIMS),
        ))),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::EmbeddingUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using an OpenAI-compatible `POST /embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: ApiClient,
    model: String,
    dims: usize,
    /// Send an explicit `dimensions` request field (shortened embeddings).
    explicit_dims: bool,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Self {
        let model = config.embedding.model.clone();
        let native = native_dims(&model);
        let dims = config.embedding.dims.unwrap_or(native);
        Self {
            client: ApiClient::new(&config.api),
            explicit_dims: dims != native,
            model,
            dims,
        }
    }
}

/// Output size of the known OpenAI embedding models.
fn native_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if self.explicit_dims {
            body["dimensions"] = serde_json::json!(self.dims);
        }

        let json = self
            .client
            .post_json("embeddings", &body, ServiceError::EmbeddingUnavailable)
            .await?;
        parse_openai_response(&json)
    }
}

/// Parse the embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and orders them by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    let invalid = |what: &str| ServiceError::EmbeddingUnavailable(format!("invalid response: {}", what));

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|x| x as f32)
                    .ok_or_else(|| invalid("non-numeric embedding value"))
            })
            .collect::<Result<Vec<f32>, _>>()?;
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hashing Provider ============

/// Deterministic, offline embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed into one of `dims` buckets
/// with a hash-derived sign; the resulting count vector is L2-normalized.
/// Texts sharing vocabulary land close together, which is enough for
/// keyword-flavoured retrieval without any network access.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMS: usize = 256;

    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths and zero vectors.
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
