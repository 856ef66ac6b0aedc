//! Embedding backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use worldgraph_core::config::{EmbeddingBackendConfig, EmbeddingConfig};
use worldgraph_core::{WorldgraphError, WorldgraphResult};

use crate::text::tokenize_text;

/// Turns chunk and query text into fixed-length vectors.
///
/// The same embedder must be used for chunks and queries; the index records
/// `model_id()` and `dimensions()` and refuses to mix them.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> WorldgraphResult<Vec<Vec<f32>>>;
}

pub fn build_embedder(config: &EmbeddingConfig) -> WorldgraphResult<Arc<dyn Embedder>> {
    match &config.backend {
        EmbeddingBackendConfig::TokenHash => Ok(Arc::new(TokenHashEmbedder::new(config.dimensions))),
        EmbeddingBackendConfig::OpenAi {
            base_url, model, ..
        } => {
            let api_key = config.backend.api_key()?.unwrap_or_default();
            Ok(Arc::new(OpenAiEmbedder::new(
                base_url.clone(),
                model.clone(),
                api_key,
                config.dimensions,
            )?))
        }
    }
}

/// Check a batch returned by an embedder.
pub(crate) fn verify_batch(
    embedder: &dyn Embedder,
    expected: usize,
    vectors: &[Vec<f32>],
) -> WorldgraphResult<()> {
    if vectors.len() != expected {
        return Err(WorldgraphError::upstream(format!(
            "embedder {} returned {} vectors for {expected} inputs",
            embedder.model_id(),
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dimensions()) {
        return Err(WorldgraphError::upstream(format!(
            "embedder {} returned {} dimensions, expected {}",
            embedder.model_id(),
            bad.len(),
            embedder.dimensions()
        )));
    }
    Ok(())
}

// ============================================================================
// Token-hash embedder
// ============================================================================

/// Signed feature hashing over name-aware tokens, L2-normalized.
///
/// Deterministic and offline: texts sharing tokens get a positive cosine
/// similarity, texts sharing none get zero.
#[derive(Debug, Clone)]
pub struct TokenHashEmbedder {
    dimensions: usize,
    model_id: String,
}

impl TokenHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_id: format!("token-hash-fnv1a64-v1/{}", dimensions.max(1)),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in tokenize_text(text) {
            let h = fnv1a64(&token);
            let idx = (h % self.dimensions as u64) as usize;
            let sign = if ((h >> 32) & 1) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm2: f32 = v.iter().map(|x| x * x).sum();
        if norm2 > 0.0 {
            let inv = 1.0 / norm2.sqrt();
            for x in v.iter_mut() {
                *x *= inv;
            }
        }
        v
    }
}

fn fnv1a64(s: &str) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET_BASIS;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[async_trait]
impl Embedder for TokenHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> WorldgraphResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============================================================================
// OpenAI-compatible embedder
// ============================================================================

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> WorldgraphResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()
            .map_err(|e| WorldgraphError::upstream(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> WorldgraphResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimensions,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorldgraphError::upstream(format!("failed to reach {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorldgraphError::upstream(format!(
                "embedding request failed ({status}): {text}"
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|item| item.embedding).collect();
        verify_batch(self, texts.len(), &vectors)?;
        Ok(vectors)
    }
}
