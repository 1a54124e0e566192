//! The embedding seam.
//!
//! Everything that turns content into vectors sits behind [`EmbeddingProvider`]:
//! the store, reconciler and query engine only ever see unit-length `Vec<f32>`
//! of the provider's fixed dimension.

use crate::core::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Raw content handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Image(Vec<u8>),
    Audio(Vec<u8>),
}

impl Content {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Image(_) => "image",
            Content::Audio(_) => "audio",
        }
    }
}

/// Maps content to a unit-norm vector of `dimension()` values.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the model weights; a change invalidates stored vectors.
    fn model_id(&self) -> &str;

    /// Output dimension D
    fn dimension(&self) -> usize;

    fn embed(&self, content: &Content) -> Result<Vec<f32>>;
}

/// L2-normalize `v` in place. Fails on a zero vector.
pub fn normalize(v: &mut [f32]) -> Result<()> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return Err(Error::Embedding("cannot normalize a zero vector".to_string()));
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Hashed bag-of-words embedder.
///
/// Each lowercased whitespace token increments bucket `sha256(token) mod D`;
/// the counts are L2-normalized. Needs no model download, so it serves as an
/// offline fallback. Only text is supported.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

/// Dimension of the default hashing embedder
const DEFAULT_HASHING_DIMENSION: usize = 384;

impl HashingEmbedder {
    /// `dimension` buckets; zero is rejected since every token needs one
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Embedding(
                "hashing embedder needs at least one dimension".to_string(),
            ));
        }
        Ok(Self::with_dimension(dimension))
    }

    fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hashing-bow-{}", dimension),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::with_dimension(DEFAULT_HASHING_DIMENSION)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, content: &Content) -> Result<Vec<f32>> {
        let text = match content {
            Content::Text(text) => text,
            other => {
                return Err(Error::Embedding(format!(
                    "{} does not support {} content",
                    self.model_id,
                    other.kind_name()
                )))
            }
        };

        let mut vector = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;
        for token in text.split_whitespace() {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            return Err(Error::Embedding("no tokens to embed".to_string()));
        }

        normalize(&mut vector)?;
        Ok(vector)
    }
}

/// Dot product of two equal-length vectors; cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
