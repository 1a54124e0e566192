#![allow(dead_code)]

use latent_search::{Content, EmbeddingProvider, HashingEmbedder, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hashing embedder that counts how often it is asked to embed
pub struct CountingProvider {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimension).unwrap(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for CountingProvider {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, content: &Content) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(content)
    }
}

/// Provider returning preset vectors for known texts
pub struct FixedProvider {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl FixedProvider {
    pub fn new(dimension: usize, vectors: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: vectors
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            dimension,
        }
    }
}

impl EmbeddingProvider for FixedProvider {
    fn model_id(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, content: &Content) -> Result<Vec<f32>> {
        match content {
            Content::Text(text) => self
                .vectors
                .get(text.trim())
                .cloned()
                .ok_or_else(|| latent_search::Error::Embedding(format!("unknown text {:?}", text))),
            other => Err(latent_search::Error::Embedding(format!(
                "unsupported {}",
                other.kind_name()
            ))),
        }
    }
}
