use crate::core::error::{Error, Result};
use crate::search::provider::{dot, Content, EmbeddingProvider};
use crate::storage::vectors::{QuerySnapshot, VectorStore};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

/// One ranked result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Cosine similarity
    pub score: f32,
    pub path: PathBuf,
    /// Preview text, empty for images and audio
    pub text: String,
}

/// Embeds queries and ranks store rows against them
pub struct QueryEngine {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl QueryEngine {
    pub fn new(store: Arc<VectorStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, provider }
    }

    /// Top `k` entries for `query`, best first.
    ///
    /// An empty store yields `Ok(vec![])`; a query that cannot be embedded is
    /// an `Embedding` error.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(Error::Embedding("query is empty".to_string()));
        }

        let query_vector = self
            .provider
            .embed(&Content::Text(query.to_string()))
            .map_err(|e| match e {
                Error::Embedding(_) => e,
                other => Error::Embedding(other.to_string()),
            })?;

        let snapshot = self.store.snapshot_for_query()?;
        search_snapshot(&snapshot, &query_vector, k)
    }
}

/// Rank every row of `snapshot` against an already-embedded query
pub fn search_snapshot(snapshot: &QuerySnapshot, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
    if snapshot.is_empty() || k == 0 {
        return Ok(Vec::new());
    }
    if query.len() != snapshot.dimension {
        return Err(Error::DimensionMismatch {
            expected: snapshot.dimension,
            got: query.len(),
        });
    }

    // Min-heap (via reversed ordering): worst kept candidate at the top
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
    for row in 0..snapshot.rows() {
        heap.push(Candidate {
            score: dot(query, snapshot.row(row)),
            row,
        });
        if heap.len() > k {
            heap.pop();
        }
    }

    // Ascending in the reversed order is best first
    let ranked = heap.into_sorted_vec();

    Ok(ranked
        .into_iter()
        .map(|c| {
            let path = snapshot.paths[c.row].clone();
            let text = snapshot.text(&path).to_string();
            SearchHit {
                score: c.score,
                path,
                text,
            }
        })
        .collect())
}

/// Scored row; ordered so that "greater" means "ranks worse"
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    row: usize,
}

impl Candidate {
    /// Higher score first, then earlier row
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.row.cmp(&other.row))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank_cmp(other)
    }
}
