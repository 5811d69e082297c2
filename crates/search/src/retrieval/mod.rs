//! Passage retrieval
//!
//! Dense retrieval over an in-memory embedding index:
//! - Cosine similarity between the query vector and every passage vector
//! - Ties broken by corpus order

mod vector;

pub use vector::{cosine_similarity, EmbeddingIndex};

use kbqa_ingestion::Passage;
use serde::Serialize;

/// Retrieved passage with relevance score
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    /// The matching passage
    pub passage: Passage,

    /// Cosine similarity to the query (-1.0 - 1.0)
    pub score: f32,
}

impl RetrievedPassage {
    pub fn text(&self) -> &str {
        &self.passage.text
    }
}
