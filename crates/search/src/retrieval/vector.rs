//! Vector similarity search over an in-memory index
//!
//! The index is built once from the full passage list and never patched.
//! A rebuild produces a new `EmbeddingIndex` that replaces the old one.

use super::RetrievedPassage;
use chrono::{DateTime, Utc};
use kbqa_common::embeddings::Embedder;
use kbqa_common::errors::{AppError, Result};
use kbqa_ingestion::Passage;
use std::cmp::Ordering;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct IndexEntry {
    passage: Passage,
    vector: Vec<f32>,
}

/// Immutable collection of passages and their embedding vectors
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
    model: String,
    built_at: DateTime<Utc>,
}

impl EmbeddingIndex {
    /// Embed every passage and assemble the index.
    ///
    /// Either every passage gets a vector or the whole build fails with
    /// `AppError::EmbeddingFailure`.
    #[instrument(skip_all, fields(passages = passages.len(), model = embedder.model_name()))]
    pub async fn build(
        passages: Vec<Passage>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(batch_size.max(1)).enumerate() {
            let embedded = embedder.embed_batch(batch).await.map_err(as_embedding_failure)?;

            if embedded.len() != batch.len() {
                return Err(AppError::embedding(format!(
                    "Expected {} embeddings in batch {}, got {}",
                    batch.len(),
                    batch_no,
                    embedded.len()
                )));
            }

            debug!(batch = batch_no, size = batch.len(), "Embedded passage batch");
            vectors.extend(embedded);
        }

        let dimension = match vectors.first() {
            Some(first) => first.len(),
            None => embedder.dimension(),
        };

        for (i, vector) in vectors.iter().enumerate() {
            validate_vector(vector, dimension)
                .map_err(|reason| AppError::embedding(format!("Passage {}: {}", i, reason)))?;
        }

        let entries = passages
            .into_iter()
            .zip(vectors)
            .map(|(passage, vector)| IndexEntry { passage, vector })
            .collect();

        Ok(Self {
            entries,
            dimension,
            model: embedder.model_name().to_string(),
            built_at: Utc::now(),
        })
    }

    /// Top `k` passages by cosine similarity to `query`, most similar first.
    /// Equal scores keep corpus order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedPassage> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.vector)))
            .collect();

        scored.sort_by(|(a_idx, a_score), (b_idx, b_score)| {
            match b_score.total_cmp(a_score) {
                Ordering::Equal => self.entries[*a_idx]
                    .passage
                    .ordinal
                    .cmp(&self.entries[*b_idx].passage.ordinal),
                other => other,
            }
        });

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievedPassage {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding model the vectors came from
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Indexed passages in corpus order
    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.entries.iter().map(|e| &e.passage)
    }

    /// Stored vector of the passage at `position`
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.entries.get(position).map(|e| e.vector.as_slice())
    }
}

fn as_embedding_failure(err: AppError) -> AppError {
    match err {
        AppError::EmbeddingFailure { .. } => err,
        other => AppError::embedding(other.to_string()),
    }
}

fn validate_vector(vector: &[f32], dimension: usize) -> std::result::Result<(), String> {
    if vector.is_empty() {
        return Err("empty embedding".to_string());
    }
    if vector.len() != dimension {
        return Err(format!(
            "dimension {} does not match {}",
            vector.len(),
            dimension
        ));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err("non-finite embedding component".to_string());
    }
    Ok(())
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
