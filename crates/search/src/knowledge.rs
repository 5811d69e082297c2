//! Lazily built knowledge base
//!
//! Owns the process-wide embedding index. The first `ensure_ready` call reads
//! the corpus, chunks it and builds the index; every later call returns the
//! same index. Builds are serialized by a single guard, so concurrent callers
//! wait for the build in flight instead of starting their own. Callers that
//! waited on a failed build get that build's error; the next call after it
//! starts over.

use crate::retrieval::EmbeddingIndex;
use chrono::{DateTime, Utc};
use kbqa_common::embeddings::Embedder;
use kbqa_common::errors::{AppError, Result};
use kbqa_common::metrics;
use kbqa_ingestion::{Chunker, CorpusSource};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Snapshot of the knowledge base state
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub ready: bool,
    pub source: String,
    pub passages: usize,
    pub dimension: Option<usize>,
    pub model: Option<String>,
    pub builds: u64,
    pub built_at: Option<DateTime<Utc>>,
}

pub struct KnowledgeBase {
    source: Arc<dyn CorpusSource>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    index: RwLock<Option<Arc<EmbeddingIndex>>>,
    /// Serializes builds and holds the error of the last finished attempt
    build_guard: Mutex<Option<AppError>>,
    /// Finished build attempts, successful or not
    attempts: AtomicU64,
    builds: AtomicU64,
}

impl KnowledgeBase {
    pub fn new(
        source: Arc<dyn CorpusSource>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            chunker,
            embedder,
            batch_size: batch_size.max(1),
            index: RwLock::new(None),
            build_guard: Mutex::new(None),
            attempts: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    /// The embedder the index is (or will be) built with
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Return the built index, building it first if needed.
    ///
    /// Fails with `CorpusUnavailable` or `EmbeddingFailure`; a failed build
    /// leaves nothing behind. Callers queued behind it share its error and
    /// the next call starts over.
    pub async fn ensure_ready(&self) -> Result<Arc<EmbeddingIndex>> {
        if let Some(index) = self.index().await {
            return Ok(index);
        }

        let observed = self.attempts.load(Ordering::SeqCst);
        let mut last_failure = self.build_guard.lock().await;

        // Another caller may have finished the build while we waited.
        if let Some(index) = self.index().await {
            debug!("Index built by concurrent caller");
            return Ok(index);
        }
        if self.attempts.load(Ordering::SeqCst) != observed {
            if let Some(err) = last_failure.as_ref() {
                debug!(error = %err, "Sharing failure of concurrent build");
                return Err(err.duplicate());
            }
        }

        let index = self.attempt(&mut last_failure).await?;
        *self.index.write().await = Some(index.clone());
        Ok(index)
    }

    /// Build a fresh index and swap it in. The current index keeps serving
    /// until the new one is ready; on failure it stays in place.
    pub async fn rebuild(&self) -> Result<Arc<EmbeddingIndex>> {
        let mut last_failure = self.build_guard.lock().await;

        let index = self.attempt(&mut last_failure).await?;
        *self.index.write().await = Some(index.clone());
        Ok(index)
    }

    /// Drop the cached index; the next `ensure_ready` rebuilds it.
    pub async fn invalidate(&self) {
        let _guard = self.build_guard.lock().await;
        if self.index.write().await.take().is_some() {
            info!(source = %self.source.describe(), "Knowledge index invalidated");
        }
    }

    /// Current index without triggering a build
    pub async fn index(&self) -> Option<Arc<EmbeddingIndex>> {
        self.index.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.index.read().await.is_some()
    }

    pub async fn stats(&self) -> KnowledgeStats {
        let index = self.index().await;
        KnowledgeStats {
            ready: index.is_some(),
            source: self.source.describe(),
            passages: index.as_ref().map_or(0, |i| i.len()),
            dimension: index.as_ref().map(|i| i.dimension()),
            model: index.as_ref().map(|i| i.model().to_string()),
            builds: self.builds.load(Ordering::Relaxed),
            built_at: index.as_ref().map(|i| i.built_at()),
        }
    }

    /// Run one build and record its outcome. Callers pass the locked guard.
    async fn attempt(&self, last_failure: &mut Option<AppError>) -> Result<Arc<EmbeddingIndex>> {
        let result = self.build().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(index) => {
                *last_failure = None;
                Ok(Arc::new(index))
            }
            Err(e) => {
                *last_failure = Some(e.duplicate());
                Err(e)
            }
        }
    }

    /// Read, chunk and embed. Callers must hold the build guard.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    async fn build(&self) -> Result<EmbeddingIndex> {
        let start = Instant::now();

        let result = async {
            let corpus = self.source.load().await?;
            let passages = self.chunker.split(&corpus);
            EmbeddingIndex::build(passages, self.embedder.as_ref(), self.batch_size).await
        }
        .await;

        let elapsed = start.elapsed().as_secs_f64();
        match &result {
            Ok(index) => {
                self.builds.fetch_add(1, Ordering::Relaxed);
                metrics::record_index_build(elapsed, index.len(), true);
                info!(
                    passages = index.len(),
                    dimension = index.dimension(),
                    chunk_size = self.chunker.config().chunk_size,
                    duration_ms = (elapsed * 1000.0) as u64,
                    "Knowledge index built"
                );
            }
            Err(e) => {
                metrics::record_index_build(elapsed, 0, false);
                warn!(error = %e, "Knowledge index build failed");
            }
        }

        result
    }
}
