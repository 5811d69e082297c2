//! Corpus loading
//!
//! The knowledge corpus is one block of UTF-8 text read from a single source.

use async_trait::async_trait;
use kbqa_common::errors::{AppError, Result};
use kbqa_common::metrics;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// The full knowledge text and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    source: String,
    text: String,
}

impl Corpus {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Where the corpus is read from
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Read the whole corpus. Failures are `AppError::CorpusUnavailable`.
    async fn load(&self) -> Result<Corpus>;

    /// Human-readable source reference
    fn describe(&self) -> String;
}

/// Reads the corpus from a text file
#[derive(Debug, Clone)]
pub struct FileCorpusSource {
    path: PathBuf,
}

impl FileCorpusSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn unavailable(&self, message: String) -> AppError {
        AppError::CorpusUnavailable {
            source_path: self.describe(),
            message,
        }
    }
}

#[async_trait]
impl CorpusSource for FileCorpusSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Corpus> {
        let result = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|e| self.unavailable(format!("corpus is not valid UTF-8: {}", e))),
            Err(e) => Err(self.unavailable(e.to_string())),
        };

        metrics::record_corpus_load(result.is_ok());

        match result {
            Ok(text) => {
                info!(bytes = text.len(), "Corpus loaded");
                Ok(Corpus::new(self.describe(), text))
            }
            Err(e) => {
                warn!(error = %e, "Corpus read failed");
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Serves a corpus held in memory
#[derive(Debug, Clone)]
pub struct StaticCorpusSource {
    corpus: Corpus,
}

impl StaticCorpusSource {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            corpus: Corpus::new(source, text),
        }
    }
}

#[async_trait]
impl CorpusSource for StaticCorpusSource {
    async fn load(&self) -> Result<Corpus> {
        metrics::record_corpus_load(true);
        Ok(self.corpus.clone())
    }

    fn describe(&self) -> String {
        self.corpus.source.clone()
    }
}
