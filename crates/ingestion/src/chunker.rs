//! Text chunking module
//!
//! Splits the corpus into overlapping passages for embedding. Each window is cut
//! at the largest structural boundary it contains: paragraph, then sentence,
//! then word, and only then at a hard character limit. Every passage after the
//! first starts with the last `chunk_overlap` characters of its predecessor, so
//! dropping that prefix and concatenating gives back the corpus exactly.

use crate::corpus::Corpus;
use kbqa_common::config::CorpusConfig;
use kbqa_common::errors::{AppError, Result};
use regex_lite::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Configuration for text chunking. Sizes are in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum passage length
    pub chunk_size: usize,
    /// Characters shared by adjacent passages
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl From<&CorpusConfig> for ChunkingConfig {
    fn from(config: &CorpusConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}

/// A contiguous slice of the corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    /// The passage content
    pub text: String,
    /// Position of this passage in the corpus, from 0
    pub ordinal: usize,
    /// Source the corpus was read from
    pub source: String,
    /// Start byte offset in the corpus text
    pub start: usize,
    /// End byte offset (exclusive) in the corpus text
    pub end: usize,
}

impl Passage {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Which boundary a window was cut at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Paragraph,
    Sentence,
    Word,
    Hard,
}

/// Overlapping passage splitter
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(AppError::Configuration {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(AppError::Configuration {
                message: format!(
                    "chunk_overlap ({}) must be smaller than chunk_size ({})",
                    config.chunk_overlap, config.chunk_size
                ),
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily iterate the passages of `corpus`. Calling this again restarts from the beginning.
    pub fn passages<'a>(&self, corpus: &'a Corpus) -> Passages<'a> {
        Passages {
            text: corpus.text(),
            source: corpus.source(),
            chunk_size: self.config.chunk_size,
            overlap: self.config.chunk_overlap,
            position: Some(0),
            ordinal: 0,
        }
    }

    /// Collect every passage of `corpus`
    pub fn split(&self, corpus: &Corpus) -> Vec<Passage> {
        let passages: Vec<Passage> = self.passages(corpus).collect();

        tracing::debug!(
            source = corpus.source(),
            input_len = corpus.text().len(),
            passage_count = passages.len(),
            chunk_size = self.config.chunk_size,
            chunk_overlap = self.config.chunk_overlap,
            "Corpus chunked"
        );

        passages
    }
}

/// Iterator over the passages of one corpus
#[derive(Debug, Clone)]
pub struct Passages<'a> {
    text: &'a str,
    source: &'a str,
    chunk_size: usize,
    overlap: usize,
    /// Byte offset of the next passage; `None` once exhausted
    position: Option<usize>,
    ordinal: usize,
}

impl<'a> Passages<'a> {
    fn emit(&mut self, start: usize, end: usize) -> Passage {
        let passage = Passage {
            text: self.text[start..end].to_string(),
            ordinal: self.ordinal,
            source: self.source.to_string(),
            start,
            end,
        };
        self.ordinal += 1;
        passage
    }
}

impl<'a> Iterator for Passages<'a> {
    type Item = Passage;

    fn next(&mut self) -> Option<Passage> {
        let start = self.position?;
        let text = self.text;
        let rest = &text[start..];
        if rest.is_empty() {
            self.position = None;
            return None;
        }

        let limit = match rest.char_indices().nth(self.chunk_size) {
            Some((offset, _)) => start + offset,
            None => {
                // Remainder fits in one passage
                self.position = None;
                return Some(self.emit(start, text.len()));
            }
        };

        // A cut must keep more than `overlap` characters so the next passage moves forward.
        let min_cut = rest
            .char_indices()
            .nth(self.overlap + 1)
            .map_or(limit, |(offset, _)| start + offset);

        let (cut, boundary) = find_cut(&text[start..limit], min_cut - start);
        let cut = start + cut;

        tracing::trace!(ordinal = self.ordinal, start, cut, ?boundary, "Passage boundary");

        let passage = self.emit(start, cut);
        self.position = Some(retreat(text, cut, self.overlap));
        Some(passage)
    }
}

/// Pick the cut point inside `window`, as a byte offset no smaller than `min_cut`.
fn find_cut(window: &str, min_cut: usize) -> (usize, Boundary) {
    if let Some(cut) = window.rfind("\n\n").map(|i| i + 2) {
        if cut >= min_cut {
            return (cut, Boundary::Paragraph);
        }
    }

    if let Some(cut) = sentence_end().find_iter(window).map(|m| m.end()).last() {
        if cut >= min_cut {
            return (cut, Boundary::Sentence);
        }
    }

    if let Some((i, c)) = window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        let cut = i + c.len_utf8();
        if cut >= min_cut {
            return (cut, Boundary::Word);
        }
    }

    (window.len(), Boundary::Hard)
}

/// Byte offset `chars` characters before `pos`
fn retreat(text: &str, pos: usize, chars: usize) -> usize {
    if chars == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .nth(chars - 1)
        .map_or(0, |(i, _)| i)
}

fn sentence_end() -> &'static Regex {
    static SENTENCE_END: OnceLock<Regex> = OnceLock::new();
    SENTENCE_END.get_or_init(|| {
        Regex::new(r#"[.!?]["')\]]*\s+"#).expect("sentence boundary pattern is valid")
    })
}
