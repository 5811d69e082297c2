//! KBQA Ingestion
//!
//! Reads the knowledge corpus and splits it into overlapping passages:
//! 1. A `CorpusSource` loads the raw text
//! 2. The `Chunker` cuts it at paragraph, sentence or word boundaries

pub mod chunker;
pub mod corpus;

pub use chunker::{Chunker, ChunkingConfig, Passage, Passages};
pub use corpus::{Corpus, CorpusSource, FileCorpusSource, StaticCorpusSource};
