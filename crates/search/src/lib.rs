//! KBQA Search
//!
//! In-memory dense retrieval for the knowledge base:
//! - `EmbeddingIndex`: passages plus vectors, cosine top-k search
//! - `KnowledgeBase`: lazily builds the index exactly once and shares it

pub mod knowledge;
pub mod retrieval;

pub use knowledge::{KnowledgeBase, KnowledgeStats};
pub use retrieval::{EmbeddingIndex, RetrievedPassage};
