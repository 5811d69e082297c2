//! KBQA Common Library
//!
//! Shared code for the KBQA crates including:
//! - Error types and handling
//! - Configuration management
//! - Embedding client abstraction
//! - Language model client abstraction
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
