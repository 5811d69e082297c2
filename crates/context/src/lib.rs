//! KBQA Context Engine
//!
//! Turns a question into a grounded answer:
//! - Prompt assembly from retrieved passages
//! - The retrieval-augmented answering pipeline

pub mod pipeline;
pub mod prompt;

pub use pipeline::{Answer, AnsweringPipeline, PipelineOptions};
pub use prompt::NOT_FOUND_MESSAGE;
