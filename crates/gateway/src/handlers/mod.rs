//! API handlers module

pub mod health;
pub mod knowledge;
pub mod metrics;
