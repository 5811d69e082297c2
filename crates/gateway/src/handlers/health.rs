//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use kbqa_search::KnowledgeStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub knowledge: KnowledgeStats,
}

/// Liveness check: always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: kbqa_common::VERSION.to_string(),
    })
}

/// Readiness check: reports whether the knowledge index has been built.
/// Does not trigger a build.
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let knowledge = state.pipeline.knowledge().stats().await;

    Json(ReadyResponse {
        status: if knowledge.ready { "ready" } else { "not_ready" }.to_string(),
        knowledge,
    })
}
