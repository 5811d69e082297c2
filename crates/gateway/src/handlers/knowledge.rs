//! Question answering handlers

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use kbqa_common::errors::{AppError, Result};
use kbqa_context::Answer;
use kbqa_search::KnowledgeStats;

/// Question request
#[derive(Debug, Deserialize, Validate)]
pub struct KnowledgeRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,
}

/// Reload response
#[derive(Serialize)]
pub struct ReloadResponse {
    pub status: String,
    pub knowledge: KnowledgeStats,
}

/// Answer a question from the knowledge base
pub async fn ask(
    State(state): State<AppState>,
    payload: std::result::Result<Json<KnowledgeRequest>, JsonRejection>,
) -> Result<Json<Answer>> {
    let Json(request) = payload.map_err(|e| AppError::validation(e.body_text(), None))?;

    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string(), Some("question")))?;

    let answer = state.pipeline.answer(&request.question).await?;
    Ok(Json(answer))
}

/// Re-read the corpus and swap in a freshly built index
pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let knowledge = state.pipeline.knowledge();
    let index = knowledge.rebuild().await?;

    tracing::info!(passages = index.len(), "Knowledge base reloaded");

    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
        knowledge: knowledge.stats().await,
    }))
}
