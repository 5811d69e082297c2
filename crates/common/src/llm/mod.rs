//! Language model client abstraction
//!
//! A chat-completion style boundary: role-tagged messages in, generated text out.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A complete generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Trait for text generation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a reply for the request. Errors are `AppError::GenerationFailure`.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Provider name, for logs
    fn provider(&self) -> &str;
}

/// OpenAI chat completion client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "llm.api_key (or OPENAI_API_KEY) is required for the openai provider"
                    .to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let base = config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::generation(format!("LLM API request timed out: {}", e))
                } else {
                    AppError::generation(format!("LLM API request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::generation(format!("LLM API error {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::generation(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(chat_response)
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AppError::generation("Empty response from LLM"))
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.send(request).await;
        metrics::record_generation(start.elapsed().as_secs_f64(), &request.model, result.is_ok());
        result
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

/// Canned, deterministic replies for running without an API key
pub struct MockChatModel;

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        Ok(format!(
            "[mock response from {}] You asked: {}",
            request.model, question
        ))
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Create a chat model based on configuration
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "mock" => Ok(Arc::new(MockChatModel)),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![
                ChatMessage::system("You are helpful."),
                ChatMessage::user("What is the refund window?"),
            ],
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn test_request_serializes_openai_shape() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_extract_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"30 days"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(parsed).unwrap(), "30 days");
    }

    #[test]
    fn test_extract_content_empty_choices_is_generation_failure() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_content(parsed),
            Err(AppError::GenerationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_model_echoes_question() {
        let reply = MockChatModel.complete(&request()).await.unwrap();
        assert!(reply.contains("What is the refund window?"));
    }

    #[test]
    fn test_openai_requires_key() {
        assert!(create_chat_model(&LlmConfig::default()).is_err());
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(create_chat_model(&config).unwrap().provider(), "openai");
    }
}
