//! Retrieval-augmented answering pipeline
//!
//! question -> ensure index -> embed question -> top-k passages -> prompt -> chat model -> answer

use crate::prompt::{build_messages, NOT_FOUND_MESSAGE};
use kbqa_common::config::AppConfig;
use kbqa_common::embeddings::Embedder;
use kbqa_common::errors::{AppError, Result};
use kbqa_common::llm::{ChatModel, ChatRequest};
use kbqa_common::metrics;
use kbqa_search::KnowledgeBase;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Generation and retrieval settings for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Passages retrieved per question
    pub top_k: usize,
    /// Chat model identifier
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        }
    }
}

/// Generated answer and the passages it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Raw model output
    pub response: String,
    /// Retrieved passage texts, most similar first
    pub sources: Vec<String>,
}

impl Answer {
    pub fn not_found() -> Self {
        Self {
            response: NOT_FOUND_MESSAGE.to_string(),
            sources: Vec::new(),
        }
    }

    /// Whether the model answered with the fallback message
    pub fn is_not_found(&self) -> bool {
        self.response.trim() == NOT_FOUND_MESSAGE
    }
}

/// Answers questions against the knowledge base
pub struct AnsweringPipeline {
    knowledge: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    options: PipelineOptions,
}

impl AnsweringPipeline {
    /// The question is embedded with the knowledge base's own embedder so
    /// query and passage vectors always share a model.
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        chat: Arc<dyn ChatModel>,
        options: PipelineOptions,
    ) -> Self {
        let embedder = knowledge.embedder().clone();
        Self {
            knowledge,
            embedder,
            chat,
            options,
        }
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    #[instrument(
        skip_all,
        fields(question_len = question.chars().count(), top_k = self.options.top_k)
    )]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(AppError::validation(
                "Question must not be empty",
                Some("question"),
            ));
        }

        let start = Instant::now();
        let result = self.run(question).await;
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = match &result {
            Ok(answer) if answer.is_not_found() => "not_found",
            Ok(_) => "answered",
            Err(_) => "error",
        };
        metrics::record_answer(elapsed, outcome);

        match &result {
            Ok(answer) => info!(
                outcome,
                sources = answer.sources.len(),
                duration_ms = (elapsed * 1000.0) as u64,
                "Question answered"
            ),
            Err(e) => warn!(error = %e, code = ?e.code(), "Question failed"),
        }

        result
    }

    async fn run(&self, question: &str) -> Result<Answer> {
        let index = self.knowledge.ensure_ready().await?;

        if index.is_empty() {
            debug!("Knowledge index is empty, skipping generation");
            return Ok(Answer::not_found());
        }

        let query = self.embedder.embed(question).await.map_err(|e| match e {
            AppError::EmbeddingFailure { .. } => e,
            other => AppError::embedding(other.to_string()),
        })?;

        if query.len() != index.dimension() {
            return Err(AppError::embedding(format!(
                "Query embedding has dimension {}, index has {}",
                query.len(),
                index.dimension()
            )));
        }

        let retrieved = index.search(&query, self.options.top_k);
        debug!(
            retrieved = retrieved.len(),
            top_score = retrieved.first().map(|r| r.score),
            "Passages retrieved"
        );

        let request = ChatRequest {
            model: self.options.model.clone(),
            messages: build_messages(question, &retrieved),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let response = self.chat.complete(&request).await.map_err(|e| match e {
            AppError::GenerationFailure { .. } => e,
            other => AppError::generation(other.to_string()),
        })?;

        Ok(Answer {
            response,
            sources: retrieved.iter().map(|r| r.text().to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::SYSTEM_INSTRUCTION;
    use async_trait::async_trait;
    use kbqa_common::embeddings::HashEmbedder;
    use kbqa_common::llm::Role;
    use kbqa_ingestion::{
        Chunker, ChunkingConfig, Corpus, CorpusSource, FileCorpusSource, StaticCorpusSource,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    const CORPUS: &str = "Our refund policy allows returns within 30 days of purchase.\n\n\
        Gift cards never expire.\n\n\
        Support is available by email on weekdays.";

    /// Answers with the first context sentence sharing a word with the question
    #[derive(Default)]
    struct ContextEchoModel {
        calls: AtomicUsize,
        last_request: Mutex<Option<ChatRequest>>,
    }

    fn words(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 3)
            .map(|w| w.to_lowercase())
            .collect()
    }

    #[async_trait]
    impl ChatModel for ContextEchoModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());

            let system = &request.messages[0].content;
            let question = &request.messages[1].content;
            let context = system.split("Context: ").nth(1).unwrap_or_default();
            let asked = words(question);

            let hit = context
                .split(|c: char| c == '.' || c == '\n')
                .map(str::trim)
                .find(|sentence| words(sentence).iter().any(|w| asked.contains(w)));

            Ok(match hit {
                Some(sentence) => format!("{}.", sentence),
                None => NOT_FOUND_MESSAGE.to_string(),
            })
        }

        fn provider(&self) -> &str {
            "echo"
        }
    }

    struct FailingChatModel;

    #[async_trait]
    impl ChatModel for FailingChatModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            Err(AppError::Internal {
                message: "connection reset".to_string(),
            })
        }

        fn provider(&self) -> &str {
            "failing"
        }
    }

    /// Index builds fine, but question embedding fails or changes shape
    struct QueryFaultEmbedder {
        inner: HashEmbedder,
        wrong_dimension: bool,
    }

    #[async_trait]
    impl Embedder for QueryFaultEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.wrong_dimension {
                Ok(vec![1.0; 8])
            } else {
                Err(AppError::embedding("rate limited upstream"))
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_batch(texts).await
        }

        fn model_name(&self) -> &str {
            "query-fault"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    fn knowledge_with(
        source: Arc<dyn CorpusSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Arc<KnowledgeBase> {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 80,
            chunk_overlap: 10,
        })
        .unwrap();
        Arc::new(KnowledgeBase::new(source, chunker, embedder, 16))
    }

    fn knowledge(text: &str) -> Arc<KnowledgeBase> {
        knowledge_with(
            Arc::new(StaticCorpusSource::new("knowledge.md", text)),
            Arc::new(HashEmbedder::new(128)),
        )
    }

    fn pipeline(chat: Arc<dyn ChatModel>) -> AnsweringPipeline {
        AnsweringPipeline::new(knowledge(CORPUS), chat, PipelineOptions::default())
    }

    #[tokio::test]
    async fn test_refund_question_is_grounded() {
        let chat = Arc::new(ContextEchoModel::default());
        let pipeline = pipeline(chat.clone());

        let answer = assert_ok!(pipeline.answer("What is the refund policy?").await);
        assert!(answer.response.contains("30 days"), "{}", answer.response);
        assert!(!answer.is_not_found());

        let index = pipeline.knowledge().index().await.unwrap();
        assert_eq!(answer.sources.len(), index.len().min(3));
        assert!(answer.sources.iter().any(|s| s.contains("30 days")));
        let corpus = Corpus::new("knowledge.md", CORPUS);
        assert!(answer.sources.iter().all(|s| corpus.text().contains(s.as_str())));
    }

    /// Replies with the context block it was given
    struct ContextModel;

    #[async_trait]
    impl ChatModel for ContextModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            let system = &request.messages[0].content;
            Ok(system.split("Context: ").nth(1).unwrap_or_default().to_string())
        }

        fn provider(&self) -> &str {
            "context"
        }
    }

    #[tokio::test]
    async fn test_single_passage_corpus_answers_refund_window() {
        let text = "Our return policy allows refunds within 30 days.";
        let pipeline = AnsweringPipeline::new(
            knowledge(text),
            Arc::new(ContextModel),
            PipelineOptions::default(),
        );

        let answer = assert_ok!(pipeline.answer("What is the refund window?").await);
        assert!(answer.response.contains("30 days"), "{}", answer.response);
        assert_eq!(answer.sources, vec![text.to_string()]);
    }

    #[tokio::test]
    async fn test_unanswerable_question_falls_back() {
        let chat = Arc::new(ContextEchoModel::default());
        let pipeline = pipeline(chat);

        let answer = assert_ok!(pipeline.answer("How much does shipping cost?").await);
        assert_eq!(answer.response, NOT_FOUND_MESSAGE);
        assert!(answer.is_not_found());
        assert!(!answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_options_and_prompt() {
        let chat = Arc::new(ContextEchoModel::default());
        let options = PipelineOptions {
            top_k: 1,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: Some(256),
        };
        let pipeline = AnsweringPipeline::new(knowledge(CORPUS), chat.clone(), options);

        let answer = pipeline.answer("Do gift cards expire?").await.unwrap();
        assert_eq!(answer.sources.len(), 1);

        let request = chat.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.starts_with(SYSTEM_INSTRUCTION));
        assert!(request.messages[0].content.contains(&answer.sources[0]));
        assert_eq!(request.messages[1].content, "Do gift cards expire?");
    }

    #[tokio::test]
    async fn test_answer_is_idempotent() {
        let pipeline = pipeline(Arc::new(ContextEchoModel::default()));

        let first = pipeline.answer("What is the refund policy?").await.unwrap();
        let second = pipeline.answer("What is the refund policy?").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_blank_question_rejected_before_loading() {
        let pipeline = pipeline(Arc::new(ContextEchoModel::default()));

        let err = assert_err!(pipeline.answer("   ").await);
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(!pipeline.knowledge().is_ready().await);
    }

    #[tokio::test]
    async fn test_missing_corpus_propagates() {
        let kb = knowledge_with(
            Arc::new(FileCorpusSource::new("/nonexistent/kbqa/knowledge.md")),
            Arc::new(HashEmbedder::new(32)),
        );
        let chat = Arc::new(ContextEchoModel::default());
        let pipeline = AnsweringPipeline::new(kb, chat.clone(), PipelineOptions::default());

        let err = assert_err!(pipeline.answer("What is the refund policy?").await);
        assert!(matches!(err, AppError::CorpusUnavailable { .. }));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_embedding_failure() {
        let kb = knowledge_with(
            Arc::new(StaticCorpusSource::new("knowledge.md", CORPUS)),
            Arc::new(QueryFaultEmbedder {
                inner: HashEmbedder::new(32),
                wrong_dimension: false,
            }),
        );
        let pipeline = AnsweringPipeline::new(
            kb,
            Arc::new(ContextEchoModel::default()),
            PipelineOptions::default(),
        );

        let err = assert_err!(pipeline.answer("What is the refund policy?").await);
        assert!(matches!(err, AppError::EmbeddingFailure { .. }));
        assert!(pipeline.knowledge().is_ready().await);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let kb = knowledge_with(
            Arc::new(StaticCorpusSource::new("knowledge.md", CORPUS)),
            Arc::new(QueryFaultEmbedder {
                inner: HashEmbedder::new(32),
                wrong_dimension: true,
            }),
        );
        let pipeline = AnsweringPipeline::new(
            kb,
            Arc::new(ContextEchoModel::default()),
            PipelineOptions::default(),
        );

        let err = assert_err!(pipeline.answer("What is the refund policy?").await);
        assert!(matches!(err, AppError::EmbeddingFailure { .. }));
    }

    #[tokio::test]
    async fn test_generation_failure() {
        let pipeline = pipeline(Arc::new(FailingChatModel));

        let err = assert_err!(pipeline.answer("What is the refund policy?").await);
        assert!(matches!(err, AppError::GenerationFailure { .. }));
    }

    #[tokio::test]
    async fn test_empty_corpus_skips_generation() {
        let chat = Arc::new(ContextEchoModel::default());
        let pipeline =
            AnsweringPipeline::new(knowledge(""), chat.clone(), PipelineOptions::default());

        let answer = pipeline.answer("What is the refund policy?").await.unwrap();
        assert_eq!(answer, Answer::not_found());
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_answer_serializes_to_wire_shape() {
        let answer = Answer {
            response: "Refunds within 30 days.".to_string(),
            sources: vec!["Our refund policy allows returns within 30 days.".to_string()],
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["response"], "Refunds within 30 days.");
        assert_eq!(json["sources"][0], "Our refund policy allows returns within 30 days.");
    }

    #[test]
    fn test_options_from_config() {
        let mut config = AppConfig::default();
        config.retrieval.top_k = 5;
        config.llm.temperature = 0.1;
        let options = PipelineOptions::from(&config);
        assert_eq!(options.top_k, 5);
        assert_eq!(options.temperature, 0.1);
        assert_eq!(options.model, config.llm.model);
    }
}
