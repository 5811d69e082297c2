//! KBQA API Gateway
//!
//! HTTP entry point for the question answering service.
//! Handles:
//! - Request routing and validation
//! - Rate limiting and request timeouts
//! - Observability (logging, metrics, tracing)
//! - Knowledge base warm-up and reload

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use kbqa_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    errors::Result,
    llm::create_chat_model,
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, MODEL_CALL_BUCKETS},
};
use kbqa_context::{AnsweringPipeline, PipelineOptions};
use kbqa_ingestion::{Chunker, ChunkingConfig, FileCorpusSource};
use kbqa_search::KnowledgeBase;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<AnsweringPipeline>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the answering pipeline from configuration
    pub fn from_config(config: AppConfig, metrics: Option<PrometheusHandle>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.llm)?;
        let chunker = Chunker::new(ChunkingConfig::from(&config.corpus))?;
        let source = Arc::new(FileCorpusSource::new(config.corpus.path.clone()));

        let knowledge = Arc::new(KnowledgeBase::new(
            source,
            chunker,
            embedder,
            config.embedding.batch_size,
        ));
        let pipeline = Arc::new(AnsweringPipeline::new(
            knowledge,
            chat,
            PipelineOptions::from(&config),
        ));

        Ok(Self {
            config: Arc::new(config),
            pipeline,
            metrics,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // APP_CONFIG names a single TOML file; otherwise the layered config/ directory
    let config = match std::env::var("APP_CONFIG") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config.observability);

    info!(
        version = kbqa_common::VERSION,
        service = %config.observability.service_name,
        "Starting KBQA API Gateway"
    );

    let prometheus = install_metrics_exporter()?;
    metrics::register_metrics();

    info!(
        corpus = %config.corpus.path.display(),
        embedding_provider = %config.embedding.provider,
        llm_provider = %config.llm.provider,
        "Initializing answering pipeline"
    );
    let state = AppState::from_config(config, Some(prometheus))?;
    let config = state.config.clone();

    if config.server.warm_up {
        let knowledge = state.pipeline.knowledge().clone();
        tokio::spawn(async move {
            match knowledge.ensure_ready().await {
                Ok(index) => info!(passages = index.len(), "Knowledge base warmed up"),
                Err(e) => error!(error = %e, "Knowledge base warm-up failed"),
            }
        });
    }

    let app = create_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    });

    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            shutdown_signal().await;
            shutdown.notify_one();
            tokio::time::sleep(config.shutdown_timeout()).await;
        } => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

/// JSON or human-readable logs, filtered by `RUST_LOG` or the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
            MODEL_CALL_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_generation_duration_seconds", METRICS_PREFIX)),
            MODEL_CALL_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    Ok(handle)
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());

    let mut router = Router::new()
        // Question answering
        .route("/api/knowledge", post(handlers::knowledge::ask))
        .route("/api/knowledge/reload", post(handlers::knowledge::reload))
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::metrics::metrics))
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(&state.config.rate_limit)?;
        router = router.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    Ok(router
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
