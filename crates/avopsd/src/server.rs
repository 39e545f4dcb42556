//! HTTP server for avopsd

use crate::config::Config;
use crate::orchestrator::{CopilotEngine, EngineSettings, OllamaClient};
use crate::routes;
use anyhow::{Context, Result};
use avops_common::{CopilotDb, KnowledgeIndex};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Maximum request body size (64 KiB)
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<CopilotEngine>,
    /// Run history reads go straight to storage
    pub db: CopilotDb,
    /// Owner used when a request has no X-User-Id header
    pub default_user_id: i64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<CopilotEngine>, db: CopilotDb, default_user_id: i64) -> Self {
        Self {
            engine,
            db,
            default_user_id,
            start_time: Instant::now(),
        }
    }

    /// Open storage, the knowledge index and the model client from config
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.storage.database_path.clone();
        let db = CopilotDb::open_with_path(&db_path).await?;
        let index = KnowledgeIndex::open_with_path(&db_path)
            .await
            .context("Failed to open knowledge index")?;
        let model = OllamaClient::new(&config.llm)?;

        if !model.is_available().await {
            warn!(
                "Ollama not reachable at {}, runs will use the rule-based fallback",
                model.base_url()
            );
        }

        let engine = CopilotEngine::new(
            Arc::new(db.clone()),
            Arc::new(index),
            Arc::new(model),
            Arc::new(db.clone()),
            EngineSettings {
                top_k: config.retrieval.top_k,
                model_timeout: config.llm.timeout(),
            },
        );

        Ok(Self::new(
            Arc::new(engine),
            db,
            config.server.default_user_id,
        ))
    }
}

/// All routes with tracing and the body size cap
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::copilot_routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until Ctrl-C
pub async fn run(state: AppState, bind_addr: &str) -> Result<()> {
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("  Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("  Shutting down");
        })
        .await?;
    Ok(())
}
