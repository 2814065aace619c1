mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use extract::{CompletionProvider, LlmExtractor, OllamaClient};
use index::{
    CachedEmbedder, EmbeddingClient, EmbeddingProvider, GraphStore, IndexError, IndexStats, Indexer, KnowledgeGraph,
    MemoryVectorIndex, Neo4jGraphStore, QdrantIndex, RetryPolicy, VectorIndex,
};
use index::cache::CacheStats;
use ingest::{IngestionError, PlainTextExtractor};
use query::{HybridRagEngine, Providers, QueryRequest, QueryResult, QueryStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, GraphBackend, LogFormat, LoggingConfig, VectorBackend};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    engine: HybridRagEngine,
    indexer: Indexer,
    providers: Providers,
    embedding_cache: Option<Arc<CachedEmbedder>>,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    vector_index: String,
    graph_store: String,
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
}

#[derive(Serialize)]
struct IngestResponse {
    documents: Vec<index::IngestReport>,
    chunks_created: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    index: IndexStats,
    embedding_cache: Option<CacheStats>,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        let status = match &err {
            IndexError::Ingestion(IngestionError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexError::Ingestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IndexError::Provider(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);
    info!(
        vector_store = ?config.vector_store.kind,
        graph_store = ?config.graph_store.kind,
        default_mode = %config.rag.default_mode,
        "Configuration loaded"
    );

    let completion: Arc<dyn CompletionProvider> = Arc::new(OllamaClient::new(
        config.ollama.url.clone(),
        config.ollama.completion_model.clone(),
    ));

    // Embeddings, optionally cached
    let embedding_client: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingClient::new(
        config.ollama.url.clone(),
        config.ollama.embedding_model.clone(),
    ));
    let embedding_cache = config
        .cache
        .enabled
        .then(|| Arc::new(CachedEmbedder::new(embedding_client.clone(), config.cache.max_entries)));
    let embedder: Arc<dyn EmbeddingProvider> = match &embedding_cache {
        Some(cache) => cache.clone(),
        None => embedding_client,
    };

    let vectors: Arc<dyn VectorIndex> = match config.vector_store.kind {
        VectorBackend::Memory => Arc::new(MemoryVectorIndex::new()),
        VectorBackend::Qdrant => Arc::new(QdrantIndex::new(
            config.vector_store.url.clone(),
            config.vector_store.collection.clone(),
        )),
    };

    let graph: Arc<dyn GraphStore> = match config.graph_store.kind {
        GraphBackend::Memory => Arc::new(KnowledgeGraph::new()),
        GraphBackend::Neo4j => {
            let store = Neo4jGraphStore::connect(
                &config.graph_store.uri,
                &config.graph_store.user,
                &config.graph_store.password,
            )
            .await?;
            store.init_schema().await?;
            Arc::new(store)
        }
    };

    let providers = Providers {
        extractor: Arc::new(LlmExtractor::new(completion.clone())),
        completion,
        embedder,
        vectors,
        graph,
    };

    let engine = HybridRagEngine::new(Arc::new(config.rag.clone()), providers.clone())
        .context("Invalid retrieval settings")?;
    let retry = RetryPolicy::new(
        config.retry.max_retries,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
    );
    let indexer = engine.indexer(Arc::new(PlainTextExtractor), retry);

    let state = Arc::new(AppState {
        engine,
        indexer,
        providers,
        embedding_cache,
        metrics: Metrics::new(),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_documents))
        .route("/query", post(run_query))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    info!("Server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let vector_index = match state.providers.vectors.len().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let graph_store = match state.providers.graph.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Json(HealthResponse {
        vector_index,
        graph_store,
    })
}

async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let path = PathBuf::from(&req.path);
    if !path.exists() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, format!("{} does not exist", req.path)));
    }

    let timer = TimedOperation::start();
    let documents = match state.indexer.ingest_path(&path).await {
        Ok(documents) => documents,
        Err(e) => {
            warn!(path = %req.path, error = %e, "Ingestion failed");
            state.metrics.record_ingest_failure();
            return Err(e.into());
        }
    };

    let chunks_created = documents.iter().map(|d| d.chunks).sum();
    let entities = documents.iter().map(|d| d.entities).sum();
    state
        .metrics
        .record_ingest(timer.elapsed(), documents.len(), chunks_created, entities);

    Ok(Json(IngestResponse {
        documents,
        chunks_created,
    }))
}

async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<(StatusCode, Json<QueryResult>), ApiError> {
    if req.question.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "question must not be empty"));
    }

    // Dropping this future on client disconnect cancels the query
    let timer = TimedOperation::start();
    let result = state.engine.query(req).await;
    state.metrics.record_query(&result, timer.elapsed());

    let status = match result.status {
        QueryStatus::Failed { .. } => StatusCode::BAD_GATEWAY,
        QueryStatus::Answered | QueryStatus::Cancelled => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let index = state
        .indexer
        .get_stats()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(StatsResponse {
        index,
        embedding_cache: state.embedding_cache.as_ref().map(|cache| cache.stats()),
    }))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
