use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod api_types;
mod backend;
mod cache;
mod config;
mod embedding;
mod normalize;
mod plan;
mod routes;
mod scheduler;
mod trace;

#[cfg(test)]
mod tests;

use backend::{BackendAdapter, MockAdapter, OllamaAdapter};
use cache::{
    MemoryKvCache, RedisKvCache, ResponseCache, SemanticCache,
    vector_store::{MemoryVectorStore, PgvectorStore, VectorBackend},
};
use config::{BackendMode, EmbeddingMode, LogFormat, ObservabilityConfig, PolicyConfig, RelayConfig};
use embedding::{Embedder, HashingEmbedder, OllamaEmbedder};
use scheduler::Scheduler;
use trace::{MemoryTraceStore, PgTraceStore, TraceStore};

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "LLM request relay")]
struct Cli {
    /// Path to the relay configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Process-wide singletons, constructed once at startup and threaded
/// through every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub policy: Arc<PolicyConfig>,
    pub scheduler: Arc<Scheduler>,
    pub backend: Arc<dyn BackendAdapter>,
    pub response_cache: Arc<ResponseCache>,
    pub semantic_cache: Arc<SemanticCache>,
    pub traces: Arc<dyn TraceStore>,
}

impl AppState {
    pub async fn new(
        config: RelayConfig,
        policy: PolicyConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        // One shared HTTP client: reqwest pools connections per host, so
        // the backend and the embedder each get their own pool.
        let http_client = reqwest::Client::new();

        let kv: Arc<dyn cache::KvCache> = match &config.storage.redis_url {
            Some(url) => Arc::new(RedisKvCache::from_url(url)?),
            None => {
                tracing::warn!(
                    "no redis_url configured, exact cache and counters are in-memory (single node)"
                );
                Arc::new(MemoryKvCache::new())
            }
        };

        let (vector_store, traces): (Arc<dyn VectorBackend>, Arc<dyn TraceStore>) =
            match &config.storage.database_url {
                Some(url) => {
                    let pool = sqlx::postgres::PgPoolOptions::new()
                        .max_connections(8)
                        .connect(url)
                        .await?;
                    let vectors = PgvectorStore::new(pool.clone(), config.embedding.dimensions);
                    vectors.initialize().await?;
                    let traces = PgTraceStore::new(pool);
                    traces.initialize().await?;
                    (Arc::new(vectors), Arc::new(traces))
                }
                None => {
                    tracing::warn!(
                        "no database_url configured, traces and semantic entries are in-memory"
                    );
                    (
                        Arc::new(MemoryVectorStore::new()),
                        Arc::new(MemoryTraceStore::new()),
                    )
                }
            };

        let embedder: Arc<dyn Embedder> = match config.embedding.mode {
            EmbeddingMode::Ollama => Arc::new(OllamaEmbedder::new(
                http_client.clone(),
                config.embedding.base_url.clone(),
                config.embedding.model.clone(),
                config.embedding.dimensions,
            )),
            EmbeddingMode::Hashing => Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
        };

        let backend: Arc<dyn BackendAdapter> = match config.backend.mode {
            BackendMode::Ollama => Arc::new(OllamaAdapter::new(
                http_client,
                config.backend.base_url.clone(),
                Duration::from_secs(config.backend.timeout_secs),
            )),
            BackendMode::Mock => Arc::new(MockAdapter),
        };

        let scheduler = Scheduler::new(policy.scheduler.clone());
        let response_cache = Arc::new(ResponseCache::new(
            kv,
            Duration::from_secs(config.cache.exact_ttl_seconds),
        ));
        let semantic_cache = Arc::new(SemanticCache::new(vector_store, embedder));

        Ok(Self {
            config: Arc::new(config),
            policy: Arc::new(policy),
            scheduler,
            backend,
            response_cache,
            semantic_cache,
            traces,
        })
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    init_tracing(&config.observability);

    let policy = PolicyConfig::from_file(&config.policy_path)?;
    tracing::info!(policy_version = %policy.policy_version, "policy loaded");

    let state = AppState::new(config, policy).await?;
    state.scheduler.clone().start();

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, backend = state.backend.name(), "relay listening");

    let scheduler = state.scheduler.clone();
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}
