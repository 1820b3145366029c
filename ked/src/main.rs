use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ked::api::{create_router, AppState};
use ked::config::Config;
use ked::db::{Database, DatabaseBackend, LibSqlBackend};
use ked::embeddings::EmbeddingProvider;
use ked::llm::LlmProvider;
use ked::transcription::TranscriptionProvider;

/// How long in-flight jobs get to record their interruption after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "ked")]
#[command(about = "Conversation enrichment service")]
struct Args {
    /// Bind address, overrides KED_HOST
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides KED_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ked=info,tower_http=debug".into());
    if config.server.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if config.server.api_keys.is_empty() {
        tracing::warn!(
            "KED_API_KEYS is not set; enrichment endpoints are locked. Set KED_API_KEYS to enable access."
        );
    }

    tracing::info!("Initializing database...");
    let raw_db = Database::new(&config.database).await?;
    let db: Arc<dyn DatabaseBackend> = Arc::new(LibSqlBackend::new(raw_db));

    tracing::info!("Initializing embedding provider: {}...", config.embeddings.model);
    let embeddings = EmbeddingProvider::new(&config.embeddings);
    if !embeddings.is_available() {
        tracing::warn!("Embeddings unavailable - requests must carry a precomputed embedding");
    }

    tracing::info!(
        "Initializing transcription provider: {}...",
        config.transcription.model
    );
    let transcription = TranscriptionProvider::new(&config.transcription);
    if !transcription.is_available() {
        tracing::warn!("Transcription unavailable - audio submissions will fail");
    }

    if let Some(llm_config) = &config.llm {
        tracing::info!("Initializing LLM provider: {}...", llm_config.model);
    }
    let llm = LlmProvider::new(config.llm.as_ref());
    if !llm.is_available() {
        tracing::warn!("LLM unavailable - identity rescoring disabled");
    }

    let cancel_token = CancellationToken::new();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::new(
        config,
        db,
        embeddings,
        transcription,
        llm,
        cancel_token.child_token(),
    )?;

    state.enrichment.sweep_interrupted().await?;
    let enrichment = state.enrichment.clone();

    let app = create_router(state);

    tracing::info!("Ked starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/v1/health", addr);
    tracing::info!("  API docs:     http://{}/api/v1/docs", addr);
    tracing::info!("  OpenAPI: http://{}/api/v1/openapi.json", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while enrichment.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if enrichment.in_flight() > 0 {
        tracing::warn!(
            jobs = enrichment.in_flight(),
            "Exiting with jobs still running; they will be swept on next start"
        );
    }

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling enrichment jobs...");
    cancel_token.cancel();
}
