use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::DatabaseBackend;
use crate::embeddings::EmbeddingProvider;
use crate::enrichment::{CircuitManager, Dispatcher, RateLimiter, SourceRegistry};
use crate::error::Result;
use crate::llm::LlmProvider;
use crate::services::EnrichmentService;
use crate::transcription::TranscriptionProvider;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<dyn DatabaseBackend>,
    pub embeddings: Arc<EmbeddingProvider>,
    pub transcription: TranscriptionProvider,
    pub llm: LlmProvider,
    pub enrichment: EnrichmentService,
}

impl AppState {
    /// Wire the production source stack from `config`.
    pub fn new(
        config: Config,
        db: Arc<dyn DatabaseBackend>,
        embeddings: EmbeddingProvider,
        transcription: TranscriptionProvider,
        llm: LlmProvider,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let registry = SourceRegistry::from_config(&config.sources);
        let rate_limiter = RateLimiter::new(&config.enrichment.rate_limits);
        let circuit = CircuitManager::new(
            config.enrichment.circuit.clone(),
            &config.enrichment.egress_pool,
        );
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(rate_limiter),
            Arc::new(circuit),
            Duration::from_millis(config.enrichment.dispatch.margin_ms),
        )
        .with_max_results(config.sources.max_results_per_source);

        Self::with_dispatcher(config, db, embeddings, transcription, llm, dispatcher, shutdown)
    }

    /// Like [`AppState::new`], with a caller-built dispatcher.
    pub fn with_dispatcher(
        config: Config,
        db: Arc<dyn DatabaseBackend>,
        embeddings: EmbeddingProvider,
        transcription: TranscriptionProvider,
        llm: LlmProvider,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let embeddings = Arc::new(embeddings);
        let enrichment = EnrichmentService::new(
            db.clone(),
            embeddings.clone(),
            transcription.clone(),
            llm.clone(),
            Arc::new(dispatcher),
            &config,
            shutdown,
        )?;

        Ok(Self {
            config,
            db,
            embeddings,
            transcription,
            llm,
            enrichment,
        })
    }
}
