use governance_engine::{
    api::start_server,
    flows::{Engine, EngineContext, Repositories},
    gemini::GeminiClient,
    generation::{RetryingGenerator, TextGenerator},
    session::{QuarterlyData, QuickData, SetupData},
    state::{InMemoryPreferencesStore, PgSessionStore},
    EngineConfig, QuarterlyState, QuickState, SetupState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();
    if !config.has_api_key() {
        warn!("GEMINI_API_KEY not set; generation calls will fail and vagueness checks fail open");
    }

    info!("Governance Engine - API Server");
    info!(port = config.port, model = %config.gemini_model, "Configuration loaded");

    let client = GeminiClient::from_config(&config)?;
    let generator: Arc<dyn TextGenerator> =
        Arc::new(RetryingGenerator::new(client, config.retry.clone()));

    let engine = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
            info!("Session and artifact backend: postgres");

            let ctx = Arc::new(EngineContext::new(
                generator,
                Repositories::postgres(pool.clone()),
                Arc::new(InMemoryPreferencesStore::new()),
            ));
            Engine::new(
                ctx,
                Arc::new(PgSessionStore::<QuickState, QuickData>::new(pool.clone())),
                Arc::new(PgSessionStore::<SetupState, SetupData>::new(pool.clone())),
                Arc::new(PgSessionStore::<QuarterlyState, QuarterlyData>::new(pool)),
            )
        }
        None => {
            info!("Session store backend: in-memory");
            Engine::in_memory(generator)
        }
    };

    info!("Engine initialized");
    info!("Starting API server...");

    start_server(engine, config.port).await?;

    Ok(())
}
