//! Passgate HTTP server.

use anyhow::Context;
use passgate::{
    config::Config,
    metrics::register_business_metrics,
    server::{self, build_router, AppState},
    InMemoryPassRepository, PassEnvironment, PassRepository, PassService, PostgresPassRepository,
    RandomTokenGenerator, VerifyLinks,
};
use passgate_core::environment::SystemClock;
use passgate_runtime::metrics::MetricsRecorder;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Passgate HTTP server");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        public_origin = %config.public_origin,
        postgres = config.database.is_some(),
        metrics = config.metrics_enabled,
        "Configuration loaded"
    );

    let repository: Arc<dyn PassRepository> = match &config.database {
        Some(database) => {
            info!("Connecting to database...");
            let repository = PostgresPassRepository::connect(
                &database.url,
                database.max_connections,
                database.connect_timeout(),
            )
            .await
            .context("Failed to connect to database")?;
            repository
                .migrate()
                .await
                .context("Failed to run migrations")?;
            info!("Database connected and migrated");
            Arc::new(repository)
        },
        None => {
            warn!("DATABASE_URL not set, passes are kept in memory and lost on restart");
            Arc::new(InMemoryPassRepository::new())
        },
    };

    let env = PassEnvironment::new(
        Arc::new(SystemClock),
        Arc::new(RandomTokenGenerator),
        Arc::clone(&repository),
    );
    let service = PassService::new(env, VerifyLinks::new(config.public_origin.as_str()))
        .with_operation_timeout(config.server.request_timeout())
        .with_cache_capacity(config.cache_capacity);

    let mut state = AppState::new(service, repository);
    if config.metrics_enabled {
        let mut recorder = MetricsRecorder::new();
        recorder.install().context("Failed to install metrics recorder")?;
        register_business_metrics();
        state = state.with_metrics(recorder);
    }

    let app = build_router(state, config.server.request_timeout());

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    server::serve(listener, app, config.server.shutdown_timeout()).await?;

    info!("Server stopped");
    Ok(())
}
