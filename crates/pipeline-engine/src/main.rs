//! Pipeline Engine server.
//!
//! Serves the run and entity API and drives submitted runs in-process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_engine::{
    config::{AppConfig, DatabaseConfig, LogFormat, StoreBackend},
    db::{create_pool, run_migrations, DbPool},
    engine::{PipelineRunner, RunDispatcher, TimelineRecorder},
    entity::EntityStateStore,
    executor::HttpOperationExecutor,
    handlers,
    services::{EntityService, RunService},
    state::AppState,
    store::{EntityRepository, InMemoryStore, PgStore, RunStore, TimelineRepository},
};

struct Stores {
    runs: Arc<dyn RunStore>,
    entities: Arc<dyn EntityRepository>,
    timeline: Arc<dyn TimelineRepository>,
    db: Option<DbPool>,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pipeline_engine=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; runs and entities are lost on restart");
            let store = Arc::new(InMemoryStore::new());
            Ok(Stores {
                runs: store.clone(),
                entities: store.clone(),
                timeline: store,
                db: None,
            })
        }
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = create_pool(&db_config).await?;
            let applied = run_migrations(&pool).await?;
            tracing::info!(applied, "Migrations complete");

            let store = Arc::new(PgStore::new(pool.clone()));
            Ok(Stores {
                runs: store.clone(),
                entities: store.clone(),
                timeline: store,
                db: Some(pool),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let load_result = AppConfig::from_env();
    let app_config = load_result.as_ref().cloned().unwrap_or_default();
    init_tracing(app_config.log_format);
    if let Err(e) = load_result {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %app_config.host,
        port = app_config.port,
        store = ?app_config.store_backend,
        operation_service = %app_config.operation_service_url,
        max_concurrent_runs = app_config.max_concurrent_runs,
        max_fan_out_depth = app_config.max_fan_out_depth,
        "Starting pipeline engine"
    );

    let stores = open_stores(&app_config).await?;

    let executor = HttpOperationExecutor::new(
        &app_config.operation_service_url,
        Duration::from_secs(app_config.operation_timeout_secs),
    )?;

    let entity_store = EntityStateStore::new(stores.entities.clone());
    let timeline = TimelineRecorder::new(stores.timeline.clone());
    let runner = PipelineRunner::new(
        stores.runs.clone(),
        entity_store.clone(),
        timeline.clone(),
        Arc::new(executor),
        app_config.max_fan_out_depth,
    );
    let dispatcher = RunDispatcher::new(Arc::new(runner), app_config.max_concurrent_runs);

    if app_config.resume_queued_runs {
        dispatcher.resume().await?;
    }

    let state = AppState::new(
        app_config.clone(),
        stores.db,
        RunService::new(dispatcher),
        EntityService::new(entity_store, timeline),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
