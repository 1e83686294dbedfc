use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimiq_tx_indexer::config::Config;
use nimiq_tx_indexer::error::IndexerError;
use nimiq_tx_indexer::{api, indexer, AppState};

#[tokio::main]
async fn main() {
    eprintln!("=== nimiq-tx-indexer starting ===");

    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimiq_tx_indexer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), IndexerError> {
    let config = Config::from_env()?;
    tracing::info!("Nimiq v2 TX Indexer");

    // Lazy pool: the API can bind before the database is reachable.
    let pool = PgPoolOptions::new()
        .max_connections((config.indexer.backfill_concurrency as u32 + 5).max(10))
        .acquire_timeout(Duration::from_secs(30))
        .connect_lazy(&config.database_url)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        pool: pool.clone(),
        ready: ready.clone(),
    };

    let server = if config.enable_api {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| IndexerError::Config(format!("Failed to bind {addr}: {e}")))?;
        tracing::info!("Server listening on {addr}");

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/health", get(health_check))
            .nest("/api/v1", api::router())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let shutdown = cancel.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }))
    } else {
        None
    };

    run_migrations(&pool).await?;
    ready.store(true, Ordering::Release);
    tracing::info!("Database ready — accepting API requests");

    if config.enable_indexer {
        indexer::run_indexer(pool.clone(), &config, cancel.clone()).await?;
    } else {
        tracing::info!("Indexer disabled (set ENABLE_INDEXER=true to enable)");
        cancel.cancelled().await;
    }

    // The indexer only returns on shutdown; stop the API with it.
    cancel.cancel();
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::error!("Server error: {:?}", e),
            Err(e) => tracing::error!("Server task failed: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Apply migrations, retrying with backoff while the database comes up.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), IndexerError> {
    let max_retries = 5;
    let mut attempt = 1;
    loop {
        tracing::info!("Running migrations (attempt {}/{})", attempt, max_retries);
        match sqlx::migrate!("./migrations").run(pool).await {
            Ok(_) => {
                tracing::info!("Migrations applied successfully");
                return Ok(());
            }
            Err(e) if attempt < max_retries => {
                tracing::warn!("Migration attempt {} failed: {:?}, retrying in {}s", attempt, e, attempt * 5);
                tokio::time::sleep(Duration::from_secs(attempt as u64 * 5)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("Migration failed after {} attempts: {:?}", max_retries, e);
                return Err(e.into());
            }
        }
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight work");
    token.cancel();
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::OK, "starting")
    }
}
