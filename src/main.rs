use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use idgen_worker::config::Config;
use idgen_worker::state::AppState;
use idgen_worker::store::PgStore;
use idgen_worker::worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting ID generation request worker ({})", config.logger_name);

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_count as u32 + 2)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");

    let engine = idgen_worker::build_engine(pool.clone(), &config)?;
    let (tasks, receiver) = worker::task_queue(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_handle = worker::run_pool(engine, receiver, shutdown_rx, config.worker_count)?;

    let addr = SocketAddr::new(config.host, config.port);
    let state = Arc::new(AppState {
        queue: Arc::new(PgStore::new(pool)),
        tasks,
    });
    let app = idgen_worker::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    tokio::task::spawn_blocking(move || {
        if pool_handle.join().is_err() {
            tracing::error!("Worker pool thread panicked");
        }
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
