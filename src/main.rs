use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod catalog;
mod config;
mod db;
mod models;
mod scanner;
mod services;

use catalog::CatalogStore;
use config::AppConfig;
use db::SqliteRecordStore;
use services::cleancache;
use services::imagecache::ImageCache;

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        // Signal all tasks to stop
        self.shutdown.cancel();

        // Wait for all tasks with a timeout
        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub catalog: CatalogStore,
    pub records: SqliteRecordStore,
    pub images: ImageCache,
}

/// Rebuild the catalog and sync it with the database. A record that
/// cannot be inserted ends the process.
async fn rebuild_or_exit(state: &AppState, config: &AppConfig, pace: Duration) {
    if let Err(e) =
        catalog::rebuild_all(&state.catalog, &config.collections, &state.records, pace).await
    {
        tracing::error!("Catalog rebuild failed, cannot continue: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediashelf=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();

    config.paths.ensure_dirs().await?;

    config.log_config();

    // Database setup with optimized connection pool
    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        // Enable WAL mode for better concurrent performance
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        // NORMAL sync is safe with WAL and much faster
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .page_size(8192)
        .foreign_keys(true)
        // Busy timeout for concurrent access (5 seconds)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        // Configure PRAGMAs on EVERY new connection via after_connect hook
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                use sqlx::Executor;
                // Cache size: -8000 = 8MB (negative = KB)
                conn.execute("PRAGMA cache_size = -8000").await?;
                conn.execute("PRAGMA temp_store = MEMORY").await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await?;

    tracing::info!("SQLite configured: WAL mode, 8MB cache (per connection)");

    db::migrate(&pool).await?;

    let state = Arc::new(AppState {
        catalog: CatalogStore::new(&config.collections),
        records: SqliteRecordStore::new(pool.clone()),
        images: ImageCache::new(config.image_cache_dir(), config.cache.jpeg_quality),
    });

    // Initialize background task manager with graceful shutdown support
    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    // First build runs at full speed; later ones are paced
    {
        let rebuild_state = state.clone();
        let rebuild_config = config.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("catalog-rebuild", async move {
            tracing::info!("Building catalog...");
            rebuild_or_exit(&rebuild_state, &rebuild_config, Duration::ZERO).await;
            tracing::info!("Catalog ready");

            if !rebuild_config.scanner.enabled {
                tracing::info!("Periodic catalog rebuild disabled");
                return;
            }

            let interval = rebuild_config.scanner.rebuild_interval();
            let pace = rebuild_config.scanner.pace();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Catalog rebuild received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        rebuild_or_exit(&rebuild_state, &rebuild_config, pace).await;
                        if let Err(e) = db::shrink_memory(rebuild_state.records.pool()).await {
                            tracing::warn!("Failed to shrink SQLite memory: {}", e);
                        }
                    }
                }
            }
        });
    }

    // Spawn image cache reconciler with cancellation
    match config.image_cache_dir() {
        Some(cache_dir) if config.cache.reconcile_interval_minutes > 0 => {
            let roots = config
                .collections
                .iter()
                .map(|c| c.directory.clone())
                .collect();
            let interval = Duration::from_secs(config.cache.reconcile_interval_minutes * 60);
            let pauses = cleancache::Pauses {
                entry: Duration::from_millis(config.cache.entry_pause_millis),
                dir: Duration::from_millis(config.cache.dir_pause_millis),
            };
            bg_tasks.spawn(
                "cache-reconciler",
                cleancache::run(roots, cache_dir, interval, pauses, shutdown_token.clone()),
            );
        }
        _ => tracing::info!("Image cache reconciler disabled"),
    }

    // Root handler
    async fn root_handler() -> &'static str {
        "mediashelf"
    }

    // Build router
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener =
        tokio::net::TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    tracing::info!("Starting server on {}", listener.local_addr()?);

    // Create shutdown signal listener
    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // After server stops, gracefully shutdown background tasks
    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
