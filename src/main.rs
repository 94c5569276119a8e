mod api;
mod config;
mod db;
mod error;
mod models;
mod schema;
mod seeding;
mod services;
mod storage;

use anyhow::Result;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{DbPool, TableFlags};
use crate::services::kv::KvWriteLimiter;
use crate::storage::{BlobStore, FsBlobStore};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub tables: Arc<TableFlags>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv_limiter: Arc<KvWriteLimiter>,
}

impl AppState {
    pub fn conn(&self) -> Result<crate::db::DbConnection, crate::error::ApiError> {
        self.db
            .get()
            .map_err(|e| crate::error::ApiError::Unavailable(e.to_string()))
    }
}

use clap::Parser;

#[derive(Parser)]
#[command(version, author = "MOTION PRODUCTIONS AUTHORS", about = "Motion Productions Server\nLicensed under AGPLv3\nCreated by MOTION PRODUCTIONS AUTHORS", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motion_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = cli.config.unwrap_or_else(|| "config.toml".to_string());

    // Check if config exists
    if std::fs::metadata(&config_path).is_err() {
        eprintln!("Error: Configuration file '{}' not found.", config_path);
        eprintln!("Run with --generate-config to see a template.");
        std::process::exit(1);
    }

    // Load configuration
    let config = Config::load(&config_path)?;
    tracing::info!("Loaded configuration from {}", config_path);

    // Setup database
    let db_pool = db::create_pool(&config.database.url)?;
    db::run_migrations(&mut *db_pool.get()?)?;
    seeding::seed_defaults(&db_pool)?;
    let tables = TableFlags::detect(&mut *db_pool.get()?)?;
    tracing::info!("Database initialized and seeded");

    // Blob storage for rendered videos
    let blobs = FsBlobStore::new(&config.storage.data_dir)?;

    // Create app state
    let state = AppState {
        db: db_pool,
        config: Arc::new(config.clone()),
        tables: Arc::new(tables),
        blobs: Arc::new(blobs),
        kv_limiter: Arc::new(KvWriteLimiter::new()),
    };

    // Spawn the learning loop controller (single replica by deployment)
    tokio::spawn(services::loop_service::run(state.clone()));

    // Get address before moving state
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);

    // Build router; the static UI is optional and deployment-provided
    let app = api::routes();
    let app = if let Some(ui_path) = &state.config.server.ui_path {
        tracing::info!("Serving static UI from {}", ui_path);
        app.fallback_service(
            ServeDir::new(ui_path)
                .not_found_service(ServeFile::new(format!("{}/index.html", ui_path))),
        )
    } else {
        app
    };
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
