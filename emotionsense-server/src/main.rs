use std::sync::Arc;

use clap::Parser;
use emotionsense_core::store::EmotionStore;
use emotionsense_core::{EmotionSenseConfig, MemoryStore, PgStore};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use emotionsense_server::http::{start_http_server, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "emotionsense.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// Apply the database schema and exit
    #[arg(long)]
    migrate: bool,

    /// Serve from process memory instead of PostgreSQL
    #[arg(long, conflicts_with_all = ["health", "migrate"])]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match EmotionSenseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let (store, pool) = if args.in_memory {
        tracing::warn!("Running on the in-memory store; nothing survives a restart");
        let store: Arc<dyn EmotionStore> = Arc::new(MemoryStore::new());
        (store, None)
    } else {
        let pool = match emotionsense_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        if args.health {
            match emotionsense_core::db::health_check(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            println!("✅ EmotionSense DB health check passed");
            return Ok(());
        }

        if args.migrate {
            if let Err(e) = emotionsense_core::db::migrate(&pool).await {
                eprintln!("Migration failed: {}", e);
                std::process::exit(1);
            }
            println!("✅ EmotionSense schema applied");
            return Ok(());
        }

        let store: Arc<dyn EmotionStore> = Arc::new(PgStore::new(pool.clone()));
        (store, Some(pool))
    };

    let state = match HttpState::new(store, pool, config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to initialise emotion detectors: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
