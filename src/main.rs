use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing::{error, info};

use anomaly_streamer::{api, config, db, WindowCache};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Anomaly Streamer starting...");

    // Load configuration
    let cfg = config::load()?;
    info!("Loaded config:");
    info!("  DB Path: {}", cfg.db_path);
    info!("  Port: {}", cfg.port);
    info!("  Tick interval: {}ms", cfg.tick_interval_ms);
    info!("  Rolling window size: {}", cfg.rolling_window_size);

    // Run DB migrations once at startup
    {
        let conn = db::connect(&cfg.db_path)?;
        db::run_migrations(&conn)?;
    }

    // Shared DB connection and per-user rolling windows
    let shared_conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));
    let windows = WindowCache::new(cfg.rolling_window_size);

    // Spawn API task (stream coordinators are spawned per SSE connection)
    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        let conn = Arc::clone(&shared_conn);
        let windows = windows.clone();
        async move { api::serve(cfg, conn, windows).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Anomaly Streamer stopped.");
    Ok(())
}
