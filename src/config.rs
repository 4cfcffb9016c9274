use dotenvy::dotenv;
use eyre::Result;
use std::env;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    pub tick_interval_ms: u64,
    pub rolling_window_size: usize,
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // load from .env file if present

    // SQLite DB path (default: transactions.db)
    let db_path = env::var("DATABASE_URL").unwrap_or_else(|_| "transactions.db".to_string());

    // API port (default: 8080)
    let port = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    // Interval between simulated transactions on a stream (default: 2s)
    let tick_interval_ms = env::var("TICK_INTERVAL_MS")
        .unwrap_or_else(|_| "2000".to_string())
        .parse()
        .unwrap_or(2000);

    // Per-user rolling window capacity (default: 20)
    let rolling_window_size = env::var("ROLLING_WINDOW_SIZE")
        .unwrap_or_else(|_| "20".to_string())
        .parse()
        .unwrap_or(20);

    let cfg = Config {
        db_path,
        port,
        tick_interval_ms,
        rolling_window_size,
    };

    info!("Loaded config: {:?}", cfg);

    Ok(cfg)
}
