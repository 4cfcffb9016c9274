//! Transaction anomaly streamer.
//!
//! Simulates per-user monetary transactions on server-sent event streams,
//! flags amounts that spike above a rolling mean of recent history, and
//! serves the persisted rows through a keyset-paginated query API.

pub mod anomaly;
pub mod api;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod stream;
pub mod window;

pub use config::Config;
pub use models::{Transaction, TxnStatus};
pub use stream::StreamCoordinator;
pub use window::WindowCache;
