//! Seed the transactions table with a year of simulated history for a
//! handful of users, with anomaly labels computed against each user's
//! rolling window as the data is generated.

use chrono::Duration;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::VecDeque;
use tracing::info;
use uuid::Uuid;

use anomaly_streamer::models::{Transaction, TxnStatus};
use anomaly_streamer::{anomaly, config, db};

const USERS: usize = 10;
const TXNS_PER_USER: usize = 15_000;
const SECONDS_PER_YEAR: i64 = 31_536_000;

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let cfg = config::load()?;
    let mut conn = db::connect(&cfg.db_path)?;
    db::run_migrations(&conn)?;

    let mut rng = rand::thread_rng();
    let now = db::now_ts();
    let mut inserted = 0usize;

    info!("Seeding {} users x {} transactions into {}", USERS, TXNS_PER_USER, cfg.db_path);

    // One big batch; partial seed data is useless
    let tx = conn.transaction()?;
    for _ in 0..USERS {
        let user_id = Uuid::new_v4();
        let mut recent: VecDeque<Decimal> = VecDeque::with_capacity(cfg.rolling_window_size);

        for _ in 0..TXNS_PER_USER {
            // Occasional large spikes so the dataset contains real anomalies
            let raw = if rng.gen_bool(anomaly::ANOMALY_CHANCE) {
                rng.gen_range(5_000.0..100_000.0)
            } else {
                rng.gen_range(10.0..500.0)
            };
            let amount = Decimal::from_f64(raw)
                .unwrap_or(Decimal::ZERO)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

            let rolling_mean = if recent.is_empty() {
                Decimal::ZERO
            } else {
                recent.iter().copied().sum::<Decimal>() / Decimal::from(recent.len() as u64)
            };
            let is_anomaly = anomaly::is_anomaly(amount, rolling_mean, recent.len());

            recent.push_front(amount);
            recent.truncate(cfg.rolling_window_size);

            let txn = Transaction {
                id: Uuid::new_v4(),
                user_id,
                amount,
                currency: "INR".to_string(),
                txn_date: now - Duration::seconds(rng.gen_range(0..SECONDS_PER_YEAR)),
                status: if rng.gen_bool(0.5) {
                    TxnStatus::Paid
                } else {
                    TxnStatus::Failed
                },
                is_anomaly,
            };
            db::insert_transaction(&tx, &txn)?;
            inserted += 1;
        }
    }
    tx.commit()?;

    info!("Seeded {} transactions", inserted);
    Ok(())
}
