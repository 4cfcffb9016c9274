use rand::Rng;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::anomaly;
use crate::db;
use crate::error::TickError;
use crate::models::{Transaction, TxnStatus};
use crate::window::WindowCache;

pub const DEFAULT_CURRENCY: &str = "INR";

/// One frame of the transaction stream, transport-agnostic. The SSE layer
/// maps these onto wire events.
#[derive(Debug)]
pub enum StreamFrame {
    /// Initial handshake comment, sent before any data.
    Ping,
    /// A freshly persisted transaction.
    Txn(Transaction),
    /// A tick failed; the message is human-readable.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Streaming,
    Closed,
}

/// Per-connection producer of simulated transactions for one user.
///
/// Ticks at a fixed interval: read the rolling window, draw a candidate
/// amount, classify it against the current mean, persist, then (only after
/// the insert committed) append the amount to the window and emit the row.
/// The receiver side of the channel going away is the cancellation signal,
/// observed at the start of every tick.
pub struct StreamCoordinator {
    user_id: Uuid,
    interval: Duration,
    conn: Arc<Mutex<Connection>>,
    windows: WindowCache,
}

impl StreamCoordinator {
    pub fn new(
        user_id: Uuid,
        interval: Duration,
        conn: Arc<Mutex<Connection>>,
        windows: WindowCache,
    ) -> Self {
        Self {
            user_id,
            interval,
            conn,
            windows,
        }
    }

    /// Drive the `Init -> Streaming -> Closed` state machine until the peer
    /// disconnects or a fatal error occurs. Holds no lock and no open DB
    /// work between ticks.
    pub async fn run(self, tx: mpsc::Sender<StreamFrame>) {
        let mut state = State::Init;
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            match state {
                State::Init => {
                    if tx.send(StreamFrame::Ping).await.is_err() {
                        state = State::Closed;
                        continue;
                    }
                    info!("stream opened for user {}", self.user_id);
                    state = State::Streaming;
                }
                State::Streaming => {
                    ticker.tick().await;

                    // Cancellation check first, before touching window or store.
                    if tx.is_closed() {
                        info!("client for user {} disconnected, stopping stream", self.user_id);
                        state = State::Closed;
                        continue;
                    }

                    match self.tick().await {
                        Ok(txn) => {
                            if tx.send(StreamFrame::Txn(txn)).await.is_err() {
                                state = State::Closed;
                            }
                        }
                        Err(TickError::Transient(e)) => {
                            warn!("transient tick failure for user {}: {}", self.user_id, e);
                            if tx
                                .send(StreamFrame::Error(format!("transient store failure: {e}")))
                                .await
                                .is_err()
                            {
                                state = State::Closed;
                            }
                        }
                        Err(TickError::Fatal(msg)) => {
                            error!("fatal tick failure for user {}: {}", self.user_id, msg);
                            let _ = tx
                                .send(StreamFrame::Error(format!("fatal: {msg}")))
                                .await;
                            state = State::Closed;
                        }
                    }
                }
                State::Closed => break,
            }
        }

        info!("stream closed for user {}", self.user_id);
    }

    /// One simulation step. The window is only appended to after the insert
    /// committed, so it never advertises an amount the store could lose.
    async fn tick(&self) -> Result<Transaction, TickError> {
        let (rolling_mean, window_count) = self.windows.mean(self.user_id);

        // Draw before any await so the thread-local RNG never crosses one.
        let (amount, status) = {
            let mut rng = rand::thread_rng();
            let spike = rng.gen_bool(anomaly::ANOMALY_CHANCE);
            let amount = anomaly::simulate_amount(&mut rng, rolling_mean, spike);
            let status = if rng.gen_bool(0.5) {
                TxnStatus::Paid
            } else {
                TxnStatus::Failed
            };
            (amount, status)
        };

        let txn = Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            txn_date: db::now_ts(),
            status,
            is_anomaly: anomaly::is_anomaly(amount, rolling_mean, window_count),
        };

        let conn = Arc::clone(&self.conn);
        let to_insert = txn.clone();
        task::spawn_blocking(move || {
            let db = conn
                .lock()
                .map_err(|_| TickError::Fatal("poisoned db lock".to_string()))?;
            db::insert_transaction(&db, &to_insert).map_err(TickError::from)
        })
        .await
        .map_err(|e| TickError::Fatal(format!("insert task failed: {e}")))??;

        self.windows.append(self.user_id, txn.amount);

        Ok(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tokio::time::timeout;

    fn shared_conn() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        db::run_migrations(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn coordinator(conn: &Arc<Mutex<Connection>>, windows: &WindowCache, user: Uuid) -> StreamCoordinator {
        StreamCoordinator::new(
            user,
            Duration::from_millis(5),
            Arc::clone(conn),
            windows.clone(),
        )
    }

    #[tokio::test]
    async fn first_frame_is_ping_then_transactions_flow() {
        let conn = shared_conn();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(coordinator(&conn, &windows, user).run(tx));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Ping));

        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        match second {
            StreamFrame::Txn(txn) => {
                assert_eq!(txn.user_id, user);
                assert!(txn.amount > Decimal::ZERO);
            }
            other => panic!("expected a transaction frame, got {other:?}"),
        }

        drop(rx);
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tick_persists_before_updating_window() {
        let conn = shared_conn();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let user = Uuid::new_v4();

        let txn = coordinator(&conn, &windows, user).tick().await.unwrap();

        // the realized amount is in the store...
        let stored: i64 = conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT amount_minor FROM transactions WHERE id = ?1",
                [txn.id.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(db::from_minor(stored), txn.amount);

        // ...and the window saw exactly that committed amount
        assert_eq!(windows.get(user), vec![txn.amount]);
    }

    #[tokio::test]
    async fn emitted_transaction_matches_persisted_row_exactly() {
        let conn = shared_conn();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let user = Uuid::new_v4();

        let txn = coordinator(&conn, &windows, user).tick().await.unwrap();

        let stored = conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT id, user_id, amount_minor, currency, txn_date, status, is_anomaly
                 FROM transactions WHERE id = ?1",
                [txn.id.to_string()],
                db::row_to_transaction,
            )
            .unwrap();

        // what went out on the stream is what the query path will return,
        // timestamp included
        assert_eq!(stored.txn_date, txn.txn_date);
        assert_eq!(stored.amount, txn.amount);
        assert_eq!(stored.status, txn.status);
        assert_eq!(stored.is_anomaly, txn.is_anomaly);
    }

    #[tokio::test]
    async fn transient_failure_emits_error_and_keeps_ticking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.db").to_string_lossy().into_owned();
        let conn = {
            let c = db::connect(&path).unwrap();
            db::run_migrations(&c).unwrap();
            // return SQLITE_BUSY immediately instead of waiting out the
            // default 5s busy timeout, which outlives the frame deadlines
            c.busy_timeout(Duration::ZERO).unwrap();
            Arc::new(Mutex::new(c))
        };
        // a second writer holds the write lock, so inserts return SQLITE_BUSY
        let blocker = db::connect(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(coordinator(&conn, &windows, Uuid::new_v4()).run(tx));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Ping));
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, StreamFrame::Error(_)));

        // the stream stayed open; once the lock clears, data flows again
        blocker.execute_batch("COMMIT").unwrap();
        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
                Some(StreamFrame::Txn(txn)) => {
                    assert!(txn.amount > Decimal::ZERO);
                    break;
                }
                // the lock can linger for a tick or two
                Some(StreamFrame::Error(_)) => continue,
                other => panic!("stream closed instead of recovering: {other:?}"),
            }
        }

        drop(rx);
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_tick_leaves_window_untouched() {
        let conn = shared_conn();
        conn.lock().unwrap().execute_batch("DROP TABLE transactions").unwrap();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let user = Uuid::new_v4();

        let err = coordinator(&conn, &windows, user).tick().await.unwrap_err();
        assert!(matches!(err, TickError::Fatal(_)));
        assert!(windows.get(user).is_empty());
    }

    #[tokio::test]
    async fn fatal_failure_emits_error_then_closes() {
        let conn = shared_conn();
        conn.lock().unwrap().execute_batch("DROP TABLE transactions").unwrap();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(coordinator(&conn, &windows, Uuid::new_v4()).run(tx));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, StreamFrame::Ping));
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, StreamFrame::Error(_)));

        // stream is closed: channel drains to None and the task finishes
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn disconnect_stops_the_stream_within_a_tick() {
        let conn = shared_conn();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(coordinator(&conn, &windows, Uuid::new_v4()).run(tx));

        drop(rx); // peer gone
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn window_fills_and_classifier_kicks_in() {
        let conn = shared_conn();
        let windows = WindowCache::new(anomaly::ROLLING_WINDOW_SIZE);
        let user = Uuid::new_v4();
        let c = coordinator(&conn, &windows, user);

        for _ in 0..anomaly::MIN_TXNS_FOR_ANOMALY_CHECK {
            c.tick().await.unwrap();
        }
        let (mean, count) = windows.mean(user);
        assert_eq!(count, anomaly::MIN_TXNS_FOR_ANOMALY_CHECK);
        assert!(mean > Decimal::ZERO);

        // from here on, each tick's label must agree with a re-check against
        // the pre-tick mean
        let (pre_mean, pre_count) = windows.mean(user);
        let txn = c.tick().await.unwrap();
        assert_eq!(
            txn.is_anomaly,
            anomaly::is_anomaly(txn.amount, pre_mean, pre_count)
        );
    }
}
