use chrono::{DateTime, SecondsFormat, Utc};
use eyre::Result;
use rusqlite::{params, Connection, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::Transaction;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
  id           TEXT PRIMARY KEY,
  user_id      TEXT NOT NULL,
  amount_minor INTEGER NOT NULL, -- minor units, so SQL range filters compare numerically
  currency     TEXT NOT NULL,
  txn_date     TEXT NOT NULL,    -- RFC3339 UTC with fixed micros, sorts chronologically
  status       TEXT NOT NULL CHECK (status IN ('paid','failed')),
  is_anomaly   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS ix_user_date_id ON transactions (user_id, txn_date, id);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Format a timestamp the way the `transactions` table stores it. Fixed
/// microsecond precision with a `Z` suffix keeps lexicographic order equal
/// to chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Current instant truncated to the precision the store keeps, so a row
/// built from it survives a store round trip bit-for-bit.
pub fn now_ts() -> DateTime<Utc> {
    let now = Utc::now();
    now - chrono::Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000))
}

/// Convert a 2-dp decimal amount into integer minor units for storage.
pub fn to_minor(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

fn text_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Persist one transaction as a single atomic insert
pub fn insert_transaction(conn: &Connection, txn: &Transaction) -> rusqlite::Result<()> {
    let amount_minor = to_minor(txn.amount).ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(
            format!("amount out of range: {}", txn.amount).into(),
        )
    })?;

    conn.execute(
        r#"
        INSERT INTO transactions (id, user_id, amount_minor, currency, txn_date, status, is_anomaly)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            txn.id.to_string(),
            txn.user_id.to_string(),
            amount_minor,
            txn.currency,
            format_ts(&txn.txn_date),
            txn.status,
            txn.is_anomaly,
        ],
    )?;
    Ok(())
}

/// Map a `SELECT id, user_id, amount_minor, currency, txn_date, status, is_anomaly` row
pub fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let id_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let amount_minor: i64 = row.get(2)?;
    let currency: String = row.get(3)?;
    let date_str: String = row.get(4)?;
    let status = row.get(5)?;
    let is_anomaly: bool = row.get(6)?;

    Ok(Transaction {
        id: Uuid::parse_str(&id_str).map_err(|e| text_err(0, e))?,
        user_id: Uuid::parse_str(&user_str).map_err(|e| text_err(1, e))?,
        amount: from_minor(amount_minor),
        currency,
        txn_date: parse_ts(&date_str).map_err(|e| text_err(4, e))?,
        status,
        is_anomaly,
    })
}

/// All distinct user ids present in the transactions table
pub fn distinct_users(conn: &Connection) -> rusqlite::Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM transactions ORDER BY user_id")?;
    let rows = stmt.query_map([], |r| {
        let s: String = r.get(0)?;
        Uuid::parse_str(&s).map_err(|e| text_err(0, e))
    })?;
    rows.collect()
}
