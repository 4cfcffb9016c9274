use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::task;
use uuid::Uuid;

use crate::cursor::{self, Cursor};
use crate::db;
use crate::error::QueryError;
use crate::models::{ListTransactionsResponse, Transaction};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Filters for `GET /transactions`. `user_id` is required; everything else
/// narrows the range.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionFilters {
    pub user_id: Uuid,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// Run one page of the keyset query.
///
/// Total order is `txn_date DESC, id DESC`; the cursor predicate
/// `txn_date < c OR (txn_date = c AND id < c.id)` resumes strictly after the
/// last returned row, so following cursors never duplicates or skips rows
/// for a static dataset. Pagination is not a snapshot: inserts between page
/// fetches may shift which rows later pages see.
pub async fn list_transactions(
    conn: Arc<Mutex<Connection>>,
    filters: TransactionFilters,
) -> Result<ListTransactionsResponse, QueryError> {
    // Decode up front: a malformed token is a client error, distinct from
    // "no cursor supplied".
    let resume = match filters.cursor.as_deref() {
        Some(token) if !token.is_empty() => Some(cursor::decode(token)?),
        _ => None,
    };
    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_SIZE) as i64;

    let transactions = task::spawn_blocking(move || {
        let db = conn
            .lock()
            .map_err(|_| QueryError::Internal("poisoned db lock".to_string()))?;
        run_page(&db, &filters, resume.as_ref(), limit).map_err(QueryError::from)
    })
    .await
    .map_err(|e| QueryError::Internal(format!("query task failed: {e}")))??;

    // A short page is the last page; a full page hands back the key of its
    // final row as the resume token.
    let next_cursor = if transactions.len() as i64 == limit && limit > 0 {
        transactions
            .last()
            .map(|t| {
                cursor::encode(&Cursor {
                    txn_date: t.txn_date,
                    id: t.id,
                })
            })
            .unwrap_or_default()
    } else {
        String::new()
    };

    Ok(ListTransactionsResponse {
        transactions,
        cursor: next_cursor,
    })
}

fn run_page(
    db: &Connection,
    filters: &TransactionFilters,
    resume: Option<&Cursor>,
    limit: i64,
) -> rusqlite::Result<Vec<Transaction>> {
    let mut conditions = vec!["user_id = ?1".to_string()];
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(filters.user_id.to_string())];

    if let Some(from) = &filters.from_date {
        params.push(Box::new(db::format_ts(from)));
        conditions.push(format!("txn_date >= ?{}", params.len()));
    }
    if let Some(to) = &filters.to_date {
        params.push(Box::new(db::format_ts(to)));
        conditions.push(format!("txn_date <= ?{}", params.len()));
    }
    if let Some(min) = filters.min_amount {
        params.push(Box::new(db::to_minor(min).unwrap_or(i64::MIN)));
        conditions.push(format!("amount_minor >= ?{}", params.len()));
    }
    if let Some(max) = filters.max_amount {
        params.push(Box::new(db::to_minor(max).unwrap_or(i64::MAX)));
        conditions.push(format!("amount_minor <= ?{}", params.len()));
    }
    if let Some(c) = resume {
        params.push(Box::new(db::format_ts(&c.txn_date)));
        let ts_idx = params.len();
        params.push(Box::new(c.id.to_string()));
        let id_idx = params.len();
        conditions.push(format!(
            "(txn_date < ?{ts_idx} OR (txn_date = ?{ts_idx} AND id < ?{id_idx}))"
        ));
    }
    params.push(Box::new(limit));

    let sql = format!(
        "SELECT id, user_id, amount_minor, currency, txn_date, status, is_anomaly
         FROM transactions
         WHERE {}
         ORDER BY txn_date DESC, id DESC
         LIMIT ?{}",
        conditions.join(" AND "),
        params.len()
    );

    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), db::row_to_transaction)?;
    rows.collect()
}
