// src/models.rs
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settlement status of a transaction. Closed set; stored lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    Paid,
    Failed,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Paid => "paid",
            TxnStatus::Failed => "failed",
        }
    }
}

impl ToSql for TxnStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TxnStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "paid" => Ok(TxnStatus::Paid),
            "failed" => Ok(TxnStatus::Failed),
            other => Err(FromSqlError::Other(
                format!("unknown transaction status: {other}").into(),
            )),
        }
    }
}

/// A single monetary transaction, immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal, // fixed-point, 2 fractional digits
    pub currency: String,
    pub txn_date: DateTime<Utc>,
    pub status: TxnStatus,
    pub is_anomaly: bool, // classifier verdict at creation time
}

/// Response body for `GET /transactions`
#[derive(Debug, Serialize, Deserialize)]
pub struct ListTransactionsResponse {
    pub transactions: Vec<Transaction>,
    /// Resume token for the next page; empty string when no further page exists.
    pub cursor: String,
}

/// Response body for `GET /users`
#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TxnStatus::Paid).unwrap(), "\"paid\"");
        assert_eq!(
            serde_json::from_str::<TxnStatus>("\"failed\"").unwrap(),
            TxnStatus::Failed
        );
    }

    #[test]
    fn transaction_json_carries_all_fields() {
        let txn = Transaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: Decimal::new(12345, 2),
            currency: "INR".to_string(),
            txn_date: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            status: TxnStatus::Paid,
            is_anomaly: true,
        };
        let value: serde_json::Value = serde_json::to_value(&txn).unwrap();
        assert_eq!(value["amount"], "123.45");
        assert_eq!(value["status"], "paid");
        assert_eq!(value["is_anomaly"], true);
        assert_eq!(value["id"], txn.id.to_string());
    }
}
