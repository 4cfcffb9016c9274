use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CursorError;

/// Resume point for a paginated query: the composite sort key of the last
/// row returned. Travels on the wire as base64 of
/// `{"txn_date": <ISO-8601>, "id": <uuid string>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub txn_date: DateTime<Utc>,
    pub id: Uuid,
}

pub fn encode(cursor: &Cursor) -> String {
    // two plain serde fields, serialization cannot fail
    let json = serde_json::to_vec(cursor).expect("cursor serialization");
    STANDARD.encode(json)
}

/// Exact inverse of `encode` for any token it produced; anything else is
/// rejected with a decode error, never treated as "no cursor".
pub fn decode(token: &str) -> Result<Cursor, CursorError> {
    let bytes = STANDARD.decode(token)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip_is_exact() {
        let cursor = Cursor {
            txn_date: Utc.with_ymd_and_hms(2025, 2, 14, 8, 45, 12).unwrap()
                + chrono::Duration::microseconds(123_456),
            id: Uuid::new_v4(),
        };
        assert_eq!(decode(&encode(&cursor)).unwrap(), cursor);
    }

    #[test]
    fn wire_format_is_base64_json() {
        let cursor = Cursor {
            txn_date: Utc.with_ymd_and_hms(2025, 2, 14, 8, 45, 12).unwrap(),
            id: Uuid::new_v4(),
        };
        let token = encode(&cursor);
        let json: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(&token).unwrap()).unwrap();
        assert!(json["txn_date"].as_str().unwrap().starts_with("2025-02-14T08:45:12"));
        assert_eq!(json["id"], cursor.id.to_string());
    }

    #[test]
    fn garbage_base64_is_a_decode_error() {
        assert!(matches!(decode("%%not-base64%%"), Err(CursorError::Base64(_))));
    }

    #[test]
    fn valid_base64_with_bad_payload_is_a_decode_error() {
        let token = STANDARD.encode(b"{\"wrong\": true}");
        assert!(matches!(decode(&token), Err(CursorError::Payload(_))));

        let token = STANDARD.encode(b"not json at all");
        assert!(matches!(decode(&token), Err(CursorError::Payload(_))));
    }
}
