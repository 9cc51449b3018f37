pub mod models;
pub mod price_store;
pub mod repository;

pub use repository::Store;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{AppError, Result};

/// Timestamps are stored as RFC 3339 UTC text with fixed millisecond precision,
/// so lexical order in SQL matches chronological order.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::CorruptRow(format!("bad timestamp {raw:?}: {e}")))
}
