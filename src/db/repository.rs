use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::models::{AlertRow, FetchLogRow, LastAlertRow, PriceRow};
use crate::db::{decode_ts, encode_ts};
use crate::error::Result;
use crate::types::{AlertCandidate, AlertKind, FetchLogEntry, PriceRecord, Quote};

/// SQLite-backed persistence for prices, alerts and fetch logs.
/// Every write is an append except the `email_sent` flip on an alert.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, one connection kept alive for the pool's lifetime.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // realtime_prices
    // -----------------------------------------------------------------------

    pub async fn last_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        let row = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT id, symbol, price, previous_close, day_high, day_low,
                   volume, market_cap, market_state, fetch_timestamp
            FROM realtime_prices
            WHERE symbol = ?
            ORDER BY fetch_timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PriceRow::into_quote).transpose()
    }

    pub async fn insert_price(&self, record: &PriceRecord) -> Result<i64> {
        let q = &record.quote;
        let res = sqlx::query(
            r#"
            INSERT INTO realtime_prices (
                symbol, price, previous_close, day_high, day_low,
                volume, market_cap, market_state, fetch_timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&q.symbol)
        .bind(q.price)
        .bind(q.previous_close)
        .bind(q.day_high)
        .bind(q.day_low)
        .bind(q.volume)
        .bind(q.market_cap)
        .bind(q.market_state.as_str())
        .bind(encode_ts(record.fetch_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(res.last_insert_rowid())
    }

    pub async fn price_history(&self, symbol: &str) -> Result<Vec<PriceRow>> {
        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT id, symbol, price, previous_close, day_high, day_low,
                   volume, market_cap, market_state, fetch_timestamp
            FROM realtime_prices
            WHERE symbol = ?
            ORDER BY fetch_timestamp ASC, id ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // alerts
    // -----------------------------------------------------------------------

    pub async fn insert_alert(
        &self,
        candidate: &AlertCandidate,
        message: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO alerts (
                symbol, alert_type, alert_message,
                price_change_percent, benchmark_change_percent, relative_change_percent,
                current_price, previous_price, created_at, email_sent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, FALSE)
            "#,
        )
        .bind(&candidate.symbol)
        .bind(candidate.kind.as_str())
        .bind(message)
        .bind(candidate.price_change_percent)
        .bind(candidate.benchmark_change_percent)
        .bind(candidate.relative_change_percent)
        .bind(candidate.current_price)
        .bind(candidate.previous_price)
        .bind(encode_ts(created_at))
        .execute(&self.pool)
        .await?;

        Ok(res.last_insert_rowid())
    }

    pub async fn set_email_sent(&self, alert_id: i64, sent: bool) -> Result<()> {
        sqlx::query("UPDATE alerts SET email_sent = ? WHERE id = ?")
            .bind(sent)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Latest alert per (symbol, kind) created at or after `since`.
    pub async fn last_alert_times(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, AlertKind, DateTime<Utc>)>> {
        let rows = sqlx::query_as::<_, LastAlertRow>(
            r#"
            SELECT symbol, alert_type, MAX(created_at) AS last_at
            FROM alerts
            WHERE created_at >= ?
            GROUP BY symbol, alert_type
            "#,
        )
        .bind(encode_ts(since))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(kind) = AlertKind::parse(&row.alert_type) else {
                warn!(alert_type = %row.alert_type, "ignoring alert history row with unknown type");
                continue;
            };
            out.push((row.symbol, kind, decode_ts(&row.last_at)?));
        }
        Ok(out)
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertRow>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, symbol, alert_type, alert_message,
                   price_change_percent, benchmark_change_percent, relative_change_percent,
                   current_price, previous_price, created_at, email_sent
            FROM alerts
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // fetch_logs
    // -----------------------------------------------------------------------

    pub async fn insert_fetch_log(&self, entry: &FetchLogEntry) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO fetch_logs (
                fetch_timestamp, fetch_type, market_state,
                symbols_fetched, records_added, records_skipped,
                benchmark_change, errors, duration_seconds
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(encode_ts(entry.fetch_timestamp))
        .bind(entry.fetch_type.as_str())
        .bind(entry.market_state.as_str())
        .bind(i64::from(entry.symbols_fetched))
        .bind(i64::from(entry.records_added))
        .bind(i64::from(entry.records_skipped))
        .bind(entry.benchmark_change)
        .bind(entry.errors.as_deref())
        .bind(entry.duration_seconds)
        .execute(&self.pool)
        .await?;

        Ok(res.last_insert_rowid())
    }

    pub async fn recent_fetch_logs(&self, limit: i64) -> Result<Vec<FetchLogRow>> {
        let rows = sqlx::query_as::<_, FetchLogRow>(
            r#"
            SELECT id, fetch_timestamp, fetch_type, market_state,
                   symbols_fetched, records_added, records_skipped,
                   benchmark_change, errors, duration_seconds
            FROM fetch_logs
            ORDER BY fetch_timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
