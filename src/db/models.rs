//! Row types for the three tables in `migrations/0001_init.sql`.
use serde::Serialize;

use crate::db::decode_ts;
use crate::error::{AppError, Result};
use crate::types::{MarketState, Quote};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PriceRow {
    pub id: i64,
    pub symbol: String,
    pub price: f64,
    pub previous_close: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub volume: i64,
    pub market_cap: Option<f64>,
    pub market_state: String,
    pub fetch_timestamp: String,
}

impl PriceRow {
    /// Rebuilds the stored quote. The stored fetch time stands in for the quote time.
    pub fn into_quote(self) -> Result<Quote> {
        let market_state = MarketState::parse(&self.market_state).ok_or_else(|| {
            AppError::CorruptRow(format!(
                "realtime_prices.id={} has unknown market_state {:?}",
                self.id, self.market_state
            ))
        })?;
        Ok(Quote {
            timestamp: decode_ts(&self.fetch_timestamp)?,
            symbol: self.symbol,
            price: self.price,
            previous_close: self.previous_close,
            day_high: self.day_high,
            day_low: self.day_low,
            volume: self.volume,
            market_cap: self.market_cap,
            market_state,
        })
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub symbol: String,
    pub alert_type: String,
    pub alert_message: Option<String>,
    pub price_change_percent: Option<f64>,
    pub benchmark_change_percent: Option<f64>,
    pub relative_change_percent: Option<f64>,
    pub current_price: Option<f64>,
    pub previous_price: Option<f64>,
    pub created_at: String,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FetchLogRow {
    pub id: i64,
    pub fetch_timestamp: String,
    pub fetch_type: String,
    pub market_state: String,
    pub symbols_fetched: i64,
    pub records_added: i64,
    pub records_skipped: i64,
    pub benchmark_change: Option<f64>,
    pub errors: Option<String>,
    pub duration_seconds: f64,
}

/// Latest alert time per (symbol, alert_type), used to rehydrate the throttle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LastAlertRow {
    pub symbol: String,
    pub alert_type: String,
    pub last_at: String,
}
