use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketState {
    Pre,
    Regular,
    Post,
    Closed,
}

impl MarketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketState::Pre => "PRE",
            MarketState::Regular => "REGULAR",
            MarketState::Post => "POST",
            MarketState::Closed => "CLOSED",
        }
    }

    /// Parses both our own labels and the provider's extended ones
    /// (`PREPRE`, `POSTPOST`). Unknown labels map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRE" | "PREPRE" => Some(MarketState::Pre),
            "REGULAR" => Some(MarketState::Regular),
            "POST" | "POSTPOST" => Some(MarketState::Post),
            "CLOSED" => Some(MarketState::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    /// Zero or absent for newly-listed / illiquid symbols. Use [`Quote::reference_close`].
    pub previous_close: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub volume: i64,
    pub market_cap: Option<f64>,
    pub market_state: MarketState,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Previous close usable as a reference price, i.e. present and strictly positive.
    pub fn reference_close(&self) -> Option<f64> {
        self.previous_close.filter(|c| c.is_finite() && *c > 0.0)
    }

    /// Percent change from the previous close, if the previous close is known.
    pub fn daily_change_pct(&self) -> Option<f64> {
        pct_change(self.price, self.reference_close()?)
    }
}

/// `(current - reference) / reference * 100`, `None` when the reference is not a valid price.
pub fn pct_change(current: f64, reference: f64) -> Option<f64> {
    if !reference.is_finite() || reference <= 0.0 || !current.is_finite() {
        return None;
    }
    Some((current - reference) / reference * 100.0)
}

/// Snapshot row written to `realtime_prices`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub quote: Quote,
    pub fetch_timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// Daily drop relative to the benchmark's daily move.
    RelativeDrop,
    /// Daily drop from the previous close, market roughly flat.
    AbsoluteDrop,
    /// Drop since the last stored sample.
    HourlyDrop,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RelativeDrop => "RELATIVE_DROP",
            AlertKind::AbsoluteDrop => "ABSOLUTE_DROP",
            AlertKind::HourlyDrop => "HOURLY_DROP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RELATIVE_DROP" => Some(AlertKind::RelativeDrop),
            "ABSOLUTE_DROP" => Some(AlertKind::AbsoluteDrop),
            "HOURLY_DROP" => Some(AlertKind::HourlyDrop),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transient detector output, not yet admitted by the throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub symbol: String,
    pub kind: AlertKind,
    /// Daily change for RELATIVE/ABSOLUTE, change since last sample for HOURLY.
    pub price_change_percent: f64,
    pub benchmark_change_percent: Option<f64>,
    pub relative_change_percent: Option<f64>,
    pub current_price: f64,
    /// Previous close for daily kinds, last stored price for HOURLY.
    pub previous_price: f64,
}

impl AlertCandidate {
    pub fn message(&self, benchmark_symbol: &str) -> String {
        match self.kind {
            AlertKind::RelativeDrop => format!(
                "{:.2}% vs {} {:.2}% (relative {:.2}%)",
                self.price_change_percent,
                benchmark_symbol,
                self.benchmark_change_percent.unwrap_or_default(),
                self.relative_change_percent.unwrap_or_default(),
            ),
            AlertKind::AbsoluteDrop => {
                format!("{:.2}% daily drop", self.price_change_percent)
            }
            AlertKind::HourlyDrop => format!(
                "{:.2}% since last sample (${:.2} -> ${:.2})",
                self.price_change_percent, self.previous_price, self.current_price,
            ),
        }
    }
}

/// Durable alert. Only `email_sent` changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub candidate: AlertCandidate,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub email_sent: bool,
}

// ---------------------------------------------------------------------------
// Market clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub is_trading_day: bool,
    pub is_within_session: bool,
    pub market_state: MarketState,
    /// True when the calendar was unavailable and the weekday/fixed-hours fallback was used.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Fetch log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchType {
    Realtime,
    Skipped,
}

impl FetchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchType::Realtime => "REALTIME",
            FetchType::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for FetchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchLogEntry {
    pub fetch_timestamp: DateTime<Utc>,
    pub fetch_type: FetchType,
    pub market_state: MarketState,
    pub symbols_fetched: u32,
    pub records_added: u32,
    pub records_skipped: u32,
    pub benchmark_change: Option<f64>,
    /// `"; "`-joined error text, `None` when the run was clean.
    pub errors: Option<String>,
    pub duration_seconds: f64,
}
