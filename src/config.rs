use std::str::FromStr;

use crate::error::{AppError, Result};

/// Per-symbol chart endpoint; `meta` carries the quote fields and needs no crumb.
pub const QUOTE_API_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// The chart endpoint throttles clients that do not look like a browser.
pub const HTTP_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";

/// STARTTLS submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

pub const BENCHMARK_SYMBOL: &str = "QQQ";

/// ABSOLUTE_DROP is only raised while the benchmark is above this daily change (%).
/// Below it the move is treated as a broad sell-off rather than a per-stock anomaly.
pub const BROAD_SELLOFF_PCT: f64 = -2.0;

/// Max concurrent quote requests per run.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// NASDAQ-100 constituents tracked by default (override with SYMBOLS).
pub const NASDAQ_100_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "AMZN", "NVDA", "META", "GOOGL", "GOOG", "TSLA", "AVGO", "COST",
    "NFLX", "AMD", "PEP", "ADBE", "CSCO", "TMUS", "INTC", "CMCSA", "TXN", "QCOM",
    "INTU", "AMGN", "HON", "AMAT", "ISRG", "BKNG", "SBUX", "VRTX", "MDLZ", "GILD",
    "ADP", "REGN", "ADI", "LRCX", "PANW", "KLAC", "SNPS", "MELI", "CDNS", "ASML",
    "MAR", "ABNB", "PYPL", "CRWD", "ORLY", "CTAS", "MNST", "NXPI", "CSX", "MRVL",
    "PCAR", "WDAY", "CEG", "ROP", "ADSK", "CPRT", "DXCM", "FTNT", "CHTR", "AEP",
    "PAYX", "ODFL", "MCHP", "KDP", "KHC", "FAST", "ROST", "AZN", "EXC", "EA",
    "VRSK", "CTSH", "LULU", "GEHC", "IDXX", "XEL", "CCEP", "DDOG", "CSGP", "BKR",
    "TTWO", "ANSS", "ON", "ZS", "GFS", "FANG", "CDW", "BIIB", "ILMN", "WBD",
    "MDB", "TEAM", "MRNA", "DLTR", "SIRI", "LCID", "RIVN", "ARM", "SMCI", "COIN",
];

/// Detection and suppression thresholds. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// DROP_THRESHOLD, percent
    pub daily_drop_pct: f64,
    /// HOURLY_DROP_THRESHOLD, percent
    pub hourly_drop_pct: f64,
    /// RELATIVE_DROP_THRESHOLD, percent
    pub relative_drop_pct: f64,
    /// MIN_PRICE_FOR_ALERT, dollars
    pub min_price_for_alert: f64,
    /// MIN_ABS_MOVE_DOLLAR, dollars
    pub min_abs_move_dollar: f64,
    /// MIN_MINUTES_BETWEEN_SAME_ALERT
    pub min_minutes_between_same_alert: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            daily_drop_pct: 5.0,
            hourly_drop_pct: 3.0,
            relative_drop_pct: 3.0,
            min_price_for_alert: 5.0,
            min_abs_move_dollar: 0.50,
            min_minutes_between_same_alert: 60,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        positive("DROP_THRESHOLD", self.daily_drop_pct)?;
        positive("HOURLY_DROP_THRESHOLD", self.hourly_drop_pct)?;
        positive("RELATIVE_DROP_THRESHOLD", self.relative_drop_pct)?;
        non_negative("MIN_PRICE_FOR_ALERT", self.min_price_for_alert)?;
        non_negative("MIN_ABS_MOVE_DOLLAR", self.min_abs_move_dollar)?;
        Ok(())
    }
}

fn positive(name: &str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(AppError::Config(format!("{name} must be a positive number, got {v}")))
    }
}

fn non_negative(name: &str, v: f64) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(AppError::Config(format!("{name} must be >= 0, got {v}")))
    }
}

/// Out-of-band notification credentials. Opaque to the detection core.
///
/// Mail goes out over SMTP with STARTTLS unless `webhook_url` is set.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub webhook_url: String,
    pub sender: String,
    /// SMTP password, or the bearer token when a webhook is used.
    pub secret: String,
    pub recipient: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp_server: DEFAULT_SMTP_SERVER.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            webhook_url: String::new(),
            sender: String::new(),
            secret: String::new(),
            recipient: String::new(),
        }
    }
}

impl NotifyConfig {
    pub fn is_complete(&self) -> bool {
        !self.sender.is_empty() && !self.secret.is_empty() && !self.recipient.is_empty()
    }

    pub fn uses_webhook(&self) -> bool {
        !self.webhook_url.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub symbols: Vec<String>,
    pub benchmark_symbol: String,
    pub thresholds: Thresholds,
    /// Treat PRE/POST as inside the session (INCLUDE_EXTENDED_HOURS)
    pub include_extended_hours: bool,
    pub quote_api_url: String,
    pub fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. A key that is present
    /// but does not parse, or parses to an out-of-range value, is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Thresholds::default();

        let thresholds = Thresholds {
            daily_drop_pct: parse_or(&var, "DROP_THRESHOLD", defaults.daily_drop_pct)?,
            hourly_drop_pct: parse_or(&var, "HOURLY_DROP_THRESHOLD", defaults.hourly_drop_pct)?,
            relative_drop_pct: parse_or(
                &var,
                "RELATIVE_DROP_THRESHOLD",
                defaults.relative_drop_pct,
            )?,
            min_price_for_alert: parse_or(
                &var,
                "MIN_PRICE_FOR_ALERT",
                defaults.min_price_for_alert,
            )?,
            min_abs_move_dollar: parse_or(
                &var,
                "MIN_ABS_MOVE_DOLLAR",
                defaults.min_abs_move_dollar,
            )?,
            min_minutes_between_same_alert: parse_or(
                &var,
                "MIN_MINUTES_BETWEEN_SAME_ALERT",
                defaults.min_minutes_between_same_alert,
            )?,
        };
        thresholds.validate()?;

        let symbols: Vec<String> = match var("SYMBOLS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => NASDAQ_100_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        };
        if symbols.is_empty() {
            return Err(AppError::Config("SYMBOLS must name at least one symbol".to_string()));
        }

        let fetch_concurrency = parse_or(&var, "FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY)?;
        if fetch_concurrency == 0 {
            return Err(AppError::Config("FETCH_CONCURRENCY must be >= 1".to_string()));
        }
        let http_timeout_secs = parse_or(&var, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        if http_timeout_secs == 0 {
            return Err(AppError::Config("HTTP_TIMEOUT_SECS must be >= 1".to_string()));
        }
        let smtp_port = parse_or(&var, "SMTP_PORT", DEFAULT_SMTP_PORT)?;
        if smtp_port == 0 {
            return Err(AppError::Config("SMTP_PORT must be >= 1".to_string()));
        }

        Ok(Self {
            db_path: var("DB_PATH").unwrap_or_else(|| "nasdaq_data.db".to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            symbols,
            benchmark_symbol: var("BENCHMARK_SYMBOL")
                .map(|s| s.trim().to_ascii_uppercase())
                .unwrap_or_else(|| BENCHMARK_SYMBOL.to_string()),
            thresholds,
            include_extended_hours: parse_or(&var, "INCLUDE_EXTENDED_HOURS", true)?,
            quote_api_url: var("QUOTE_API_URL").unwrap_or_else(|| QUOTE_API_URL.to_string()),
            fetch_concurrency,
            http_timeout_secs,
            notify: NotifyConfig {
                smtp_server: var("SMTP_SERVER")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| DEFAULT_SMTP_SERVER.to_string()),
                smtp_port,
                webhook_url: var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
                sender: var("EMAIL_SENDER").unwrap_or_default(),
                secret: var("EMAIL_PASSWORD").unwrap_or_default(),
                recipient: var("EMAIL_RECIPIENT").unwrap_or_default(),
            },
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}
