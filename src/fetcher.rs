use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::debug;

use crate::config::{Config, HTTP_USER_AGENT};
use crate::error::{FetchError, Result};
use crate::types::{MarketState, Quote};

/// Market-data collaborator: one quote per call.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> std::result::Result<Quote, FetchError>;
}

/// Quote fetcher for the Yahoo Finance v8 chart endpoint, one request per symbol.
pub struct YahooQuoteFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuoteFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(HTTP_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.quote_api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteFetcher {
    async fn fetch_quote(&self, symbol: &str) -> std::result::Result<Quote, FetchError> {
        let http = |source| FetchError::Http { symbol: symbol.to_string(), source };

        let resp = self
            .client
            .get(format!("{}/{}", self.base_url, symbol))
            .query(&[("range", "1d"), ("interval", "1d")])
            .send()
            .await
            .map_err(http)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                symbol: symbol.to_string(),
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(http)?;
        parse_chart_response(symbol, &body, Utc::now())
    }
}

/// Maps `chart.result[0].meta` onto a [`Quote`].
///
/// The chart payload has no market state, so it is derived from
/// `currentTradingPeriod` at `fetched_at`. `fetched_at` also stands in for a
/// missing `regularMarketTime`. Market cap is not part of the payload.
pub fn parse_chart_response(
    symbol: &str,
    body: &serde_json::Value,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<Quote, FetchError> {
    let malformed = |reason: &str| FetchError::Malformed {
        symbol: symbol.to_string(),
        reason: reason.to_string(),
    };

    let chart = body.get("chart").ok_or_else(|| malformed("missing chart"))?;

    if let Some(err) = chart.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(|c| c.as_str()).unwrap_or_default();
        if code.eq_ignore_ascii_case("Not Found") {
            return Err(FetchError::NotFound(symbol.to_string()));
        }
        let description = err
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or(code);
        return Err(malformed(description));
    }

    let meta = chart
        .get("result")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))?
        .get("meta")
        .ok_or_else(|| malformed("missing chart.result[0].meta"))?;

    let price = num(meta, "regularMarketPrice")
        .filter(|p| *p > 0.0)
        .ok_or_else(|| malformed("missing regularMarketPrice"))?;

    let timestamp = meta
        .get("regularMarketTime")
        .and_then(|t| t.as_i64())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or(fetched_at);

    let market_state = meta
        .get("currentTradingPeriod")
        .map(|p| state_at(p, fetched_at.timestamp()))
        .unwrap_or(MarketState::Closed);

    let volume = num(meta, "regularMarketVolume").map(|v| v as i64).unwrap_or(0);

    debug!(symbol, price, state = %market_state, "parsed quote");

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        previous_close: num(meta, "previousClose").or_else(|| num(meta, "chartPreviousClose")),
        day_high: num(meta, "regularMarketDayHigh"),
        day_low: num(meta, "regularMarketDayLow"),
        volume,
        market_cap: None,
        market_state,
        timestamp,
    })
}

/// Which of the `pre` / `regular` / `post` windows contains `at` (epoch seconds).
fn state_at(periods: &serde_json::Value, at: i64) -> MarketState {
    let contains = |name: &str| {
        let window = periods.get(name);
        let bound = |key: &str| window.and_then(|w| w.get(key)).and_then(|v| v.as_i64());
        matches!((bound("start"), bound("end")), (Some(start), Some(end)) if at >= start && at < end)
    };
    if contains("regular") {
        MarketState::Regular
    } else if contains("pre") {
        MarketState::Pre
    } else if contains("post") {
        MarketState::Post
    } else {
        MarketState::Closed
    }
}

/// Numeric field that may arrive as a number or a numeric string.
fn num(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
        .filter(|x| x.is_finite())
}

/// Fetches every symbol with at most `concurrency` requests in flight.
/// Results come back in the order of `symbols`.
pub async fn fetch_universe(
    source: &dyn QuoteSource,
    symbols: &[String],
    concurrency: usize,
) -> Vec<(String, std::result::Result<Quote, FetchError>)> {
    stream::iter(symbols.iter().cloned())
        .map(|symbol| async move {
            let res = source.fetch_quote(&symbol).await;
            (symbol, res)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
