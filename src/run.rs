use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::price_store::{should_persist, to_record};
use crate::db::Store;
use crate::detector::{detect, AlertThrottle};
use crate::error::{NotifyError, Result};
use crate::fetcher::{fetch_universe, QuoteSource};
use crate::market_clock::MarketClock;
use crate::notifier::{render_alert_email, Notifier};
use crate::types::{Alert, AlertCandidate, ClockReading, FetchLogEntry, FetchType, Quote};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Session closed: only a SKIPPED fetch log was written.
    Skipped(FetchLogEntry),
    Completed(RunReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub log: FetchLogEntry,
    pub alerts: Vec<Alert>,
    pub suppressed: u32,
}

/// One invocation: gate on the market clock, fetch the universe and the
/// benchmark, evaluate each symbol in universe order, then write the summary.
///
/// Symbol-level failures end up in the log's `errors` text. Store failures
/// abort with `Err` and no fetch log is written.
pub struct FetchRun<'a> {
    cfg: &'a Config,
    store: &'a Store,
    clock: &'a MarketClock,
    source: &'a dyn QuoteSource,
    notifier: &'a dyn Notifier,
    force: bool,
}

impl<'a> FetchRun<'a> {
    pub fn new(
        cfg: &'a Config,
        store: &'a Store,
        clock: &'a MarketClock,
        source: &'a dyn QuoteSource,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self { cfg, store, clock, source, notifier, force: false }
    }

    /// Skip the market-clock gate.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub async fn execute(&self, now: DateTime<Utc>) -> Result<RunOutcome> {
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        // --- GATE ---
        let reading = self.clock.read(now);
        if reading.degraded {
            errors.push("market calendar unavailable; used weekday/fixed-hours fallback".to_string());
        }
        if !reading.is_within_session && !self.force {
            return self.skip(now, reading, errors, started).await;
        }

        // --- FETCH ---
        let benchmark = self.fetch_benchmark(&mut errors).await;
        let benchmark_change = benchmark.as_ref().and_then(Quote::daily_change_pct);

        let universe: Vec<String> = self
            .cfg
            .symbols
            .iter()
            .filter(|s| **s != self.cfg.benchmark_symbol)
            .cloned()
            .collect();
        let fetched = fetch_universe(self.source, &universe, self.cfg.fetch_concurrency).await;

        let mut quotes = Vec::with_capacity(fetched.len());
        for (symbol, res) in fetched {
            match res {
                Ok(q) => quotes.push(q),
                Err(e) => {
                    warn!(symbol = %symbol, "fetch failed: {e}");
                    errors.push(e.to_string());
                }
            }
        }
        info!(
            fetched = quotes.len(),
            failed = universe.len() - quotes.len(),
            benchmark_change = ?benchmark_change,
            "Fetched {}/{} symbols",
            quotes.len(),
            universe.len(),
        );

        // --- EVALUATE ---
        let mut throttle = AlertThrottle::new(self.cfg.thresholds.min_minutes_between_same_alert);
        let since = now - throttle.window();
        throttle.hydrate(self.store.last_alert_times(since).await?);

        let mut added = 0u32;
        let mut skipped = 0u32;
        let mut suppressed = 0u32;
        let mut alerts = Vec::new();

        for quote in &quotes {
            let last = self.store.last_quote(&quote.symbol).await?;

            for candidate in detect(quote, benchmark.as_ref(), last.as_ref(), &self.cfg.thresholds) {
                if !throttle.admit(&candidate, now) {
                    debug!(
                        symbol = %candidate.symbol,
                        kind = %candidate.kind,
                        last = ?throttle.last_emitted(&candidate.symbol, candidate.kind),
                        "suppressed"
                    );
                    suppressed += 1;
                    continue;
                }
                alerts.push(self.emit(candidate, now).await?);
            }

            if should_persist(quote, last.as_ref()) {
                self.store.insert_price(&to_record(quote, now)).await?;
                added += 1;
            } else {
                debug!(symbol = %quote.symbol, price = quote.price, "unchanged, not stored");
                skipped += 1;
            }
        }

        // --- SUMMARIZE ---
        let log = FetchLogEntry {
            fetch_timestamp: now,
            fetch_type: FetchType::Realtime,
            market_state: reading.market_state,
            symbols_fetched: quotes.len() as u32,
            records_added: added,
            records_skipped: skipped,
            benchmark_change,
            errors: join_errors(&errors),
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        self.store.insert_fetch_log(&log).await?;

        info!(
            added,
            skipped,
            alerts = alerts.len(),
            suppressed,
            errors = errors.len(),
            "Run complete in {:.2}s",
            log.duration_seconds,
        );

        Ok(RunOutcome::Completed(RunReport { log, alerts, suppressed }))
    }

    async fn skip(
        &self,
        now: DateTime<Utc>,
        reading: ClockReading,
        errors: Vec<String>,
        started: Instant,
    ) -> Result<RunOutcome> {
        info!(
            state = %reading.market_state,
            trading_day = reading.is_trading_day,
            "Market session closed, skipping fetch"
        );
        let log = FetchLogEntry {
            fetch_timestamp: now,
            fetch_type: FetchType::Skipped,
            market_state: reading.market_state,
            symbols_fetched: 0,
            records_added: 0,
            records_skipped: 0,
            benchmark_change: None,
            errors: join_errors(&errors),
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        self.store.insert_fetch_log(&log).await?;
        Ok(RunOutcome::Skipped(log))
    }

    async fn fetch_benchmark(&self, errors: &mut Vec<String>) -> Option<Quote> {
        let symbol = &self.cfg.benchmark_symbol;
        match self.source.fetch_quote(symbol).await {
            Ok(q) => {
                if q.reference_close().is_none() {
                    warn!(symbol = %symbol, "benchmark has no previous close; relative alerts disabled");
                    errors.push(format!("benchmark {symbol} has no previous close"));
                }
                Some(q)
            }
            Err(e) => {
                warn!(symbol = %symbol, "benchmark unavailable, relative alerts disabled: {e}");
                errors.push(format!("benchmark unavailable: {e}"));
                None
            }
        }
    }

    /// Persist an admitted candidate, notify, and record the delivery outcome.
    async fn emit(&self, candidate: AlertCandidate, now: DateTime<Utc>) -> Result<Alert> {
        let message = candidate.message(&self.cfg.benchmark_symbol);
        let id = self.store.insert_alert(&candidate, &message, now).await?;
        warn!(
            symbol = %candidate.symbol,
            kind = %candidate.kind,
            change = candidate.price_change_percent,
            "ALERT {} {}: {}",
            candidate.symbol,
            candidate.kind,
            message,
        );

        let mut alert = Alert { id, candidate, message, created_at: now, email_sent: false };

        match self.deliver(&alert).await {
            Ok(()) => {
                self.store.set_email_sent(id, true).await?;
                alert.email_sent = true;
            }
            Err(e) => warn!(alert_id = id, "notification not delivered: {e}"),
        }

        Ok(alert)
    }

    async fn deliver(&self, alert: &Alert) -> std::result::Result<(), NotifyError> {
        let (subject, body) =
            render_alert_email(alert, &self.cfg.benchmark_symbol, &self.cfg.thresholds)?;
        self.notifier.send(&subject, &body, self.notifier.recipient()).await
    }
}

fn join_errors(errors: &[String]) -> Option<String> {
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::error::FetchError;
    use crate::market_clock::UsEquityCalendar;
    use crate::types::{AlertKind, MarketState};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Friday 2026-10-16 10:00 EDT
    fn open_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap()
    }

    /// Saturday
    fn closed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 14, 0, 0).unwrap()
    }

    fn cfg(symbols: &[&str]) -> Config {
        let list = symbols.join(",");
        Config::from_lookup(|k| match k {
            "SYMBOLS" => Some(list.clone()),
            _ => None,
        })
        .unwrap()
    }

    fn quote(symbol: &str, price: f64, prev: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
            previous_close: Some(prev),
            day_high: Some(prev.max(price)),
            day_low: Some(prev.min(price)),
            volume: 1_000,
            market_cap: None,
            market_state: MarketState::Regular,
            timestamp: open_time(),
        }
    }

    #[derive(Default)]
    struct FakeSource {
        quotes: Mutex<HashMap<String, Quote>>,
    }

    impl FakeSource {
        fn with(quotes: Vec<Quote>) -> Self {
            let s = Self::default();
            for q in quotes {
                s.set(q);
            }
            s
        }

        fn set(&self, q: Quote) {
            self.quotes.lock().unwrap().insert(q.symbol.clone(), q);
        }
    }

    #[async_trait]
    impl QuoteSource for FakeSource {
        async fn fetch_quote(&self, symbol: &str) -> std::result::Result<Quote, FetchError> {
            self.quotes
                .lock()
                .unwrap()
                .get(symbol)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(symbol.to_string()))
        }
    }

    struct FakeNotifier {
        deliver: bool,
        sent: Mutex<Vec<String>>,
    }

    impl FakeNotifier {
        fn new(deliver: bool) -> Self {
            Self { deliver, sent: Mutex::new(Vec::new()) }
        }

        fn subjects(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, subject: &str, _body: &str, _recipient: &str) -> std::result::Result<(), NotifyError> {
            self.sent.lock().unwrap().push(subject.to_string());
            if self.deliver {
                Ok(())
            } else {
                Err(NotifyError::Rejected(503))
            }
        }

        fn recipient(&self) -> &str {
            "ops@example.com"
        }

        fn transport(&self) -> &'static str {
            "fake"
        }
    }

    async fn store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn clock() -> MarketClock {
        MarketClock::new(Box::new(UsEquityCalendar), true)
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed(r) => r,
            RunOutcome::Skipped(_) => panic!("expected a completed run"),
        }
    }

    #[tokio::test]
    async fn closed_session_writes_only_a_skipped_log() {
        let cfg = cfg(&["AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("AAPL", 90.0, 100.0), quote("QQQ", 500.0, 500.0)]);
        let notifier = FakeNotifier::new(true);

        let outcome = FetchRun::new(&cfg, &store, &clock, &source, &notifier)
            .execute(closed_time())
            .await
            .unwrap();

        let RunOutcome::Skipped(log) = outcome else { panic!("expected skip") };
        assert_eq!(log.fetch_type, FetchType::Skipped);
        assert_eq!(log.market_state, MarketState::Closed);
        assert!(store.last_quote("AAPL").await.unwrap().is_none());
        assert!(notifier.subjects().is_empty());

        let logs = store.recent_fetch_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].fetch_type, "SKIPPED");
    }

    #[tokio::test]
    async fn force_bypasses_the_gate() {
        let cfg = cfg(&["AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("AAPL", 100.0, 100.0), quote("QQQ", 500.0, 500.0)]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .force(true)
                .execute(closed_time())
                .await
                .unwrap(),
        );
        assert_eq!(report.log.fetch_type, FetchType::Realtime);
        assert_eq!(report.log.market_state, MarketState::Closed);
        assert_eq!(report.log.records_added, 1);
    }

    #[tokio::test]
    async fn relative_drop_is_alerted_notified_and_stored() {
        let cfg = cfg(&["NVDA", "AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![
            quote("QQQ", 490.0, 500.0),
            quote("NVDA", 93.0, 100.0),
            quote("AAPL", 200.0, 200.0),
        ]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );

        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.candidate.symbol, "NVDA");
        assert_eq!(alert.candidate.kind, AlertKind::RelativeDrop);
        assert!(alert.email_sent);
        assert_eq!(notifier.subjects().len(), 1);

        assert_eq!(report.log.symbols_fetched, 2);
        assert_eq!(report.log.records_added, 2);
        assert_eq!(report.log.records_skipped, 0);
        assert!((report.log.benchmark_change.unwrap() + 2.0).abs() < 1e-9);
        assert_eq!(report.log.errors, None);

        let rows = store.recent_alerts(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].email_sent);
        assert_eq!(rows[0].alert_type, "RELATIVE_DROP");
    }

    #[tokio::test]
    async fn same_quote_twice_is_stored_and_alerted_once() {
        let cfg = cfg(&["MSFT"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("MSFT", 94.0, 100.0)]);
        let notifier = FakeNotifier::new(true);
        let run = FetchRun::new(&cfg, &store, &clock, &source, &notifier);

        let first = completed(run.execute(open_time()).await.unwrap());
        assert_eq!(first.log.records_added, 1);
        assert_eq!(first.alerts.len(), 1);
        assert_eq!(first.alerts[0].candidate.kind, AlertKind::AbsoluteDrop);

        let second = completed(run.execute(open_time() + Duration::minutes(5)).await.unwrap());
        assert_eq!(second.log.records_added, 0);
        assert_eq!(second.log.records_skipped, 1);
        assert!(second.alerts.is_empty());
        assert_eq!(second.suppressed, 1);

        assert_eq!(store.price_history("MSFT").await.unwrap().len(), 1);
        assert_eq!(store.recent_alerts(10).await.unwrap().len(), 1);
        assert_eq!(notifier.subjects().len(), 1);
    }

    #[tokio::test]
    async fn suppression_survives_a_fresh_run_and_expires() {
        let cfg = cfg(&["MSFT"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("MSFT", 94.0, 100.0)]);
        let notifier = FakeNotifier::new(true);

        completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );

        // New price so the snapshot changes, still a daily drop.
        source.set(quote("MSFT", 93.5, 100.0));
        let r = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time() + Duration::minutes(30))
                .await
                .unwrap(),
        );
        assert!(r.alerts.is_empty());
        assert_eq!(r.log.records_added, 1);

        source.set(quote("MSFT", 93.0, 100.0));
        let r = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time() + Duration::minutes(61))
                .await
                .unwrap(),
        );
        assert_eq!(r.alerts.len(), 1);
        assert_eq!(store.recent_alerts(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn hourly_drop_uses_last_stored_price() {
        let cfg = cfg(&["TSLA"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("TSLA", 100.0, 90.0)]);
        let notifier = FakeNotifier::new(true);
        let run = FetchRun::new(&cfg, &store, &clock, &source, &notifier);

        let first = completed(run.execute(open_time()).await.unwrap());
        assert!(first.alerts.is_empty());

        source.set(quote("TSLA", 96.0, 90.0));
        let second = completed(run.execute(open_time() + Duration::minutes(10)).await.unwrap());
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.alerts[0].candidate.kind, AlertKind::HourlyDrop);
        assert_eq!(second.alerts[0].candidate.previous_price, 100.0);
        assert_eq!(store.last_quote("TSLA").await.unwrap().unwrap().price, 96.0);
    }

    #[tokio::test]
    async fn failed_symbols_are_reported_and_the_rest_proceed() {
        let cfg = cfg(&["AAPL", "GONE", "MSFT"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![
            quote("QQQ", 500.0, 500.0),
            quote("AAPL", 200.0, 200.0),
            quote("MSFT", 400.0, 400.0),
        ]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );
        assert_eq!(report.log.symbols_fetched, 2);
        assert_eq!(report.log.records_added, 2);
        assert_eq!(report.log.errors.as_deref(), Some("GONE: no quote returned"));

        let logs = store.recent_fetch_logs(1).await.unwrap();
        assert_eq!(logs[0].errors.as_deref(), Some("GONE: no quote returned"));
    }

    #[tokio::test]
    async fn missing_benchmark_degrades_to_absolute_drop() {
        let cfg = cfg(&["AMD"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("AMD", 94.0, 100.0)]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );
        assert_eq!(report.log.benchmark_change, None);
        assert!(report.log.errors.unwrap().starts_with("benchmark unavailable"));
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].candidate.kind, AlertKind::AbsoluteDrop);
    }

    #[tokio::test]
    async fn undelivered_notification_keeps_alert_unsent_and_suppressed() {
        let cfg = cfg(&["MSFT"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("MSFT", 94.0, 100.0)]);
        let notifier = FakeNotifier::new(false);
        let run = FetchRun::new(&cfg, &store, &clock, &source, &notifier);

        let report = completed(run.execute(open_time()).await.unwrap());
        assert_eq!(report.alerts.len(), 1);
        assert!(!report.alerts[0].email_sent);
        assert!(!store.recent_alerts(1).await.unwrap()[0].email_sent);

        source.set(quote("MSFT", 93.0, 100.0));
        let again = completed(run.execute(open_time() + Duration::minutes(10)).await.unwrap());
        assert!(again.alerts.is_empty());
    }

    #[tokio::test]
    async fn benchmark_is_not_evaluated_as_a_universe_symbol() {
        let cfg = cfg(&["QQQ", "AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 470.0, 500.0), quote("AAPL", 200.0, 200.0)]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );
        assert_eq!(report.log.symbols_fetched, 1);
        assert!(report.alerts.is_empty());
        assert!(store.last_quote("QQQ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_is_fatal_and_writes_no_log() {
        let cfg = cfg(&["AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("AAPL", 200.0, 200.0)]);
        let notifier = FakeNotifier::new(true);
        store.close().await;

        let err = FetchRun::new(&cfg, &store, &clock, &source, &notifier)
            .execute(open_time())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Database(_)));
    }

    #[tokio::test]
    async fn degraded_calendar_is_noted_in_fetch_log() {
        // Wednesday 2030-06-12 11:00 EDT, a year the holiday table does not cover.
        let now = Utc.with_ymd_and_hms(2030, 6, 12, 15, 0, 0).unwrap();
        let cfg = cfg(&["AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("AAPL", 200.0, 200.0)]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(now)
                .await
                .unwrap(),
        );
        assert_eq!(report.log.market_state, MarketState::Regular);
        assert_eq!(report.log.records_added, 1);
        assert!(report.log.errors.as_deref().unwrap().contains("calendar unavailable"));

        let logs = store.recent_fetch_logs(1).await.unwrap();
        assert!(logs[0].errors.as_deref().unwrap().contains("calendar unavailable"));
    }

    #[tokio::test]
    async fn degraded_calendar_note_is_kept_on_a_skipped_run() {
        // Saturday 2030-06-15: the weekday fallback still skips.
        let now = Utc.with_ymd_and_hms(2030, 6, 15, 15, 0, 0).unwrap();
        let cfg = cfg(&["AAPL"]);
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("AAPL", 200.0, 200.0)]);
        let notifier = FakeNotifier::new(true);

        let outcome = FetchRun::new(&cfg, &store, &clock, &source, &notifier)
            .execute(now)
            .await
            .unwrap();
        let RunOutcome::Skipped(log) = outcome else { panic!("expected skip") };
        assert!(log.errors.as_deref().unwrap().contains("calendar unavailable"));
    }

    #[tokio::test]
    async fn thresholds_come_from_config() {
        let mut cfg = cfg(&["AAPL"]);
        cfg.thresholds = Thresholds { daily_drop_pct: 10.0, ..Thresholds::default() };
        let store = store().await;
        let clock = clock();
        let source = FakeSource::with(vec![quote("QQQ", 500.0, 500.0), quote("AAPL", 94.0, 100.0)]);
        let notifier = FakeNotifier::new(true);

        let report = completed(
            FetchRun::new(&cfg, &store, &clock, &source, &notifier)
                .execute(open_time())
                .await
                .unwrap(),
        );
        assert!(report.alerts.is_empty());
    }
}
