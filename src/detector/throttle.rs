use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{AlertCandidate, AlertKind};

/// Per-(symbol, kind) suppression of repeat alerts.
///
/// The map is rehydrated from the alert history at the start of every run
/// (see `Store::last_alert_times`), so suppression survives restarts.
#[derive(Debug, Clone)]
pub struct AlertThrottle {
    window: Duration,
    last_emitted: HashMap<(String, AlertKind), DateTime<Utc>>,
}

impl AlertThrottle {
    pub fn new(min_minutes_between_same_alert: u32) -> Self {
        Self {
            window: Duration::minutes(i64::from(min_minutes_between_same_alert)),
            last_emitted: HashMap::new(),
        }
    }

    /// Seeds last-emission times. Keeps the latest timestamp per key.
    pub fn hydrate<I>(&mut self, history: I)
    where
        I: IntoIterator<Item = (String, AlertKind, DateTime<Utc>)>,
    {
        for (symbol, kind, at) in history {
            self.last_emitted
                .entry((symbol, kind))
                .and_modify(|t| {
                    if at > *t {
                        *t = at;
                    }
                })
                .or_insert(at);
        }
    }

    /// Admits the candidate iff no alert of the same kind was emitted for the
    /// symbol within the window. Admission records `now` immediately, whatever
    /// the later notification outcome.
    pub fn admit(&mut self, candidate: &AlertCandidate, now: DateTime<Utc>) -> bool {
        let key = (candidate.symbol.clone(), candidate.kind);
        if let Some(&last) = self.last_emitted.get(&key) {
            if now - last < self.window {
                debug!(
                    symbol = %candidate.symbol,
                    kind = %candidate.kind,
                    last = %last,
                    "suppressed repeat alert"
                );
                return false;
            }
        }
        self.last_emitted.insert(key, now);
        true
    }

    pub fn last_emitted(&self, symbol: &str, kind: AlertKind) -> Option<DateTime<Utc>> {
        self.last_emitted.get(&(symbol.to_string(), kind)).copied()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
