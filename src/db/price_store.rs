use chrono::{DateTime, Utc};

use crate::types::{PriceRecord, Quote};

/// Whether `current` carries new information over the last persisted quote.
///
/// Price is the main signal, but high/low and session-state changes are kept
/// too (a PRE -> REGULAR transition with a stale last price is still news).
pub fn should_persist(current: &Quote, last: Option<&Quote>) -> bool {
    let Some(last) = last else {
        return true;
    };
    current.price != last.price
        || current.day_high != last.day_high
        || current.day_low != last.day_low
        || current.market_state != last.market_state
}

pub fn to_record(current: &Quote, fetched_at: DateTime<Utc>) -> PriceRecord {
    PriceRecord {
        quote: current.clone(),
        fetch_timestamp: fetched_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketState;
    use proptest::prelude::*;

    fn quote(price: f64, high: Option<f64>, low: Option<f64>, state: MarketState) -> Quote {
        Quote {
            symbol: "AAPL".into(),
            price,
            previous_close: Some(100.0),
            day_high: high,
            day_low: low,
            volume: 10,
            market_cap: Some(3.0e12),
            market_state: state,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn first_sample_is_always_persisted() {
        let q = quote(100.0, Some(101.0), Some(99.0), MarketState::Regular);
        assert!(should_persist(&q, None));
    }

    #[test]
    fn identical_tuple_is_skipped_even_if_volume_moved() {
        let last = quote(100.0, Some(101.0), Some(99.0), MarketState::Regular);
        let mut cur = last.clone();
        cur.volume += 5_000;
        cur.market_cap = Some(3.1e12);
        assert!(!should_persist(&cur, Some(&last)));
    }

    #[test]
    fn each_tracked_field_triggers_persist() {
        let last = quote(100.0, Some(101.0), Some(99.0), MarketState::Regular);
        assert!(should_persist(&quote(100.5, Some(101.0), Some(99.0), MarketState::Regular), Some(&last)));
        assert!(should_persist(&quote(100.0, Some(102.0), Some(99.0), MarketState::Regular), Some(&last)));
        assert!(should_persist(&quote(100.0, Some(101.0), Some(98.0), MarketState::Regular), Some(&last)));
        assert!(should_persist(&quote(100.0, Some(101.0), Some(99.0), MarketState::Post), Some(&last)));
        assert!(should_persist(&quote(100.0, None, Some(99.0), MarketState::Regular), Some(&last)));
    }

    #[test]
    fn pre_to_regular_with_stale_price_is_persisted() {
        let last = quote(100.0, None, None, MarketState::Pre);
        let cur = quote(100.0, None, None, MarketState::Regular);
        assert!(should_persist(&cur, Some(&last)));
    }

    #[test]
    fn record_keeps_quote_and_fetch_time() {
        let q = quote(100.0, None, None, MarketState::Regular);
        let at = Utc::now();
        let r = to_record(&q, at);
        assert_eq!(r.quote, q);
        assert_eq!(r.fetch_timestamp, at);
    }

    fn state() -> impl Strategy<Value = MarketState> {
        prop_oneof![
            Just(MarketState::Pre),
            Just(MarketState::Regular),
            Just(MarketState::Post),
            Just(MarketState::Closed),
        ]
    }

    proptest! {
        // Replaying a stream of samples through the decision never stores two
        // consecutive rows with the same (price, high, low, state).
        #[test]
        fn consecutive_persisted_rows_differ(
            samples in proptest::collection::vec(
                (prop_oneof![Just(10.0), Just(10.5), Just(11.0)], state()),
                1..40,
            )
        ) {
            let mut persisted: Vec<Quote> = Vec::new();
            for (price, st) in samples {
                let q = quote(price, Some(11.0), Some(9.0), st);
                if should_persist(&q, persisted.last()) {
                    persisted.push(q);
                }
            }
            for pair in persisted.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(
                    (a.price, a.day_high, a.day_low, a.market_state)
                        != (b.price, b.day_high, b.day_low, b.market_state)
                );
            }
        }
    }
}
