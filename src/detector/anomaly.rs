use crate::config::{Thresholds, BROAD_SELLOFF_PCT};
use crate::types::{pct_change, AlertCandidate, AlertKind, Quote};

/// Classify one quote against its previous close, the benchmark and the last stored sample.
///
/// Pure: all state arrives through the arguments. Candidates come back in
/// RELATIVE_DROP, ABSOLUTE_DROP, HOURLY_DROP order, already filtered by the
/// minimum-price and minimum-dollar-move rules.
pub fn detect(
    quote: &Quote,
    benchmark: Option<&Quote>,
    last_stored: Option<&Quote>,
    t: &Thresholds,
) -> Vec<AlertCandidate> {
    let mut out = Vec::with_capacity(2);

    let reference_close = quote.reference_close();
    let daily_change = quote.daily_change_pct();
    let benchmark_change = benchmark.and_then(Quote::daily_change_pct);
    let relative_change = match (daily_change, benchmark_change) {
        (Some(d), Some(b)) => Some(d - b),
        _ => None,
    };

    // Daily class: at most one of RELATIVE / ABSOLUTE, split on the benchmark move.
    // RELATIVE only applies while the market itself is selling off; otherwise the
    // stock's own daily drop is what matters.
    if let (Some(daily), Some(prev_close)) = (daily_change, reference_close) {
        let market_selling_off = benchmark_change.is_some_and(|b| b <= BROAD_SELLOFF_PCT);
        let relative_hit =
            market_selling_off && relative_change.is_some_and(|r| r <= -t.relative_drop_pct);

        let kind = if relative_hit {
            Some(AlertKind::RelativeDrop)
        } else if !market_selling_off && daily <= -t.daily_drop_pct {
            Some(AlertKind::AbsoluteDrop)
        } else {
            None
        };

        if let Some(kind) = kind {
            out.push(AlertCandidate {
                symbol: quote.symbol.clone(),
                kind,
                price_change_percent: daily,
                benchmark_change_percent: benchmark_change,
                relative_change_percent: relative_change,
                current_price: quote.price,
                previous_price: prev_close,
            });
        }
    }

    // Hourly class, independent of the daily outcome.
    if let Some(last) = last_stored {
        if let Some(change) = pct_change(quote.price, last.price) {
            if change <= -t.hourly_drop_pct {
                out.push(AlertCandidate {
                    symbol: quote.symbol.clone(),
                    kind: AlertKind::HourlyDrop,
                    price_change_percent: change,
                    benchmark_change_percent: benchmark_change,
                    relative_change_percent: None,
                    current_price: quote.price,
                    previous_price: last.price,
                });
            }
        }
    }

    out.retain(|c| passes_noise_filters(c, t));
    out
}

/// Low-priced names and tiny dollar moves produce noisy percentages.
fn passes_noise_filters(c: &AlertCandidate, t: &Thresholds) -> bool {
    c.current_price >= t.min_price_for_alert
        && (c.current_price - c.previous_price).abs() >= t.min_abs_move_dollar
}
