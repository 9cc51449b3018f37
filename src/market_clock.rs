use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc, Weekday};
use tracing::warn;

use crate::error::CalendarError;
use crate::types::{ClockReading, MarketState};

/// Session boundaries in minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    pub pre_open: u32,
    pub open: u32,
    pub close: u32,
    pub post_close: u32,
}

impl SessionHours {
    pub const REGULAR: SessionHours = SessionHours {
        pre_open: 4 * 60,
        open: 9 * 60 + 30,
        close: 16 * 60,
        post_close: 20 * 60,
    };

    /// Early close at 13:00, post-market until 17:00.
    pub const EARLY_CLOSE: SessionHours = SessionHours {
        pre_open: 4 * 60,
        open: 9 * 60 + 30,
        close: 13 * 60,
        post_close: 17 * 60,
    };

    pub fn phase(&self, minute_of_day: u32) -> MarketState {
        if minute_of_day >= self.pre_open && minute_of_day < self.open {
            MarketState::Pre
        } else if minute_of_day >= self.open && minute_of_day < self.close {
            MarketState::Regular
        } else if minute_of_day >= self.close && minute_of_day < self.post_close {
            MarketState::Post
        } else {
            MarketState::Closed
        }
    }
}

/// Exchange trading-calendar collaborator.
pub trait TradingCalendar: Send + Sync {
    /// UTC offset of the exchange at the given instant.
    fn local_offset(&self, at: DateTime<Utc>) -> Result<FixedOffset, CalendarError>;

    /// Full-day closure on an otherwise regular weekday.
    fn is_holiday(&self, date: NaiveDate) -> Result<bool, CalendarError>;

    fn session_hours(&self, date: NaiveDate) -> Result<SessionHours, CalendarError>;
}

// ---------------------------------------------------------------------------
// US equities (NYSE / Nasdaq) calendar
// ---------------------------------------------------------------------------

const COVERED_YEARS: std::ops::RangeInclusive<i32> = 2025..=2027;

const FULL_HOLIDAYS: &[(i32, u32, u32)] = &[
    (2025, 1, 1),
    (2025, 1, 9),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
    (2027, 1, 1),
    (2027, 1, 18),
    (2027, 2, 15),
    (2027, 3, 26),
    (2027, 5, 31),
    (2027, 6, 18),
    (2027, 7, 5),
    (2027, 9, 6),
    (2027, 11, 25),
    (2027, 12, 24),
];

const EARLY_CLOSES: &[(i32, u32, u32)] = &[
    (2025, 7, 3),
    (2025, 11, 28),
    (2025, 12, 24),
    (2026, 11, 27),
    (2026, 12, 24),
    (2027, 11, 26),
];

fn listed(table: &[(i32, u32, u32)], date: NaiveDate) -> bool {
    table
        .iter()
        .any(|&(y, m, d)| date.year() == y && date.month() == m && date.day() == d)
}

#[derive(Debug, Default, Clone)]
pub struct UsEquityCalendar;

impl UsEquityCalendar {
    fn ensure_covered(&self, year: i32) -> Result<(), CalendarError> {
        if COVERED_YEARS.contains(&year) {
            Ok(())
        } else {
            Err(CalendarError::Unavailable(format!(
                "no holiday data for {year}"
            )))
        }
    }
}

impl TradingCalendar for UsEquityCalendar {
    fn local_offset(&self, at: DateTime<Utc>) -> Result<FixedOffset, CalendarError> {
        Ok(us_eastern_offset(at))
    }

    fn is_holiday(&self, date: NaiveDate) -> Result<bool, CalendarError> {
        self.ensure_covered(date.year())?;
        Ok(listed(FULL_HOLIDAYS, date))
    }

    fn session_hours(&self, date: NaiveDate) -> Result<SessionHours, CalendarError> {
        self.ensure_covered(date.year())?;
        if listed(EARLY_CLOSES, date) {
            Ok(SessionHours::EARLY_CLOSE)
        } else {
            Ok(SessionHours::REGULAR)
        }
    }
}

/// US Eastern offset: EDT (UTC-4) from the second Sunday of March 02:00 local
/// until the first Sunday of November 02:00 local, EST (UTC-5) otherwise.
pub fn us_eastern_offset(at: DateTime<Utc>) -> FixedOffset {
    let year = at.year();
    let dst_start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(7, 0, 0));
    let dst_end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(6, 0, 0));

    let in_dst = match (dst_start, dst_end) {
        (Some(start), Some(end)) => {
            let naive = at.naive_utc();
            naive >= start && naive < end
        }
        _ => false,
    };
    let west_secs = if in_dst { 4 * 3600 } else { 5 * 3600 };
    FixedOffset::west_opt(west_secs).unwrap_or_else(|| Utc.fix())
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

// ---------------------------------------------------------------------------
// MarketClock
// ---------------------------------------------------------------------------

pub struct MarketClock {
    calendar: Box<dyn TradingCalendar>,
    include_extended_hours: bool,
}

impl MarketClock {
    pub fn new(calendar: Box<dyn TradingCalendar>, include_extended_hours: bool) -> Self {
        Self { calendar, include_extended_hours }
    }

    /// Never fails: if the calendar can't answer, falls back to a weekday +
    /// fixed-hours reading marked `degraded`.
    pub fn read(&self, now: DateTime<Utc>) -> ClockReading {
        match self.read_calendar(now) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("{e}; using weekday/fixed-hours fallback");
                self.fallback(now)
            }
        }
    }

    fn read_calendar(&self, now: DateTime<Utc>) -> Result<ClockReading, CalendarError> {
        let offset = self.calendar.local_offset(now)?;
        let local = now.with_timezone(&offset);
        let date = local.date_naive();

        let is_trading_day = is_weekday(date) && !self.calendar.is_holiday(date)?;
        let market_state = if is_trading_day {
            let hours = self.calendar.session_hours(date)?;
            hours.phase(local.hour() * 60 + local.minute())
        } else {
            MarketState::Closed
        };

        Ok(self.reading(is_trading_day, market_state, false))
    }

    fn fallback(&self, now: DateTime<Utc>) -> ClockReading {
        let local = now.with_timezone(&us_eastern_offset(now));
        let is_trading_day = is_weekday(local.date_naive());
        let market_state = if is_trading_day {
            SessionHours::REGULAR.phase(local.hour() * 60 + local.minute())
        } else {
            MarketState::Closed
        };
        self.reading(is_trading_day, market_state, true)
    }

    fn reading(&self, is_trading_day: bool, market_state: MarketState, degraded: bool) -> ClockReading {
        let is_within_session = match market_state {
            MarketState::Regular => true,
            MarketState::Pre | MarketState::Post => self.include_extended_hours,
            MarketState::Closed => false,
        };
        ClockReading { is_trading_day, is_within_session, market_state, degraded }
    }
}
