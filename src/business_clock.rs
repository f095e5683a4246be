//! Business-hours clock.
//!
//! Pure conversion of a wall-clock interval into counted minutes under a
//! weekly business-hours template with weekend and holiday exclusion.
//! Stateless; current time is always passed in by the caller.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Open/close window for one weekday. A missing window means the day is
/// fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

/// Weekly business-hours template with exclusion toggles.
///
/// All times are interpreted in UTC. `week` is indexed Monday..Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    /// When false the calendar degrades to raw wall-clock minutes.
    pub use_business_hours: bool,

    /// Saturdays and Sundays contribute zero minutes.
    pub exclude_weekends: bool,

    /// Dates listed in `holidays` contribute zero minutes.
    pub exclude_holidays: bool,

    /// Holiday date set, consulted only when `exclude_holidays` is set.
    pub holidays: BTreeSet<NaiveDate>,

    /// Per-weekday windows, Monday first. `None` means closed that day.
    pub week: [Option<DayWindow>; 7],
}

impl Default for BusinessCalendar {
    /// A 24/7 calendar: business hours disabled, nothing excluded.
    fn default() -> Self {
        Self {
            use_business_hours: false,
            exclude_weekends: false,
            exclude_holidays: false,
            holidays: BTreeSet::new(),
            week: [None, None, None, None, None, None, None],
        }
    }
}

impl BusinessCalendar {
    /// Monday-to-Friday template with the same window each day, weekends
    /// excluded.
    pub fn weekdays(open: NaiveTime, close: NaiveTime) -> Self {
        let window = Some(DayWindow { open, close });
        Self {
            use_business_hours: true,
            exclude_weekends: true,
            exclude_holidays: false,
            holidays: BTreeSet::new(),
            week: [window, window, window, window, window, None, None],
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.exclude_holidays = true;
        self.holidays.extend(holidays);
        self
    }

    fn window_for(&self, weekday: Weekday) -> Option<DayWindow> {
        self.week[weekday.num_days_from_monday() as usize]
    }

    fn is_weekend(weekday: Weekday) -> bool {
        matches!(weekday, Weekday::Sat | Weekday::Sun)
    }

    fn counts(&self, date: NaiveDate) -> bool {
        if self.exclude_weekends && Self::is_weekend(date.weekday()) {
            return false;
        }
        if self.exclude_holidays && self.holidays.contains(&date) {
            return false;
        }
        true
    }
}

/// Counted minutes between `start` and `end` under `calendar`.
///
/// Walks day by day, intersecting each open day's window with the portion
/// of the interval falling on that day, so multi-day spans never double
/// count across midnight. Returns 0 when `end <= start`.
pub fn elapsed_business_minutes(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    calendar: &BusinessCalendar,
) -> i64 {
    if end <= start {
        return 0;
    }
    if !calendar.use_business_hours {
        return (end - start).num_minutes();
    }

    let mut total = 0i64;
    let mut date = start.date_naive();
    let last = end.date_naive();

    while date <= last {
        if calendar.counts(date) {
            if let Some(window) = calendar.window_for(date.weekday()) {
                if window.close > window.open {
                    let day_open = date.and_time(window.open).and_utc();
                    let day_close = date.and_time(window.close).and_utc();
                    let seg_start = start.max(day_open);
                    let seg_end = end.min(day_close);
                    if seg_end > seg_start {
                        total += (seg_end - seg_start).num_minutes();
                    }
                }
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    total
}
