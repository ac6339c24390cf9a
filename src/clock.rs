use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::sync::Mutex;

/// Source of "now" for record timestamps, id suffixes and schedule checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used for active-medication and log filtering.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and benchmarks.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        FixedClock {
            instant: Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.instant.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Local wall-clock time of `instant` under a fixed UTC offset. Dose times
/// carry no zone, so this is the only place an offset enters the picture.
pub fn wall_clock(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveTime {
    instant.with_timezone(&offset).time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::hours(20));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
    }

    #[test]
    fn wall_clock_applies_offset() {
        let instant = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let local = wall_clock(instant, seoul);
        assert_eq!((local.hour(), local.minute()), (8, 30));
    }
}
