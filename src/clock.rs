use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Single configurable clock source. All "today" and "now" comparisons in
/// the scheduler go through this trait so tests can fix the time instead of
/// relying on thread-local state (spec.md 9, "Clock").
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The service's configured time zone, used to compute local-day
    /// boundaries for duplicate suppression.
    fn timezone(&self) -> Tz;

    /// Wall-clock `HH:MM:SS` for `now()`, truncated to the minute grid
    /// (seconds forced to `:00`), in the configured time zone.
    fn current_minute(&self) -> NaiveTime {
        self.minute_at(self.now())
    }

    /// Wall-clock `HH:MM:SS` for an arbitrary instant, truncated to the
    /// minute grid, in the configured time zone. Used by the tick loop to
    /// project a tick's `target = T + interval` onto the same local-time
    /// grid `due_alarms` compares stored alarm minutes against (spec.md 4.1:
    /// "computed in the service's configured time zone").
    fn minute_at(&self, instant: DateTime<Utc>) -> NaiveTime {
        let local = instant.with_timezone(&self.timezone());
        NaiveTime::from_hms_opt(local.time().hour(), local.time().minute(), 0)
            .expect("hour/minute from a valid time are always valid")
    }

    /// Start of the local day containing `now()`, as UTC.
    fn start_of_today_local(&self) -> DateTime<Utc> {
        let local = self.now().with_timezone(&self.timezone());
        let midnight = local.date_naive().and_hms_opt(0, 0, 0).unwrap();
        self.timezone()
            .from_local_datetime(&midnight)
            .single()
            .unwrap_or_else(|| self.timezone().from_utc_datetime(&midnight))
            .with_timezone(&Utc)
    }
}

use chrono::Timelike;

/// Real wall-clock time, in a configured IANA time zone.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Fixed-instant test double. `now()` never advances unless replaced.
#[cfg(any(test, feature = "test-util"))]
pub struct FixedClock {
    pub instant: std::sync::RwLock<DateTime<Utc>>,
    pub tz: Tz,
}

#[cfg(any(test, feature = "test-util"))]
impl FixedClock {
    pub fn new(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            instant: std::sync::RwLock::new(instant),
            tz,
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.write().unwrap() = instant;
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.read().unwrap()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn current_minute_truncates_seconds() {
        let clock = FixedClock::new(
            Utc.with_ymd_and_hms(2026, 7, 26, 7, 30, 45).unwrap(),
            chrono_tz::UTC,
        );
        assert_eq!(clock.current_minute(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    }

    #[test]
    fn start_of_today_local_is_midnight() {
        let clock = FixedClock::new(
            Utc.with_ymd_and_hms(2026, 7, 26, 23, 59, 59).unwrap(),
            chrono_tz::Asia::Seoul,
        );
        let start = clock.start_of_today_local();
        let local = start.with_timezone(&chrono_tz::Asia::Seoul);
        assert_eq!(local.time(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }
}
