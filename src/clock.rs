// =============================================================================
// Clock / Timezone — C1
// =============================================================================
//
// All session math goes through this module. Never compare UTC hours
// directly against session boundaries — always decompose through the
// America/New_York zone, which correctly tracks the EST/EDT transition.
// =============================================================================

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::config::SessionConfig;

/// Wall-clock components of an instant, decomposed in `America/New_York`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtComponents {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl EtComponents {
    /// Minutes since ET midnight, e.g. 09:30 => 570.
    pub fn minutes_since_midnight(&self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minute)
    }
}

/// Supplies "now" (overridable for tests/historical replay via
/// `dev.overrideNow`) and ET decomposition.
#[derive(Debug, Clone)]
pub struct Clock {
    override_now: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn live() -> Self {
        Self { override_now: None }
    }

    pub fn fixed(now: DateTime<Utc>) -> Self {
        Self { override_now: Some(now) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.override_now.unwrap_or_else(Utc::now)
    }

    /// Decompose a UTC instant into ET wall-clock components, honoring DST.
    pub fn et_components(&self, instant: DateTime<Utc>) -> EtComponents {
        let et: DateTime<Tz> = instant.with_timezone(&New_York);
        EtComponents {
            year: et.year(),
            month: et.month(),
            day: et.day(),
            hour: et.hour(),
            minute: et.minute(),
            second: et.second(),
        }
    }

    pub fn et_now(&self) -> EtComponents {
        self.et_components(self.now())
    }

    /// Epoch-ms of `instant`, decomposed and re-aligned to the start of its
    /// enclosing 5-minute period in ET.
    pub fn align_5min_start_ms(&self, instant: DateTime<Utc>) -> i64 {
        let et: DateTime<Tz> = instant.with_timezone(&New_York);
        let aligned_minute = (et.minute() / 5) * 5;
        let aligned = New_York
            .with_ymd_and_hms(et.year(), et.month(), et.day(), et.hour(), aligned_minute, 0)
            .single()
            .expect("aligned ET wall-clock time is unambiguous");
        aligned.with_timezone(&Utc).timestamp_millis()
    }

    /// `isWithinSession` — true when ET-minutes-since-midnight falls in
    /// `[start - 2min, end)`. The 2-minute grace captures bars that publish
    /// just before the configured session start.
    pub fn is_within_session(&self, instant: DateTime<Utc>, session: &SessionConfig) -> bool {
        let minutes = self.et_components(instant).minutes_since_midnight();
        let start = session.start_minutes() - 2;
        let end = session.end_minutes();
        minutes >= start && minutes < end
    }

    /// Minutes since ET midnight for an arbitrary epoch-ms timestamp.
    pub fn minutes_since_midnight_ms(&self, ts_ms: i64) -> i64 {
        let instant = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now);
        self.et_components(instant).minutes_since_midnight()
    }

    /// `align_5min_start_ms` for an arbitrary epoch-ms timestamp.
    pub fn align_5min_start_ms_of(&self, ts_ms: i64) -> i64 {
        let instant = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now);
        self.align_5min_start_ms(instant)
    }

    /// `is_within_session` for an arbitrary epoch-ms timestamp.
    pub fn is_within_session_window(&self, ts_ms: i64, session: &SessionConfig) -> bool {
        let instant = Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now);
        self.is_within_session(instant, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(start: &str, end: &str) -> SessionConfig {
        SessionConfig { start: start.to_string(), end: end.to_string() }
    }

    #[test]
    fn decomposes_to_et_honoring_dst() {
        // 2024-07-01 13:30:00 UTC = 09:30:00 ET (EDT, UTC-4) in summer.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 30, 0).unwrap();
        let clock = Clock::fixed(instant);
        let et = clock.et_now();
        assert_eq!((et.hour, et.minute), (9, 30));

        // 2024-01-02 14:30:00 UTC = 09:30:00 ET (EST, UTC-5) in winter.
        let instant = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        let clock = Clock::fixed(instant);
        let et = clock.et_now();
        assert_eq!((et.hour, et.minute), (9, 30));
    }

    #[test]
    fn session_grace_window() {
        let cfg = session("09:30", "16:00");
        // 09:28 ET is within the 2-minute grace before start.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 28, 0).unwrap();
        let clock = Clock::fixed(instant);
        assert!(clock.is_within_session(instant, &cfg));

        // 09:27 ET is outside the grace window.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 27, 0).unwrap();
        let clock = Clock::fixed(instant);
        assert!(!clock.is_within_session(instant, &cfg));

        // 16:00 ET is the exclusive end boundary.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 20, 0, 0).unwrap();
        let clock = Clock::fixed(instant);
        assert!(!clock.is_within_session(instant, &cfg));
    }

    #[test]
    fn aligns_to_5min_boundary() {
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 33, 12).unwrap();
        let clock = Clock::fixed(instant);
        let aligned = clock.align_5min_start_ms(instant);
        let expected = Utc.with_ymd_and_hms(2024, 7, 1, 13, 30, 0).unwrap().timestamp_millis();
        assert_eq!(aligned, expected);
    }
}
