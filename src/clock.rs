//! Wall-clock time as the RTC keeps it, and the timezone offset applied to
//! network time before it is written there.

use core::fmt;

use crate::error::ConfigError;

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_HOUR: i64 = 3_600;

/// Broken-down local time. No timezone information is carried: the RTC is
/// set to local time and the display shows its fields as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub year: u16,  // full year, e.g. 2024
    pub month: u8,  // 1-12
    pub day: u8,    // 1-31
    pub hour: u8,   // 0-23
    pub minute: u8, // 0-59
    pub second: u8, // 0-59
}

impl WallClock {
    /// Value written to an RTC found with its oscillator stopped.
    pub const FACTORY_DEFAULT: WallClock = WallClock {
        year: 2024,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Convert seconds since 1970-01-01 00:00:00 (no leap seconds) into
    /// calendar fields. Negative inputs count backwards from the epoch.
    pub fn from_unix(secs: i64) -> WallClock {
        let days = secs.div_euclid(SECS_PER_DAY);
        let rem = secs.rem_euclid(SECS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        WallClock {
            year: year.clamp(0, u16::MAX as i64) as u16,
            month,
            day,
            hour: (rem / SECS_PER_HOUR) as u8,
            minute: ((rem % SECS_PER_HOUR) / 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    /// Local wall time for a UTC timestamp shifted by `offset`.
    pub fn from_unix_with_offset(utc_secs: u64, offset: TimezoneOffset) -> WallClock {
        let utc = i64::try_from(utc_secs).unwrap_or(i64::MAX - SECS_PER_DAY);
        Self::from_unix(utc + offset.seconds())
    }

    pub fn to_unix(&self) -> i64 {
        days_from_civil(self.year as i64, self.month, self.day) * SECS_PER_DAY
            + self.hour as i64 * SECS_PER_HOUR
            + self.minute as i64 * 60
            + self.second as i64
    }

    /// Basic sanity check on fields decoded from hardware.
    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    /// `HH:MM:SS`, as served by `/getTime`.
    pub fn hms(&self) -> heapless::String<8> {
        let mut out = heapless::String::new();
        // Wrapped like the display digits so each field stays two wide.
        let _ = fmt::write(
            &mut out,
            format_args!(
                "{:02}:{:02}:{:02}",
                self.hour % 24,
                self.minute % 60,
                self.second % 60
            ),
        );
        out
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Whole-hour offset from UTC, always within [-12, +14].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct TimezoneOffset(i8);

impl TimezoneOffset {
    pub const MIN: i32 = -12;
    pub const MAX: i32 = 14;
    pub const UTC: TimezoneOffset = TimezoneOffset(0);

    pub fn new(hours: i32) -> Result<Self, ConfigError> {
        if (Self::MIN..=Self::MAX).contains(&hours) {
            Ok(TimezoneOffset(hours as i8))
        } else {
            Err(ConfigError::InvalidOffset(hours))
        }
    }

    pub fn hours(self) -> i8 {
        self.0
    }

    pub fn seconds(self) -> i64 {
        self.0 as i64 * SECS_PER_HOUR
    }

    /// Every valid offset, west to east.
    pub fn all() -> impl Iterator<Item = TimezoneOffset> {
        (Self::MIN..=Self::MAX).map(|h| TimezoneOffset(h as i8))
    }
}

impl fmt::Display for TimezoneOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UTC{:+03}:00", self.0)
    }
}

fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

// Days since 1970-01-01 for a proleptic Gregorian date (era-based, valid for
// any year).
fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let m = month as i64;
    let y = if m <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12; // March = 0
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468 // 719468 = days from 0000-03-01 to 1970-01-01
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_first_of_january_1970() {
        let wc = WallClock::from_unix(0);
        assert_eq!(
            wc,
            WallClock { year: 1970, month: 1, day: 1, hour: 0, minute: 0, second: 0 }
        );
    }

    #[test]
    fn known_timestamps_convert() {
        // 2024-02-29 12:34:56 UTC
        let wc = WallClock::from_unix(1_709_210_096);
        assert_eq!(
            wc,
            WallClock { year: 2024, month: 2, day: 29, hour: 12, minute: 34, second: 56 }
        );
        assert_eq!(wc.to_unix(), 1_709_210_096);

        // 2000-03-01 00:00:00 UTC, just past a 400-year leap day
        let wc = WallClock::from_unix(951_868_800);
        assert_eq!((wc.year, wc.month, wc.day), (2000, 3, 1));
    }

    #[test]
    fn offset_shifts_across_midnight() {
        // 2023-12-31 23:30:00 UTC
        let utc = 1_704_065_400;
        let east = WallClock::from_unix_with_offset(utc, TimezoneOffset::new(2).unwrap());
        assert_eq!(
            east,
            WallClock { year: 2024, month: 1, day: 1, hour: 1, minute: 30, second: 0 }
        );
        let west = WallClock::from_unix_with_offset(utc, TimezoneOffset::new(-12).unwrap());
        assert_eq!((west.day, west.hour), (31, 11));
    }

    #[test]
    fn offset_range_is_enforced() {
        assert!(TimezoneOffset::new(-12).is_ok());
        assert!(TimezoneOffset::new(14).is_ok());
        assert!(matches!(TimezoneOffset::new(15), Err(ConfigError::InvalidOffset(15))));
        assert!(matches!(TimezoneOffset::new(-13), Err(ConfigError::InvalidOffset(-13))));
        assert_eq!(TimezoneOffset::all().count(), 27);
    }

    #[test]
    fn hms_is_zero_padded() {
        let wc = WallClock { year: 2024, month: 5, day: 6, hour: 7, minute: 8, second: 9 };
        assert_eq!(wc.hms().as_str(), "07:08:09");
        assert_eq!(TimezoneOffset::new(-5).unwrap().to_string(), "UTC-05:00");
        assert_eq!(TimezoneOffset::new(2).unwrap().to_string(), "UTC+02:00");
    }

    #[test]
    fn hms_wraps_out_of_range_fields() {
        let wc = WallClock { year: 2024, month: 1, day: 1, hour: 123, minute: 75, second: 99 };
        let hms = wc.hms();
        assert_eq!(hms.as_str(), "03:15:39");
        assert_eq!(hms.len(), 8);
    }

    #[test]
    fn validity_checks_month_lengths() {
        let mut wc = WallClock::FACTORY_DEFAULT;
        assert!(wc.is_valid());
        wc.month = 2;
        wc.day = 29;
        assert!(wc.is_valid());
        wc.year = 2023;
        assert!(!wc.is_valid());
        wc.day = 1;
        wc.hour = 24;
        assert!(!wc.is_valid());
    }
}
