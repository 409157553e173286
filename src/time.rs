//! Packed FAT date/time stamps and the clock hook used to stamp new entries.

use crate::config::{DEFAULT_DATE, DEFAULT_TIME};

pub const MIN_YEAR: u16 = 1980;
pub const MAX_YEAR: u16 = 2107;

/// A packed date and time as stored in a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub date: u16,
    pub time: u16,
}

impl Timestamp {
    pub const DEFAULT: Self = Self {
        date: DEFAULT_DATE,
        time: DEFAULT_TIME,
    };

    pub fn year(&self) -> u16 {
        MIN_YEAR + (self.date >> 9)
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(&self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    /// Seconds at two-second resolution.
    pub fn second(&self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

pub fn pack_date(year: u16, month: u8, day: u8) -> u16 {
    (year.wrapping_sub(MIN_YEAR) << 9) | ((month as u16) << 5) | day as u16
}

pub fn pack_time(hour: u8, minute: u8, second: u8) -> u16 {
    ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 >> 1)
}

/// Broken-down calendar time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub fn is_valid(&self) -> bool {
        (MIN_YEAR..=MAX_YEAR).contains(&self.year)
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    pub fn to_timestamp(&self) -> Timestamp {
        Timestamp {
            date: pack_date(self.year, self.month, self.day),
            time: pack_time(self.hour, self.minute, self.second),
        }
    }
}

/// Supplies the stamp for newly created and modified entries.
pub trait TimeSource {
    fn now(&mut self) -> Option<Timestamp>;

    /// Whether [`now`](Self::now) ever yields a stamp. Writes only dirty the
    /// directory entry for a modification time when this holds.
    fn has_time(&self) -> bool {
        true
    }
}

/// No clock: new entries get [`Timestamp::DEFAULT`] and writes leave the stamp alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoClock;

impl TimeSource for NoClock {
    fn now(&mut self) -> Option<Timestamp> {
        None
    }

    fn has_time(&self) -> bool {
        false
    }
}

impl<F: FnMut() -> Timestamp> TimeSource for F {
    fn now(&mut self) -> Option<Timestamp> {
        Some(self())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_fields() {
        let dt = DateTime {
            year: 2009,
            month: 10,
            day: 31,
            hour: 23,
            minute: 59,
            second: 58,
        };
        let stamp = dt.to_timestamp();
        assert_eq!(stamp.date, (29 << 9) | (10 << 5) | 31);
        assert_eq!(stamp.time, (23 << 11) | (59 << 5) | 29);
        assert_eq!(stamp.year(), 2009);
        assert_eq!(stamp.month(), 10);
        assert_eq!(stamp.day(), 31);
        assert_eq!(stamp.hour(), 23);
        assert_eq!(stamp.minute(), 59);
        assert_eq!(stamp.second(), 58);
    }

    #[test]
    fn default_stamp_is_new_year_2000() {
        let stamp = Timestamp::DEFAULT;
        assert_eq!((stamp.year(), stamp.month(), stamp.day()), (2000, 1, 1));
        assert_eq!((stamp.hour(), stamp.minute(), stamp.second()), (1, 0, 0));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let ok = DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert!(ok.is_valid());
        assert!(!DateTime { year: 1979, ..ok }.is_valid());
        assert!(!DateTime { year: 2108, ..ok }.is_valid());
        assert!(!DateTime { month: 13, ..ok }.is_valid());
        assert!(!DateTime { day: 0, ..ok }.is_valid());
        assert!(!DateTime { hour: 24, ..ok }.is_valid());
        assert!(!DateTime { second: 60, ..ok }.is_valid());
    }

    #[test]
    fn closures_act_as_clocks() {
        let stamp = Timestamp { date: 1, time: 2 };
        let mut clock = move || stamp;
        assert!(clock.has_time());
        assert_eq!(clock.now(), Some(stamp));
        assert!(!NoClock.has_time());
        assert_eq!(NoClock.now(), None);
    }
}
