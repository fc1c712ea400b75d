//! MS-DOS date/time fields, as used by local and central directory headers.

use chrono::{Datelike, TimeZone, Timelike};
use winnow::{
    binary::{le_u16, le_u32},
    PResult, Parser, Partial,
};

/// A date and time, encoded the way MS-DOS (and therefore the zip format)
/// encodes them: two packed `u16` bitfields with a 2-second resolution and a
/// 1980 epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsdosTimestamp {
    /// Packed time: bits 0-4 seconds/2, bits 5-10 minutes, bits 11-15 hours.
    pub time: u16,
    /// Packed date: bits 0-4 day, bits 5-8 month, bits 9-15 year-1980.
    pub date: u16,
}

impl MsdosTimestamp {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        (le_u16, le_u16)
            .map(|(time, date)| Self { time, date })
            .parse_next(i)
    }

    pub fn to_u32(self) -> u32 {
        ((self.date as u32) << 16) | self.time as u32
    }

    pub fn from_u32(v: u32) -> Self {
        Self { time: (v & 0xFFFF) as u16, date: (v >> 16) as u16 }
    }

    /// Convert to a UTC `DateTime`, assuming local time is UTC (the zip
    /// format carries no timezone information, matching the approach taken
    /// for mtime display across zip implementations generally).
    ///
    /// Returns `None` if the packed fields don't correspond to any valid
    /// date/time (ambiguous/invalid packed values are just displayed blank
    /// rather than treated as fatal parse errors).
    pub fn to_datetime(self) -> Option<chrono::DateTime<chrono::Utc>> {
        let seconds = (self.time & 0b11111) as u32 * 2;
        let minutes = (self.time >> 5) & 0b111111;
        let hours = (self.time >> 11) & 0b11111;

        let days = self.date & 0b11111;
        let months = (self.date >> 5) & 0b1111;
        let years = (self.date >> 9) + 1980;

        chrono::Utc
            .with_ymd_and_hms(
                years as i32,
                months as u32,
                days as u32,
                hours,
                minutes,
                seconds,
            )
            .single()
    }

    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        let year = (dt.year() - 1980).clamp(0, 127) as u16;
        let month = dt.month() as u16;
        let day = dt.day() as u16;
        let date = (year << 9) | (month << 5) | day;

        let hour = dt.hour() as u16;
        let minute = dt.minute() as u16;
        let second = (dt.second() / 2) as u16;
        let time = (hour << 11) | (minute << 5) | second;

        Self { time, date }
    }
}

/// NTFS-style 64-bit timestamp: 100ns intervals since 1601-01-01.
///
/// Not part of the internal extra-field set this crate parses specially
/// (the NTFS extra field, id `0x000a`, is treated as opaque and passed
/// through verbatim); kept as a standalone conversion helper for callers
/// that want to interpret it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtfsTimestamp {
    pub intervals: u64,
}

impl NtfsTimestamp {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        (le_u32, le_u32)
            .map(|(lo, hi)| Self { intervals: ((hi as u64) << 32) | lo as u64 })
            .parse_next(i)
    }

    pub fn to_datetime(self) -> Option<chrono::DateTime<chrono::Utc>> {
        const NTFS_EPOCH_DIFF_100NS: i64 = 116_444_736_000_000_000;
        let unix_100ns = self.intervals as i64 - NTFS_EPOCH_DIFF_100NS;
        let secs = unix_100ns.div_euclid(10_000_000);
        let nanos = (unix_100ns.rem_euclid(10_000_000) * 100) as u32;
        chrono::Utc.timestamp_opt(secs, nanos).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msdos_roundtrip() {
        let dt = chrono::Utc.with_ymd_and_hms(2021, 11, 3, 14, 25, 10).unwrap();
        let ts = MsdosTimestamp::from_datetime(dt);
        let back = ts.to_datetime().unwrap();
        assert_eq!(back.date_naive(), dt.date_naive());
        assert_eq!(back.hour(), dt.hour());
        assert_eq!(back.minute(), dt.minute());
    }

    #[test]
    fn msdos_epoch() {
        let ts = MsdosTimestamp { time: 0, date: 0b0_0000_0001_00001 };
        assert_eq!(ts.to_datetime().unwrap().year(), 1980);
    }
}
