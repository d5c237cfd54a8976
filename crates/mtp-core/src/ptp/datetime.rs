//! PTP date-time strings: ASCII `YYYYMMDDThhmmss.s` with optional fractional
//! seconds and timezone offset (spec §4.2).

use crate::error::MtpError;

/// A decoded PTP date-time. Kept as plain fields (no external date crate):
/// this crate never performs date arithmetic, only round-trips what the
/// device sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub tz_offset_minutes: Option<i16>,
}

impl PtpDateTime {
    /// Parses `YYYYMMDDThhmmss[.s][(+|-)hhmm]`. Tolerates a missing
    /// fractional-seconds part and a missing timezone suffix.
    pub fn parse(s: &str) -> Result<Self, MtpError> {
        let malformed = |reason: &str| MtpError::Malformed { offset: 0, reason: format!("bad PTP datetime '{s}': {reason}") };

        if s.len() < 15 {
            return Err(malformed("too short"));
        }
        let bytes = s.as_bytes();
        if bytes[8] != b'T' {
            return Err(malformed("missing 'T' separator"));
        }
        let digit_field = |range: std::ops::Range<usize>| -> Result<u32, MtpError> {
            s.get(range.clone())
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(|| malformed("non-numeric date field"))
        };

        let year = digit_field(0..4)?;
        let month = digit_field(4..6)?;
        let day = digit_field(6..8)?;
        let hour = digit_field(9..11)?;
        let minute = digit_field(11..13)?;
        let second = digit_field(13..15)?;

        let rest = &s[15..];
        let tz_offset_minutes = if let Some(idx) = rest.find(['+', '-']) {
            let tz = &rest[idx..];
            if tz.len() < 5 {
                None
            } else {
                let sign = if tz.as_bytes()[0] == b'-' { -1i16 } else { 1i16 };
                let hh: i16 = tz[1..3].parse().unwrap_or(0);
                let mm: i16 = tz[3..5].parse().unwrap_or(0);
                Some(sign * (hh * 60 + mm))
            }
        } else {
            None
        };

        Ok(Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
            tz_offset_minutes,
        })
    }

    /// Formats back to `YYYYMMDDThhmmss`, with a timezone suffix if present.
    /// Fractional seconds are never reconstructed (not retained on parse).
    pub fn format(&self) -> String {
        let mut s = format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        if let Some(offset) = self.tz_offset_minutes {
            let sign = if offset < 0 { '-' } else { '+' };
            let abs = offset.unsigned_abs();
            s.push_str(&format!("{sign}{:02}{:02}", abs / 60, abs % 60));
        }
        s
    }
}
