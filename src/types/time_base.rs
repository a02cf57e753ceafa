//! Rational stream time base

use serde::{Deserialize, Serialize};

/// Rational time base of a stream, in seconds per tick (`num / den`).
///
/// Containers usually express this as `1/90000` or `1001/30000`. A time base
/// with a zero numerator or denominator cannot convert ticks and is treated
/// as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// 90 kHz, the MPEG transport stream clock.
    pub const MPEG_90K: TimeBase = TimeBase { num: 1, den: 90_000 };

    /// One tick per millisecond.
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1_000 };

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whether ticks in this time base can be converted to seconds.
    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Convert a tick count into seconds.
    pub fn to_seconds(self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds into the nearest tick count.
    pub fn to_ticks(self, seconds: f64) -> i64 {
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }

    /// Seconds represented by a single tick.
    pub fn seconds_per_tick(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn converts_ticks_to_seconds() {
        assert_relative_eq!(TimeBase::MPEG_90K.to_seconds(90_000), 1.0);
        assert_relative_eq!(TimeBase::MILLIS.to_seconds(40), 0.04);
        assert_relative_eq!(TimeBase::new(1001, 30_000).to_seconds(30), 1.001);
        assert_relative_eq!(TimeBase::MILLIS.to_seconds(-500), -0.5);
    }

    #[test]
    fn round_trips_through_ticks() {
        let tb = TimeBase::MPEG_90K;
        assert_eq!(tb.to_ticks(tb.to_seconds(3_600)), 3_600);
    }

    #[test]
    fn zero_terms_are_invalid() {
        assert!(TimeBase::MILLIS.is_valid());
        assert!(!TimeBase::new(0, 1000).is_valid());
        assert!(!TimeBase::new(1, 0).is_valid());
    }

    #[test]
    fn displays_as_fraction() {
        assert_eq!(TimeBase::MPEG_90K.to_string(), "1/90000");
    }
}
