//! Timestamp normalizer.
//!
//! Turns best-effort decoder timing into a well-formed presentation time and
//! duration, in seconds, before a frame is ordered:
//!
//! - A timestamp in a usable time base is converted and shifted by the
//!   session's `base_timestamp_offset`.
//! - A missing timestamp, an unusable time base, or a timestamp that falls
//!   more than the slack behind the highest one seen is replaced by the
//!   highest timestamp plus the nominal frame interval, and reported.
//! - A missing duration becomes the nominal frame interval.
//!
//! The slack exists because decode order legitimately runs behind
//! presentation order by the B-frame depth.
//!
//! After [`on_reset`](TimestampNormalizer::on_reset) the next timed frame
//! is rebased to continue one interval after everything already seen or
//! delivered, so a new stream never appears to jump backwards.

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::events::{AnomalyKind, TimingAnomaly};
use crate::session::Session;
use crate::types::{RawTiming, SourceDescriptor, TimeBase};

/// Corrected timing for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedTiming {
    pub presentation_time: f64,
    pub duration: f64,
    /// Set when the timestamp had to be derived
    pub anomaly: Option<TimingAnomaly>,
    /// First frame after a timestamp reset
    pub rebased: bool,
}

impl NormalizedTiming {
    /// Whether the frame follows a break in timestamp progression.
    pub fn is_discontinuity(&self) -> bool {
        self.anomaly.is_some() || self.rebased
    }
}

#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    time_base: TimeBase,
    frame_interval: f64,
    slack_frames: u32,
    highest: Option<f64>,
    last_delivered: Option<f64>,
    rebase_pending: bool,
}

impl TimestampNormalizer {
    pub fn new(time_base: TimeBase, frame_interval: f64, slack_frames: u32) -> Self {
        Self {
            time_base,
            frame_interval,
            slack_frames,
            highest: None,
            last_delivered: None,
            rebase_pending: false,
        }
    }

    /// Build a normalizer for a stream, falling back to the configured
    /// frame rate when the stream does not declare one.
    pub fn for_source(source: &SourceDescriptor, config: &PipelineConfig) -> Self {
        let mut normalizer = Self::new(
            TimeBase::MILLIS,
            1.0 / config.default_frame_rate,
            config.timestamp_slack_frames,
        );
        normalizer.configure(source, config);
        normalizer
    }

    /// Adopt a new stream's time base and frame interval.
    ///
    /// Starts a new monotonic run. The last delivered time is kept so a
    /// pending reset continues from the previous stream.
    pub fn configure(&mut self, source: &SourceDescriptor, config: &PipelineConfig) {
        self.time_base = source.time_base.unwrap_or(self.time_base);
        self.frame_interval = source.frame_interval().unwrap_or_else(|| {
            warn!(
                declared = ?source.frame_rate,
                fallback = config.default_frame_rate,
                "stream has no usable frame rate"
            );
            1.0 / config.default_frame_rate
        });
        self.slack_frames = config.timestamp_slack_frames;
        self.begin_session();
    }

    /// Forget the monotonic high-water mark.
    ///
    /// `last_delivered` survives so a pending reset continues from the
    /// previous session.
    pub fn begin_session(&mut self) {
        self.highest = None;
    }

    /// Produce corrected timing for one frame.
    pub fn normalize(&mut self, raw: &RawTiming, session: &mut Session) -> NormalizedTiming {
        let time_base = raw.time_base.unwrap_or(self.time_base);
        let converted = match raw.pts {
            None => Err(AnomalyKind::Missing),
            Some(_) if !time_base.is_valid() => Err(AnomalyKind::InvalidTimeBase),
            Some(ticks) => Ok(time_base.to_seconds(ticks)),
        };

        let mut rebased = false;
        if self.rebase_pending
            && let Ok(seconds) = converted
        {
            let target = self.rebase_anchor().map_or(0.0, |anchor| anchor + self.frame_interval);
            session.base_timestamp_offset = target - seconds;
            self.rebase_pending = false;
            rebased = true;
            debug!(
                raw = seconds,
                target,
                offset = session.base_timestamp_offset,
                "timestamps rebased"
            );
        }

        let (presentation_time, anomaly) = match converted {
            Ok(seconds) => {
                let candidate = seconds + session.base_timestamp_offset;
                match self.highest {
                    Some(highest) if candidate < highest - self.slack() => {
                        let repaired = highest + self.frame_interval;
                        let anomaly = TimingAnomaly {
                            kind: AnomalyKind::NonMonotonic,
                            observed: Some(candidate),
                            repaired,
                        };
                        (repaired, Some(anomaly))
                    }
                    _ => (candidate, None),
                }
            }
            Err(kind) => {
                let repaired = self.derived_time();
                (repaired, Some(TimingAnomaly { kind, observed: None, repaired }))
            }
        };

        let duration = match raw.duration {
            Some(ticks) if ticks > 0 && time_base.is_valid() => time_base.to_seconds(ticks),
            _ => self.frame_interval,
        };

        self.highest = Some(self.highest.map_or(presentation_time, |h| h.max(presentation_time)));

        NormalizedTiming { presentation_time, duration, anomaly, rebased }
    }

    /// Request that the next timed frame continue from the current timeline.
    pub fn on_reset(&mut self) {
        self.rebase_pending = true;
    }

    /// Record a presentation time handed to the consumer.
    pub fn note_delivered(&mut self, presentation_time: f64) {
        self.last_delivered =
            Some(self.last_delivered.map_or(presentation_time, |t| t.max(presentation_time)));
    }

    pub fn frame_interval(&self) -> f64 {
        self.frame_interval
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Highest presentation time produced since the stream was configured.
    pub fn highest(&self) -> Option<f64> {
        self.highest
    }

    pub fn last_delivered(&self) -> Option<f64> {
        self.last_delivered
    }

    pub fn is_rebase_pending(&self) -> bool {
        self.rebase_pending
    }

    fn slack(&self) -> f64 {
        self.slack_frames as f64 * self.frame_interval
    }

    /// Latest point on the timeline a rebase must continue from.
    fn rebase_anchor(&self) -> Option<f64> {
        match (self.highest, self.last_delivered) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn derived_time(&self) -> f64 {
        let reference =
            if self.rebase_pending { self.rebase_anchor() } else { self.highest };
        reference.map_or(0.0, |t| t + self.frame_interval)
    }
}
