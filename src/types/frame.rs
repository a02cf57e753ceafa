//! Frame types flowing from the decoder to the renderer

use serde::{Deserialize, Serialize};

use super::{Rotation, TimeBase};

/// A decoded picture as handed over by the decoder.
///
/// Timing is best-effort: any of it may be missing and is repaired by the
/// normalizer before the frame is ordered.
#[derive(Debug, Clone)]
pub struct RawFrame<P> {
    /// Raw picture buffer
    pub payload: P,

    /// Presentation timestamp in `time_base` ticks
    pub pts: Option<i64>,

    /// Time base of `pts` and `duration`; falls back to the stream's
    pub time_base: Option<TimeBase>,

    /// Display duration in `time_base` ticks
    pub duration: Option<i64>,
}

impl<P> RawFrame<P> {
    /// Create a frame carrying a timestamp in the stream's time base.
    pub fn new(payload: P, pts: i64) -> Self {
        Self { payload, pts: Some(pts), time_base: None, duration: None }
    }

    /// Create a frame the decoder could not timestamp.
    pub fn untimed(payload: P) -> Self {
        Self { payload, pts: None, time_base: None, duration: None }
    }

    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = Some(time_base);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Split the payload from the timing metadata.
    pub fn into_parts(self) -> (P, RawTiming) {
        let timing =
            RawTiming { pts: self.pts, time_base: self.time_base, duration: self.duration };
        (self.payload, timing)
    }
}

/// Timing metadata of a [`RawFrame`], without the picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTiming {
    pub pts: Option<i64>,
    pub time_base: Option<TimeBase>,
    pub duration: Option<i64>,
}

/// Corrected timing delivered alongside each picture, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct FrameTiming {
    pub presentation_time: f64,
    pub duration: f64,
}

/// One decoded picture awaiting ordered delivery.
///
/// `decode_sequence` is stamped by the resequencer on insert and only breaks
/// ties between equal presentation times.
#[derive(Debug)]
pub struct FrameRecord<P> {
    pub payload: P,

    /// Seconds; a non-finite value means the timestamp is unknown
    pub presentation_time: f64,

    /// Seconds
    pub duration: f64,

    pub decode_sequence: u64,

    /// Follows a timestamp reset, a repair, or was emitted out of order
    pub is_discontinuity: bool,
}

impl<P> FrameRecord<P> {
    pub fn new(payload: P, presentation_time: f64, duration: f64) -> Self {
        Self { payload, presentation_time, duration, decode_sequence: 0, is_discontinuity: false }
    }

    /// Mark the record as following a break in timestamp progression.
    pub fn with_discontinuity(mut self, is_discontinuity: bool) -> Self {
        self.is_discontinuity = is_discontinuity;
        self
    }

    pub fn timing(&self) -> FrameTiming {
        FrameTiming { presentation_time: self.presentation_time, duration: self.duration }
    }
}

/// A picture handed to the renderer, in presentation order.
#[derive(Debug)]
pub struct DeliveredFrame<P> {
    pub payload: P,
    pub timing: FrameTiming,
    pub decode_sequence: u64,

    /// Set on the first delivery of a session only
    pub is_first_frame: bool,

    pub is_discontinuity: bool,
    pub rotation: Rotation,
}

impl<P> DeliveredFrame<P> {
    pub(crate) fn from_record(
        record: FrameRecord<P>,
        is_first_frame: bool,
        rotation: Rotation,
    ) -> Self {
        let timing = record.timing();
        Self {
            payload: record.payload,
            timing,
            decode_sequence: record.decode_sequence,
            is_first_frame,
            is_discontinuity: record.is_discontinuity,
            rotation,
        }
    }

    pub fn presentation_time(&self) -> f64 {
        self.timing.presentation_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_splits_into_parts() {
        let frame = RawFrame::new(vec![1u8, 2, 3], 3_600)
            .with_time_base(TimeBase::MPEG_90K)
            .with_duration(3_600);
        let (payload, timing) = frame.into_parts();

        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(timing.pts, Some(3_600));
        assert_eq!(timing.time_base, Some(TimeBase::MPEG_90K));
        assert_eq!(timing.duration, Some(3_600));
    }

    #[test]
    fn untimed_frame_has_no_timing() {
        let (_, timing) = RawFrame::untimed(()).into_parts();
        assert_eq!(timing, RawTiming::default());
    }

    #[test]
    fn delivered_frame_moves_record_payload() {
        let record = FrameRecord::new(String::from("picture"), 1.5, 0.04).with_discontinuity(true);
        let delivered = DeliveredFrame::from_record(record, true, Rotation::Clockwise90);

        assert_eq!(delivered.payload, "picture");
        assert_eq!(delivered.presentation_time(), 1.5);
        assert!(delivered.is_first_frame);
        assert!(delivered.is_discontinuity);
        assert_eq!(delivered.rotation, Rotation::Clockwise90);
    }
}
