//! Per-run pipeline state

use serde::{Deserialize, Serialize};

use crate::types::SourceDescriptor;

/// State of one playback run, from `start` to `stop`.
///
/// Owned by the pipeline and passed by reference into each stage, so
/// several pipelines never share timing state.
#[derive(Debug, Clone)]
pub struct Session {
    running: bool,
    first_frame_delivered: bool,

    /// Added to every converted timestamp; set when timestamps are reset
    pub base_timestamp_offset: f64,

    source: SourceDescriptor,
    frames_received: u64,
    frames_delivered: u64,
    frames_dropped: u64,
}

impl Session {
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            running: true,
            first_frame_delivered: false,
            base_timestamp_offset: 0.0,
            source,
            frames_received: 0,
            frames_delivered: 0,
            frames_dropped: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn first_frame_delivered(&self) -> bool {
        self.first_frame_delivered
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Stop accepting frames; buffered frames may still drain.
    pub(crate) fn halt(&mut self) {
        self.running = false;
    }

    pub(crate) fn record_received(&mut self) {
        self.frames_received += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    /// Count a delivery and report whether it is the session's first.
    pub(crate) fn record_delivered(&mut self) -> bool {
        self.frames_delivered += 1;
        !std::mem::replace(&mut self.first_frame_delivered, true)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            running: self.running,
            first_frame_delivered: self.first_frame_delivered,
            base_timestamp_offset: self.base_timestamp_offset,
            frames_received: self.frames_received,
            frames_delivered: self.frames_delivered,
            frames_dropped: self.frames_dropped,
        }
    }
}

/// Point-in-time copy of a [`Session`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SessionSnapshot {
    pub running: bool,
    pub first_frame_delivered: bool,
    pub base_timestamp_offset: f64,
    pub frames_received: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeBase;

    #[test]
    fn only_the_first_delivery_is_first() {
        let mut session = Session::new(SourceDescriptor::new(TimeBase::MILLIS, 640, 480));
        assert!(!session.first_frame_delivered());

        assert!(session.record_delivered());
        assert!(!session.record_delivered());
        assert!(!session.record_delivered());

        let snapshot = session.snapshot();
        assert!(snapshot.first_frame_delivered);
        assert_eq!(snapshot.frames_delivered, 3);
    }

    #[test]
    fn halt_stops_running() {
        let mut session = Session::new(SourceDescriptor::default());
        assert!(session.is_running());
        session.halt();
        assert!(!session.is_running());
    }
}
