//! Observability hook for conditions the pipeline recovers from.
//!
//! Timing repairs, out-of-order emissions and dropped frames never fail the
//! call that caused them. They are logged through `tracing` and broadcast to
//! any subscriber as a [`PlayoutEvent`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why the normalizer had to derive a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum AnomalyKind {
    /// The decoder supplied no timestamp
    Missing,
    /// The frame's time base cannot convert ticks
    InvalidTimeBase,
    /// The timestamp fell behind the stream by more than the allowed slack
    NonMonotonic,
}

/// A timestamp the normalizer replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct TimingAnomaly {
    pub kind: AnomalyKind,
    /// Offending value in seconds, when there was one
    pub observed: Option<f64>,
    pub repaired: f64,
}

/// Why a frame never reached the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum DropReason {
    /// Pending capacity was exhausted
    ResourceExhaustion,
    /// Arrived behind an emitted frame under `LateFramePolicy::Drop`
    LateFrame,
    /// The decoder reported the frame lost
    Decoder,
}

/// Something worth reporting that did not stop the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum PlayoutEvent {
    SessionStarted { width: u32, height: u32, frame_interval: f64 },
    TimingAnomaly(TimingAnomaly),
    DiscontinuityEmitted { presentation_time: f64, last_emitted: f64, decode_sequence: u64 },
    FrameDropped { reason: DropReason, presentation_time: Option<f64> },
    FirstFrame { presentation_time: f64 },
    TimestampReset,
    SessionStopped { drained: bool, delivered: u64, discarded: usize },
}

impl PlayoutEvent {
    fn log(&self) {
        match self {
            PlayoutEvent::SessionStarted { width, height, frame_interval } => {
                info!(width, height, frame_interval, "session started");
            }
            PlayoutEvent::TimingAnomaly(anomaly) => {
                warn!(
                    kind = ?anomaly.kind,
                    observed = ?anomaly.observed,
                    repaired = anomaly.repaired,
                    "timestamp repaired"
                );
            }
            PlayoutEvent::DiscontinuityEmitted {
                presentation_time,
                last_emitted,
                decode_sequence,
            } => {
                warn!(
                    presentation_time,
                    last_emitted, decode_sequence, "late frame emitted out of order"
                );
            }
            PlayoutEvent::FrameDropped { reason, presentation_time } => {
                warn!(?reason, ?presentation_time, "frame dropped");
            }
            PlayoutEvent::FirstFrame { presentation_time } => {
                debug!(presentation_time, "first frame delivered");
            }
            PlayoutEvent::TimestampReset => info!("timestamp reset requested"),
            PlayoutEvent::SessionStopped { drained, delivered, discarded } => {
                info!(drained, delivered, discarded, "session stopped");
            }
        }
    }
}

/// Fan-out of [`PlayoutEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<PlayoutEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Log the event and hand it to current subscribers.
    pub(crate) fn emit(&self, event: PlayoutEvent) {
        event.log();
        // No subscribers is the common case
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PlayoutEvent> {
        self.tx.subscribe()
    }
}
