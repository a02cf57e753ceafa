//! Pipeline coordinator.
//!
//! Owns the session lifecycle and routes every decoded frame through
//! normalization and resequencing to the renderer.
//!
//! The ordering lock guards the session, the normalizer, the resequencer and
//! the queue of frames ready for delivery, and is held only while that state
//! changes. The renderer lock is held while painting. A thread that queues
//! frames while another thread holds the renderer leaves them for that
//! thread, which re-checks the queue before letting go, so deliveries stay
//! in queue order without any caller waiting on the renderer. `start` and
//! `stop` additionally take a lifecycle lock.
//!
//! A frame counts as delivered once it leaves the queue for the renderer.
//! Queued frames are still discardable, so the first-frame flag, the
//! delivery counters and the rebase anchor are only updated at that point.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::config::PipelineConfig;
use crate::events::{DropReason, EventBus, PlayoutEvent};
use crate::normalizer::TimestampNormalizer;
use crate::renderer::Renderer;
use crate::resequencer::{FrameResequencer, Placement, ResequencerStats};
use crate::session::{Session, SessionSnapshot};
use crate::types::{DeliveredFrame, FrameRecord, RawFrame, SourceDescriptor, TimeBase};
use crate::{PlayoutError, Result};

/// What happened to a frame accepted by [`Pipeline::on_decoded_frame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDisposition {
    pub placement: Placement,
    /// Normalized presentation time in seconds
    pub presentation_time: f64,
    /// Frames released towards the renderer by this call
    pub released: usize,
}

/// Side-effect free view of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PipelineStatus {
    pub running: bool,
    pub first_frame_delivered: bool,
    /// Frames held by the resequencer
    pub buffered: usize,
    /// Ordered frames waiting for the renderer
    pub pending_deliveries: usize,
    pub last_delivered: Option<f64>,
    pub rebase_pending: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStats {
    /// Current session, if one is running
    pub session: Option<SessionSnapshot>,
    pub resequencer: ResequencerStats,
    /// Frames handed to the renderer over the pipeline's lifetime
    pub delivered: u64,
}

/// Outcome of [`Pipeline::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct StopReport {
    /// False when the call found the pipeline already stopped
    pub was_running: bool,
    pub drained: bool,
    /// Frames flushed to the renderer during the stop
    pub flushed: usize,
    /// Frames released without delivery
    pub discarded: usize,
    /// Final counters of the stopped session
    pub session: Option<SessionSnapshot>,
}

struct State<P> {
    session: Option<Session>,
    normalizer: TimestampNormalizer,
    resequencer: FrameResequencer<P>,
    outbox: VecDeque<FrameRecord<P>>,
}

impl<P> State<P> {
    fn running_session(&mut self) -> Option<&mut Session> {
        self.session.as_mut().filter(|session| session.is_running())
    }

    fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_running)
    }

    fn pending(&self) -> usize {
        self.resequencer.len() + self.outbox.len()
    }

    /// Move every record the resequencer will give up into the outbox.
    fn release_ready(&mut self, events: &EventBus) -> usize {
        let mut released = 0;
        loop {
            // Late records leave first
            let forced = self.resequencer.late_pending() > 0;
            let Some(record) = self.resequencer.try_emit() else {
                break;
            };
            if forced && let Some(last_emitted) = self.resequencer.last_emitted() {
                events.emit(PlayoutEvent::DiscontinuityEmitted {
                    presentation_time: record.presentation_time,
                    last_emitted,
                    decode_sequence: record.decode_sequence,
                });
            }
            self.outbox.push_back(record);
            released += 1;
        }
        released
    }

    /// Release everything the resequencer holds, ignoring the window.
    fn release_all(&mut self, events: &EventBus) -> usize {
        self.resequencer.set_draining(true);
        let released = self.release_ready(events);
        self.resequencer.set_draining(false);
        released
    }

    /// Pop the next queued record, committing it to the renderer.
    ///
    /// Only a popped record counts as delivered: anything still queued may
    /// be discarded by `stop(false)`.
    fn next_delivery(&mut self) -> Option<DeliveredFrame<P>> {
        let session = self.session.as_mut()?;
        let record = self.outbox.pop_front()?;

        let is_first_frame = session.record_delivered();
        self.normalizer.note_delivered(record.presentation_time);
        let rotation = session.source().rotation;
        Some(DeliveredFrame::from_record(record, is_first_frame, rotation))
    }
}

/// Reorders decoded frames into presentation order for one renderer.
///
/// A pipeline is reusable: `start` and `stop` may alternate any number of
/// times, and [`reset_timestamp`](Self::reset_timestamp) lets a new stream
/// continue the previous stream's timeline. All methods take `&self`; share
/// the pipeline across decoder threads with an `Arc`.
///
/// The renderer must not call back into `start` or `stop(true)` from
/// `deliver`.
pub struct Pipeline<P, R> {
    config: PipelineConfig,
    /// Serialises `start` and `stop`, so a draining stop finishes first
    lifecycle: Mutex<()>,
    state: Mutex<State<P>>,
    renderer: Mutex<R>,
    events: EventBus,
    delivered: AtomicU64,
}

impl<P, R> Pipeline<P, R>
where
    R: Renderer<P>,
{
    pub fn new(config: PipelineConfig, renderer: R) -> Self {
        let frame_interval = 1.0 / config.default_frame_rate;
        let state = State {
            session: None,
            normalizer: TimestampNormalizer::new(
                TimeBase::MILLIS,
                frame_interval,
                config.timestamp_slack_frames,
            ),
            resequencer: FrameResequencer::new(
                config.reorder_window,
                frame_interval,
                config.late_frame_policy,
            ),
            outbox: VecDeque::with_capacity(config.max_pending_deliveries),
        };

        Self {
            events: EventBus::new(config.event_capacity),
            config,
            lifecycle: Mutex::new(()),
            state: Mutex::new(state),
            renderer: Mutex::new(renderer),
            delivered: AtomicU64::new(0),
        }
    }

    /// Begin a session for a stream.
    ///
    /// Returns immediately when a session is already running. Invalid
    /// configuration or stream metadata fails the call and leaves the
    /// pipeline stopped.
    pub fn start(&self, source: SourceDescriptor) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut state = self.state.lock();
        if state.is_running() {
            debug!("start ignored, session already running");
            return Ok(());
        }

        self.config.validate()?;
        source.validate()?;

        state.resequencer.reset();
        state.normalizer.configure(&source, &self.config);
        let frame_interval = state.normalizer.frame_interval();
        state.resequencer.set_frame_interval(frame_interval);

        let event = PlayoutEvent::SessionStarted {
            width: source.width.unwrap_or_default(),
            height: source.height.unwrap_or_default(),
            frame_interval,
        };
        state.session = Some(Session::new(source));
        drop(state);

        self.events.emit(event);
        Ok(())
    }

    /// Accept one decoded frame.
    ///
    /// Fails with [`PlayoutError::NotRunning`] while stopped and with
    /// [`PlayoutError::ResourceExhaustion`] when the pipeline already holds
    /// its pending capacity. Either way the frame is released and the
    /// pipeline carries on.
    pub fn on_decoded_frame(&self, frame: RawFrame<P>) -> Result<FrameDisposition> {
        let disposition = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(session) = state.session.as_mut().filter(|session| session.is_running())
            else {
                trace!("frame received while stopped");
                return Err(PlayoutError::NotRunning);
            };
            session.record_received();

            let pending = state.resequencer.len() + state.outbox.len();
            if pending >= self.config.pending_capacity() {
                session.record_dropped();
                self.events.emit(PlayoutEvent::FrameDropped {
                    reason: DropReason::ResourceExhaustion,
                    presentation_time: None,
                });
                return Err(PlayoutError::resource_exhaustion(
                    "renderer is not keeping up with intake",
                    pending,
                ));
            }

            let (payload, raw) = frame.into_parts();
            let timing = state.normalizer.normalize(&raw, session);
            if let Some(anomaly) = timing.anomaly {
                self.events.emit(PlayoutEvent::TimingAnomaly(anomaly));
            }

            let record = FrameRecord::new(payload, timing.presentation_time, timing.duration)
                .with_discontinuity(timing.is_discontinuity());
            let placement = state.resequencer.insert(record);
            let presentation_time = match placement {
                Placement::Repaired { presentation_time } => presentation_time,
                Placement::Dropped { .. } => {
                    session.record_dropped();
                    self.events.emit(PlayoutEvent::FrameDropped {
                        reason: DropReason::LateFrame,
                        presentation_time: Some(timing.presentation_time),
                    });
                    timing.presentation_time
                }
                Placement::Ordered | Placement::Late { .. } => timing.presentation_time,
            };

            let released = state.release_ready(&self.events);
            trace!(presentation_time, ?placement, released, "frame accepted");
            FrameDisposition { placement, presentation_time, released }
        };

        self.pump();
        Ok(disposition)
    }

    /// Deliver everything buffered, in order, without ending the session.
    ///
    /// Returns how many frames were released.
    pub fn end_of_stream(&self) -> usize {
        let released = {
            let mut state = self.state.lock();
            if !state.is_running() {
                return 0;
            }
            state.release_all(&self.events)
        };

        debug!(released, "end of stream");
        self.pump();
        released
    }

    /// Account for a frame the decoder lost before it reached the pipeline.
    pub fn record_drop(&self, error: &PlayoutError) {
        let mut state = self.state.lock();
        let Some(session) = state.running_session() else {
            return;
        };
        session.record_dropped();
        drop(state);

        let reason = match error {
            PlayoutError::ResourceExhaustion { .. } => DropReason::ResourceExhaustion,
            _ => DropReason::Decoder,
        };
        self.events.emit(PlayoutEvent::FrameDropped { reason, presentation_time: None });
    }

    /// End the running session.
    ///
    /// With `drain`, every buffered frame is delivered in order before this
    /// returns; otherwise buffered and queued frames are released unseen.
    /// Calling it on a stopped pipeline does nothing.
    pub fn stop(&self, drain: bool) -> StopReport {
        let _lifecycle = self.lifecycle.lock();
        let mut state = self.state.lock();
        let Some(session) = state.session.as_mut() else {
            return StopReport::default();
        };
        session.halt();

        let mut report = StopReport { was_running: true, drained: drain, ..Default::default() };
        if drain {
            // Intake is refused from here on; the session stays until the
            // queue is empty so deliveries are still accounted to it
            report.flushed = state.release_all(&self.events);
            drop(state);
            self.deliver_all();
            state = self.state.lock();
        } else {
            report.discarded = state.resequencer.reset() + state.outbox.len();
            state.outbox.clear();
        }
        report.session = state.session.take().map(|session| session.snapshot());
        drop(state);

        let delivered = report.session.map_or(0, |session| session.frames_delivered);
        self.events.emit(PlayoutEvent::SessionStopped {
            drained: drain,
            delivered,
            discarded: report.discarded,
        });
        report
    }

    /// Make the next stream continue the current timeline.
    ///
    /// Frames already buffered keep their timestamps; the first timed frame
    /// after this call is rebased to follow them.
    pub fn reset_timestamp(&self) {
        self.state.lock().normalizer.on_reset();
        info!("timestamp reset");
        self.events.emit(PlayoutEvent::TimestampReset);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running()
    }

    pub fn status(&self) -> PipelineStatus {
        let state = self.state.lock();
        PipelineStatus {
            running: state.is_running(),
            first_frame_delivered: state
                .session
                .as_ref()
                .is_some_and(Session::first_frame_delivered),
            buffered: state.resequencer.len(),
            pending_deliveries: state.outbox.len(),
            last_delivered: state.normalizer.last_delivered(),
            rebase_pending: state.normalizer.is_rebase_pending(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.state.lock();
        PipelineStats {
            session: state.session.as_ref().map(Session::snapshot),
            resequencer: state.resequencer.stats(),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    /// Receive [`PlayoutEvent`]s emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayoutEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Deliver queued frames unless another thread already is.
    fn pump(&self) {
        loop {
            let Some(mut renderer) = self.renderer.try_lock() else {
                return;
            };
            self.drain_outbox(&mut *renderer);
            drop(renderer);

            // Frames queued while we held the renderer were left for us
            if self.state.lock().outbox.is_empty() {
                return;
            }
        }
    }

    /// Deliver queued frames, waiting for the renderer if it is busy.
    fn deliver_all(&self) {
        let mut renderer = self.renderer.lock();
        self.drain_outbox(&mut *renderer);
    }

    fn drain_outbox(&self, renderer: &mut R) {
        loop {
            let next = self.state.lock().next_delivery();
            let Some(frame) = next else {
                return;
            };
            let first_frame = frame.is_first_frame.then(|| frame.presentation_time());
            renderer.deliver(frame);
            self.delivered.fetch_add(1, Ordering::Relaxed);

            if let Some(presentation_time) = first_frame {
                self.events.emit(PlayoutEvent::FirstFrame { presentation_time });
            }
        }
    }
}

impl<P, R> fmt::Debug for Pipeline<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("running", &state.is_running())
            .field("pending", &state.pending())
            .field("delivered", &self.delivered.load(Ordering::Relaxed))
            .finish()
    }
}
