//! Driver spawns and manages the decode task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::decoder::Decoder;
use crate::pipeline::Pipeline;
use crate::renderer::Renderer;
use crate::{PlayoutError, Result};

/// Consecutive decoder failures tolerated before the task gives up.
pub const MAX_DECODER_ERRORS: u32 = 10;

/// Where the decode task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// The decoder reached end of stream and the buffer was flushed
    Ended,
    Cancelled,
    /// Too many consecutive decoder errors
    Failed,
    /// The pipeline stopped accepting frames
    Detached,
}

impl DriverState {
    pub fn is_finished(self) -> bool {
        !matches!(self, DriverState::Running)
    }
}

/// Totals reported when the decode task exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSummary {
    pub state: DriverState,
    /// Frames accepted by the pipeline
    pub frames: u64,
    /// Frames lost on either side of the pipeline boundary
    pub dropped: u64,
}

/// Handle to a running decode task
pub struct DriverHandle {
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    state: watch::Receiver<DriverState>,
    join: JoinHandle<DriverSummary>,
}

impl DriverHandle {
    /// Watch the task's state
    pub fn state(&self) -> watch::Receiver<DriverState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task and wait for it to release the decoder.
    pub async fn shutdown(self) -> Result<DriverSummary> {
        self.cancel.cancel();
        self.join.await.map_err(|err| {
            PlayoutError::decoder_failed_with_source("decode task did not exit cleanly", err.into())
        })
    }
}

/// Driver pulls frames from a [`Decoder`] into a [`Pipeline`]
///
/// The spawned task owns the decoder. Pipeline calls are synchronous and
/// deliver to the renderer inline, so the renderer should be quick.
pub struct Driver;

impl Driver {
    /// Spawn the decode task. The pipeline must already be started.
    pub fn spawn<D, R>(decoder: D, pipeline: Arc<Pipeline<D::Payload, R>>) -> DriverHandle
    where
        D: Decoder,
        R: Renderer<D::Payload> + 'static,
    {
        let (state_tx, state_rx) = watch::channel(DriverState::Running);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        let join = tokio::spawn(async move {
            let summary = Self::decode_task(decoder, pipeline, cancel_task).await;
            let _ = state_tx.send(summary.state);
            summary
        });

        DriverHandle { cancel, state: state_rx, join }
    }

    async fn decode_task<D, R>(
        mut decoder: D,
        pipeline: Arc<Pipeline<D::Payload, R>>,
        cancel: CancellationToken,
    ) -> DriverSummary
    where
        D: Decoder,
        R: Renderer<D::Payload>,
    {
        info!("Decode task started");
        let mut summary = DriverSummary { state: DriverState::Running, frames: 0, dropped: 0 };
        let mut error_count = 0u32;

        while summary.state == DriverState::Running {
            // Use select to allow cancellation during decoder.next_frame()
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Decode task cancelled");
                    summary.state = DriverState::Cancelled;
                    break;
                }
                result = decoder.next_frame() => result,
            };

            match result {
                Ok(Some(frame)) => {
                    error_count = 0;
                    match pipeline.on_decoded_frame(frame) {
                        Ok(disposition) => {
                            summary.frames += 1;
                            trace!(
                                frame = summary.frames,
                                presentation_time = disposition.presentation_time,
                                released = disposition.released,
                                "frame routed"
                            );
                        }
                        Err(PlayoutError::NotRunning) => {
                            debug!("Pipeline stopped, detaching decoder");
                            summary.state = DriverState::Detached;
                        }
                        Err(e) => {
                            summary.dropped += 1;
                            debug!("Frame dropped by pipeline: {}", e);
                        }
                    }
                }
                Ok(None) => {
                    let flushed = pipeline.end_of_stream();
                    info!(
                        "Decoder stream ended after {} frames ({} flushed)",
                        summary.frames, flushed
                    );
                    summary.state = DriverState::Ended;
                }
                Err(e) if e.is_recoverable() => {
                    summary.dropped += 1;
                    warn!("Decoder dropped a frame: {}", e);
                    pipeline.record_drop(&e);
                }
                Err(e) => {
                    // Decoder error - don't crash on transient failures
                    error_count += 1;
                    error!("Decoder error ({}/{}): {}", error_count, MAX_DECODER_ERRORS, e);

                    if error_count >= MAX_DECODER_ERRORS {
                        error!("Too many decoder errors, shutting down");
                        summary.state = DriverState::Failed;
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ... capped at 1.6s
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            summary.state = DriverState::Cancelled;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        decoder.close().await;
        info!(
            "Decode task ended ({:?}, {} frames, {} dropped)",
            summary.state, summary.frames, summary.dropped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::decoder;
    use crate::test_utils::{RecordingRenderer, gop_frames, source_25fps, timed_frame};
    use crate::types::{RawFrame, SourceDescriptor};
    use std::sync::atomic::{AtomicBool, Ordering};

    type TestPipeline = Arc<Pipeline<u64, RecordingRenderer<u64>>>;

    fn started_pipeline() -> (TestPipeline, RecordingRenderer<u64>) {
        let recorder = RecordingRenderer::default();
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default(), recorder.clone()));
        pipeline.start(source_25fps()).unwrap();
        (pipeline, recorder)
    }

    /// Fails a fixed number of times, then ends.
    struct FailingDecoder {
        source: SourceDescriptor,
        failures: u32,
        closed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Decoder for FailingDecoder {
        type Payload = u64;

        fn source(&self) -> &SourceDescriptor {
            &self.source
        }

        async fn next_frame(&mut self) -> Result<Option<RawFrame<u64>>> {
            if self.failures == 0 {
                return Ok(None);
            }
            self.failures -= 1;
            Err(PlayoutError::decoder_failed("corrupt slice"))
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn routes_frames_and_flushes_at_end_of_stream() {
        let (pipeline, recorder) = started_pipeline();
        let (feed, decoder) = decoder::channel(source_25fps(), 64);
        for frame in gop_frames(12, 2) {
            feed.push(frame).unwrap();
        }
        feed.finish();

        let handle = Driver::spawn(decoder, Arc::clone(&pipeline));
        let mut state = handle.state();
        state.wait_for(|state| state.is_finished()).await.unwrap();

        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.state, DriverState::Ended);
        assert_eq!(summary.frames, 12);
        assert_eq!(recorder.len(), 12);
        assert!(pipeline.is_running());
    }

    #[tokio::test]
    async fn recoverable_decoder_errors_are_counted_as_drops() {
        let (pipeline, recorder) = started_pipeline();
        let (feed, decoder) = decoder::channel(source_25fps(), 8);
        feed.push(timed_frame(0)).unwrap();
        feed.report(PlayoutError::resource_exhaustion("surface pool empty", 4)).unwrap();
        feed.push(timed_frame(80)).unwrap();
        feed.finish();

        let handle = Driver::spawn(decoder, Arc::clone(&pipeline));
        let mut state = handle.state();
        state.wait_for(|state| state.is_finished()).await.unwrap();
        let summary = handle.shutdown().await.unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(recorder.len(), 2);
        assert_eq!(pipeline.stats().session.unwrap().frames_dropped, 1);
    }

    #[tokio::test]
    async fn cancellation_closes_the_decoder() {
        let (pipeline, _) = started_pipeline();
        let (feed, decoder) = decoder::channel::<u64>(source_25fps(), 8);

        let handle = Driver::spawn(decoder, pipeline);
        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.state, DriverState::Cancelled);
        assert!(feed.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_errors_fail_the_task() {
        let (pipeline, _) = started_pipeline();
        let closed = Arc::new(AtomicBool::new(false));
        let decoder = FailingDecoder {
            source: source_25fps(),
            failures: MAX_DECODER_ERRORS + 5,
            closed: Arc::clone(&closed),
        };

        let handle = Driver::spawn(decoder, pipeline);
        let mut state = handle.state();
        state.wait_for(|state| state.is_finished()).await.unwrap();

        let summary = handle.shutdown().await.unwrap();
        assert_eq!(summary.state, DriverState::Failed);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stopped_pipeline_detaches_the_driver() {
        let (pipeline, recorder) = started_pipeline();
        pipeline.stop(false);

        let (feed, decoder) = decoder::channel(source_25fps(), 8);
        feed.push(timed_frame(0)).unwrap();

        let handle = Driver::spawn(decoder, pipeline);
        let mut state = handle.state();
        state.wait_for(|state| state.is_finished()).await.unwrap();

        assert_eq!(handle.shutdown().await.unwrap().state, DriverState::Detached);
        assert!(recorder.is_empty());
        assert!(feed.is_closed());
    }
}
