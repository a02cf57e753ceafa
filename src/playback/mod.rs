//! Owning-application handle over a pipeline and its decode task

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::decoder::Decoder;
use crate::driver::{Driver, DriverHandle, DriverState};
use crate::events::PlayoutEvent;
use crate::pipeline::{Pipeline, PipelineStats, PipelineStatus, StopReport};
use crate::renderer::Renderer;
use crate::stream::EventStream;
use crate::{PlayoutError, Result};


/// A running playback: decoder, pipeline and renderer wired together.
///
/// Dropping the handle cancels the decode task without draining.
pub struct Playback<P, R> {
    pipeline: Arc<Pipeline<P, R>>,
    driver: Mutex<Option<DriverHandle>>,
}

impl<P, R> Playback<P, R>
where
    P: Send + 'static,
    R: Renderer<P> + 'static,
{
    /// Start a session for the decoder's stream and begin pulling frames.
    ///
    /// Fails without spawning anything when the configuration or the
    /// stream metadata is invalid.
    pub async fn start<D>(decoder: D, renderer: R, config: PipelineConfig) -> Result<Self>
    where
        D: Decoder<Payload = P>,
    {
        config.validate()?;
        let pipeline = Arc::new(Pipeline::new(config, renderer));
        pipeline.start(decoder.source().clone())?;

        let driver = Driver::spawn(decoder, Arc::clone(&pipeline));
        info!("Playback started");

        Ok(Self { pipeline, driver: Mutex::new(Some(driver)) })
    }

    /// Stop decoding and end the session.
    ///
    /// The decode task is cancelled and awaited first, so the decoder is
    /// closed by the time the pipeline stops. The pipeline stop itself runs
    /// on a blocking thread because draining waits for the renderer.
    /// Calling it again does nothing.
    pub async fn stop(&self, drain: bool) -> Result<StopReport> {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let summary = driver.shutdown().await?;
            debug!(?summary, "decode task joined");
        }

        let pipeline = Arc::clone(&self.pipeline);
        joined(tokio::task::spawn_blocking(move || pipeline.stop(drain)).await)
    }

    /// Switch to a new stream, continuing the current timeline.
    ///
    /// The current stream is drained, timestamps are reset and a new
    /// session starts for `decoder`, so its first delivery is flagged as
    /// the first frame again.
    pub async fn attach<D>(&self, decoder: D) -> Result<StopReport>
    where
        D: Decoder<Payload = P>,
    {
        let report = self.stop(true).await?;
        self.pipeline.reset_timestamp();
        self.pipeline.start(decoder.source().clone())?;

        let driver = Driver::spawn(decoder, Arc::clone(&self.pipeline));
        *self.driver.lock() = Some(driver);
        info!("Playback attached to a new stream");
        Ok(report)
    }

    pub fn reset_timestamp(&self) {
        self.pipeline.reset_timestamp();
    }

    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// State of the decode task, if one has been spawned and not stopped.
    pub fn driver_state(&self) -> Option<DriverState> {
        self.driver.lock().as_ref().map(|driver| *driver.state().borrow())
    }

    /// Wait until the decode task finishes on its own.
    pub async fn wait_for_driver(&self) -> Option<DriverState> {
        let mut state = self.driver.lock().as_ref()?.state();
        let finished = state.wait_for(|state| state.is_finished()).await.ok()?;
        Some(*finished)
    }

    /// Events emitted from now on.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.pipeline.subscribe())
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<P, R>> {
        &self.pipeline
    }

    /// Wait for the session's first delivery.
    ///
    /// Returns immediately if it already happened, and fails with
    /// [`PlayoutError::NotRunning`] if the session ends first.
    pub async fn wait_for_first_frame(&self, timeout: Duration) -> Result<()> {
        let mut events = self.pipeline.subscribe();
        let wait = async {
            loop {
                let status = self.pipeline.status();
                if status.first_frame_delivered {
                    return Ok(());
                }
                if !status.running {
                    return Err(PlayoutError::NotRunning);
                }

                match events.recv().await {
                    Ok(PlayoutEvent::FirstFrame { .. }) => return Ok(()),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(PlayoutError::NotRunning),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PlayoutError::Timeout { duration: timeout })?
    }
}

/// Unwrap a blocking pipeline call, re-raising its panic.
fn joined<T>(result: std::result::Result<T, JoinError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(PlayoutError::decoder_failed_with_source(
            "pipeline stop did not complete",
            err.into(),
        )),
    }
}

impl<P, R> Drop for Playback<P, R> {
    fn drop(&mut self) {
        debug!("Dropping playback");
        // Cancel the decode task on drop for clean shutdown
        if let Some(driver) = self.driver.get_mut().as_ref() {
            driver.cancel.cancel();
        }
    }
}
