//! Renderer seam

use crate::types::DeliveredFrame;

/// Anything that accepts ordered picture deliveries.
///
/// The pipeline calls `deliver` in ascending presentation order (late
/// frames excepted, see [`DeliveredFrame::is_discontinuity`]), from
/// whichever thread is feeding it, never from two threads at once.
///
/// Closures implement this directly:
///
/// ```rust
/// use playout::{DeliveredFrame, Pipeline, PipelineConfig};
///
/// let mut painted = Vec::new();
/// let pipeline = Pipeline::new(PipelineConfig::default(), move |frame: DeliveredFrame<u32>| {
///     painted.push(frame.presentation_time());
/// });
/// assert!(!pipeline.is_running());
/// ```
pub trait Renderer<P>: Send {
    fn deliver(&mut self, frame: DeliveredFrame<P>);
}

impl<P, F> Renderer<P> for F
where
    F: FnMut(DeliveredFrame<P>) + Send,
{
    fn deliver(&mut self, frame: DeliveredFrame<P>) {
        self(frame)
    }
}
