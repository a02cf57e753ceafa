//! Decoder trait for frame sources

use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{RawFrame, SourceDescriptor};
use crate::{PlayoutError, Result};

/// A source of decoded pictures, in decode-completion order.
///
/// Implementations wrap a real decoder (hardware or software) and handle
/// their own pacing; the driver simply pulls until the stream ends.
#[async_trait::async_trait]
pub trait Decoder: Send + 'static {
    /// Picture buffer handed through to the renderer
    type Payload: Send + 'static;

    /// Stream metadata the pipeline is started with
    fn source(&self) -> &SourceDescriptor;

    /// Wait for the next decoded frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - A picture completed decoding
    /// - `Ok(None)` - End of stream
    /// - `Err(e)` - Decode failed; [`PlayoutError::ResourceExhaustion`]
    ///   means one frame was lost and decoding continues
    async fn next_frame(&mut self) -> Result<Option<RawFrame<Self::Payload>>>;

    /// Release decoder resources. Called once, after the last `next_frame`.
    async fn close(&mut self) {}
}

/// Create a [`Decoder`] fed from another thread.
///
/// For decoders that deliver pictures through a callback on their own
/// thread: the callback pushes into the [`DecoderFeed`], the pipeline pulls
/// from the [`ChannelDecoder`]. At most `capacity` frames wait in between.
pub fn channel<P>(
    source: SourceDescriptor,
    capacity: usize,
) -> (DecoderFeed<P>, ChannelDecoder<P>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DecoderFeed { tx }, ChannelDecoder { source, rx })
}

/// Producer half of [`channel`].
#[derive(Debug)]
pub struct DecoderFeed<P> {
    tx: mpsc::Sender<Result<RawFrame<P>>>,
}

impl<P> Clone for DecoderFeed<P> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<P> DecoderFeed<P> {
    /// Hand over a frame without waiting.
    ///
    /// A full channel drops the frame with
    /// [`PlayoutError::ResourceExhaustion`]; a closed one returns
    /// [`PlayoutError::NotRunning`].
    pub fn push(&self, frame: RawFrame<P>) -> Result<()> {
        self.tx.try_send(Ok(frame)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PlayoutError::resource_exhaustion(
                "decoder feed is full",
                self.tx.max_capacity(),
            ),
            mpsc::error::TrySendError::Closed(_) => PlayoutError::NotRunning,
        })
    }

    /// Hand over a frame, waiting for room.
    ///
    /// Blocks the calling thread; use it from decoder threads, never from
    /// inside an async runtime.
    pub fn push_blocking(&self, frame: RawFrame<P>) -> Result<()> {
        self.tx.blocking_send(Ok(frame)).map_err(|_| PlayoutError::NotRunning)
    }

    /// Pass a decode failure on to the pipeline.
    pub fn report(&self, error: PlayoutError) -> Result<()> {
        self.tx.try_send(Err(error)).map_err(|_| PlayoutError::NotRunning)
    }

    /// Signal end of stream once every clone has finished.
    pub fn finish(self) {
        debug!("decoder feed finished");
    }

    /// Whether the consuming side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of [`channel`].
#[derive(Debug)]
pub struct ChannelDecoder<P> {
    source: SourceDescriptor,
    rx: mpsc::Receiver<Result<RawFrame<P>>>,
}

#[async_trait::async_trait]
impl<P> Decoder for ChannelDecoder<P>
where
    P: Send + 'static,
{
    type Payload = P;

    fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame<P>>> {
        self.rx.recv().await.transpose()
    }

    async fn close(&mut self) {
        self.rx.close();
        // Frames still queued are released here
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeBase;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new(TimeBase::MILLIS, 320, 240)
    }

    #[tokio::test]
    async fn frames_arrive_in_push_order_then_end() {
        let (feed, mut decoder) = channel::<u32>(source(), 4);
        feed.push(RawFrame::new(1, 0)).unwrap();
        feed.push(RawFrame::new(2, 40)).unwrap();
        feed.finish();

        assert_eq!(decoder.next_frame().await.unwrap().unwrap().payload, 1);
        assert_eq!(decoder.next_frame().await.unwrap().unwrap().payload, 2);
        assert!(decoder.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_feed_drops_the_frame() {
        let (feed, mut decoder) = channel::<u32>(source(), 1);
        feed.push(RawFrame::new(1, 0)).unwrap();

        let err = feed.push(RawFrame::new(2, 40)).unwrap_err();
        assert!(matches!(err, PlayoutError::ResourceExhaustion { pending: 1, .. }));
        assert_eq!(decoder.next_frame().await.unwrap().unwrap().payload, 1);
    }

    #[tokio::test]
    async fn reported_errors_surface_from_next_frame() {
        let (feed, mut decoder) = channel::<u32>(source(), 2);
        feed.report(PlayoutError::decoder_failed("bitstream corrupt")).unwrap();

        let err = decoder.next_frame().await.unwrap_err();
        assert!(matches!(err, PlayoutError::Decoder { .. }));
    }

    #[tokio::test]
    async fn closed_decoder_rejects_pushes() {
        let (feed, mut decoder) = channel::<u32>(source(), 2);
        decoder.close().await;

        assert!(feed.is_closed());
        assert!(matches!(feed.push(RawFrame::new(1, 0)), Err(PlayoutError::NotRunning)));
    }

    #[test]
    fn blocking_push_from_a_decoder_thread() {
        let (feed, mut decoder) = channel::<u32>(source(), 1);
        let producer = std::thread::spawn(move || {
            for n in 0..3 {
                feed.push_blocking(RawFrame::new(n, n as i64 * 40)).unwrap();
            }
        });

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let payloads = runtime.block_on(async {
            let mut payloads = Vec::new();
            while let Some(frame) = decoder.next_frame().await.unwrap() {
                payloads.push(frame.payload);
            }
            payloads
        });
        producer.join().unwrap();
        assert_eq!(payloads, [0, 1, 2]);
    }
}
