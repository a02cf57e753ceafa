//! Renderer that forwards deliveries into an async stream

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::renderer::Renderer;
use crate::types::DeliveredFrame;

/// Create a renderer whose deliveries come out of a [`Stream`].
///
/// The pipeline never waits on the stream half; frames queue until the
/// consumer polls. Once the stream is dropped, deliveries are discarded.
pub fn channel<P>() -> (ChannelRenderer<P>, DeliveryStream<P>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelRenderer { tx }, DeliveryStream { inner: UnboundedReceiverStream::new(rx) })
}

/// Renderer half of [`channel`].
#[derive(Debug)]
pub struct ChannelRenderer<P> {
    tx: mpsc::UnboundedSender<DeliveredFrame<P>>,
}

impl<P> ChannelRenderer<P> {
    /// Whether the stream half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<P: Send> Renderer<P> for ChannelRenderer<P> {
    fn deliver(&mut self, frame: DeliveredFrame<P>) {
        if let Err(mpsc::error::SendError(frame)) = self.tx.send(frame) {
            trace!(
                presentation_time = frame.presentation_time(),
                "delivery stream closed, frame discarded"
            );
        }
    }
}

pin_project! {
    /// Ordered deliveries, ending when the renderer half is dropped
    pub struct DeliveryStream<P> {
        #[pin]
        inner: UnboundedReceiverStream<DeliveredFrame<P>>,
    }
}

impl<P> DeliveryStream<P> {
    /// Take whatever has already been delivered, without waiting.
    pub fn drain_ready(&mut self) -> Vec<DeliveredFrame<P>> {
        let rx = self.inner.as_mut();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }
}

impl<P> Stream for DeliveryStream<P> {
    type Item = DeliveredFrame<P>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
