//! Event subscription as a stream

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::events::PlayoutEvent;

pin_project! {
    /// [`PlayoutEvent`]s as a stream
    ///
    /// A subscriber that falls more than the configured event capacity behind
    /// skips the events it missed instead of ending.
    pub struct EventStream {
        #[pin]
        inner: BroadcastStream<PlayoutEvent>,
        missed: u64,
    }
}

impl EventStream {
    pub fn new(rx: broadcast::Receiver<PlayoutEvent>) -> Self {
        Self { inner: BroadcastStream::new(rx), missed: 0 }
    }

    /// Events skipped because this subscriber lagged
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

impl Stream for EventStream {
    type Item = PlayoutEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "event subscriber lagged");
                    *this.missed += skipped;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
