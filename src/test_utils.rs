//! Shared fixtures for unit tests and benchmarks
//!
//! Streams here are 25 fps with a millisecond time base, so frame `n` has a
//! raw timestamp of `n * 40` and a presentation time of `n * 0.04` seconds.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::renderer::Renderer;
use crate::types::{DeliveredFrame, RawFrame, SourceDescriptor, TimeBase};

/// Raw tick spacing of [`source_25fps`] frames.
pub const FRAME_TICKS: i64 = 40;

/// 720p, 25 fps, millisecond time base.
pub fn source_25fps() -> SourceDescriptor {
    SourceDescriptor::new(TimeBase::MILLIS, 1280, 720).with_frame_rate(25.0)
}

/// A frame whose payload is its raw timestamp.
pub fn timed_frame(pts: i64) -> RawFrame<u64> {
    RawFrame::new(pts as u64, pts)
}

/// Presentation indices of `frames` pictures in the order a decoder with
/// `b_frames` bidirectional frames per anchor would complete them.
///
/// With two B-frames: `0, 3, 1, 2, 6, 4, 5, ...`. No frame is displaced by
/// more than `b_frames` positions.
pub fn decode_order(frames: usize, b_frames: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(frames);
    if frames == 0 {
        return order;
    }

    order.push(0);
    let mut next = 1;
    while next < frames {
        let anchor = (next + b_frames).min(frames - 1);
        order.push(anchor);
        order.extend(next..anchor);
        next = anchor + 1;
    }
    order
}

/// Frames for [`decode_order`], timed for [`source_25fps`].
pub fn gop_frames(frames: usize, b_frames: usize) -> Vec<RawFrame<u64>> {
    decode_order(frames, b_frames)
        .into_iter()
        .map(|index| timed_frame(index as i64 * FRAME_TICKS))
        .collect()
}

/// Renderer that keeps every delivery; clones share the same record.
#[derive(Debug)]
pub struct RecordingRenderer<P> {
    frames: Arc<Mutex<Vec<DeliveredFrame<P>>>>,
}

impl<P> Default for RecordingRenderer<P> {
    fn default() -> Self {
        Self { frames: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<P> Clone for RecordingRenderer<P> {
    fn clone(&self) -> Self {
        Self { frames: Arc::clone(&self.frames) }
    }
}

impl<P: Clone> RecordingRenderer<P> {
    pub fn frames(&self) -> Vec<DeliveredFrame<P>> {
        self.frames
            .lock()
            .iter()
            .map(|frame| DeliveredFrame {
                payload: frame.payload.clone(),
                timing: frame.timing,
                decode_sequence: frame.decode_sequence,
                is_first_frame: frame.is_first_frame,
                is_discontinuity: frame.is_discontinuity,
                rotation: frame.rotation,
            })
            .collect()
    }
}

impl<P> RecordingRenderer<P> {
    pub fn presentation_times(&self) -> Vec<f64> {
        self.frames.lock().iter().map(DeliveredFrame::presentation_time).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl<P: Send> Renderer<P> for RecordingRenderer<P> {
    fn deliver(&mut self, frame: DeliveredFrame<P>) {
        self.frames.lock().push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_order_displaces_by_at_most_b_frames() {
        assert_eq!(decode_order(7, 2), [0, 3, 1, 2, 6, 4, 5]);
        assert_eq!(decode_order(5, 0), [0, 1, 2, 3, 4]);
        assert_eq!(decode_order(0, 2), Vec::<usize>::new());

        for (position, index) in decode_order(50, 3).into_iter().enumerate() {
            assert!(position.abs_diff(index) <= 3);
        }
    }

    #[test]
    fn decode_order_is_a_permutation() {
        let mut order = decode_order(23, 3);
        order.sort_unstable();
        assert_eq!(order, (0..23).collect::<Vec<_>>());
    }
}
