//! Presentation-order frame playout for video pipelines.
//!
//! Decoders complete pictures in decode order, which differs from display
//! order whenever a stream uses B-frames. Playout sits between a decoder and
//! a renderer and hands pictures over strictly in presentation order, with
//! repaired timing and a first-frame flag per session.
//!
//! # Features
//!
//! - **Resequencing**: Bounded reorder window keyed on presentation time
//! - **Timing repair**: Missing or broken timestamps are derived, never fatal
//! - **Timestamp reset**: A new stream continues the previous timeline
//! - **Thread-safe intake**: Feed from any decoder thread; delivery stays ordered
//!
//! # Quick Start
//!
//! ```rust
//! use futures::StreamExt;
//! use playout::{Playback, PipelineConfig, RawFrame, SourceDescriptor, TimeBase, decoder, stream};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> playout::Result<()> {
//!     let source = SourceDescriptor::new(TimeBase::MILLIS, 1280, 720).with_frame_rate(25.0);
//!     let (feed, decoder) = decoder::channel(source, 16);
//!     let (renderer, mut pictures) = stream::channel::<String>();
//!
//!     let playback = Playback::start(decoder, renderer, PipelineConfig::default()).await?;
//!
//!     // I P B B, as a decoder completes them
//!     for pts in [0, 120, 40, 80] {
//!         feed.push(RawFrame::new(format!("picture@{pts}"), pts))?;
//!     }
//!     feed.finish();
//!
//!     for _ in 0..4 {
//!         let picture = pictures.next().await.expect("four pictures");
//!         println!("{} at {:.2}s", picture.payload, picture.presentation_time());
//!     }
//!
//!     playback.stop(true).await?;
//!     Ok(())
//! }
//! ```
//!
//! For synchronous integration, drive a [`Pipeline`] directly from decoder
//! callbacks.

// Core types and error handling
mod config;
mod error;
pub mod events;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Ordering and timing
pub mod normalizer;
pub mod pipeline;
pub mod renderer;
pub mod resequencer;
pub mod session;

// Async integration
pub mod decoder;
pub mod driver;
pub mod playback;
pub mod stream;

// Core exports
pub use config::*;
pub use error::*;
pub use types::*;

// Main API exports
pub use decoder::{ChannelDecoder, Decoder, DecoderFeed};
pub use driver::{Driver, DriverHandle, DriverState};
pub use events::{AnomalyKind, DropReason, PlayoutEvent, TimingAnomaly};
pub use normalizer::{NormalizedTiming, TimestampNormalizer};
pub use pipeline::{FrameDisposition, Pipeline, PipelineStats, PipelineStatus, StopReport};
pub use playback::Playback;
pub use renderer::Renderer;
pub use resequencer::{FrameResequencer, Placement, ResequencerStats};
pub use session::{Session, SessionSnapshot};
