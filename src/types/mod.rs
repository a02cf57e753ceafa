//! Core types shared by the pipeline stages.
//!
//! - [`RawFrame`] is what the decoder hands over: a picture plus best-effort timing
//! - [`FrameRecord`] is a picture with repaired timing, owned by the resequencer
//! - [`DeliveredFrame`] is what the renderer receives, in presentation order
//! - [`SourceDescriptor`] carries the stream metadata a session needs
//!
//! All corrected times are `f64` seconds.

mod frame;
mod source;
mod time_base;

pub use frame::{DeliveredFrame, FrameRecord, FrameTiming, RawFrame, RawTiming};
pub use source::{EncodeFormat, Rotation, SourceDescriptor};
pub use time_base::TimeBase;
