//! Error types for the playout pipeline.
//!
//! Only conditions that make a specific call fail are errors. Timing repairs
//! and out-of-order emissions are recovered locally and surface as
//! [`PlayoutEvent`](crate::PlayoutEvent)s instead.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: Missing or invalid stream metadata at `start`
//! - **Resource Errors**: Frames dropped because pending capacity is exhausted
//! - **Lifecycle Errors**: Intake while the pipeline is stopped
//! - **Decoder Errors**: Failures reported by the upstream decode stage
//!
//! ## Recovery
//!
//! ```rust
//! use playout::PlayoutError;
//!
//! let error = PlayoutError::resource_exhaustion("renderer is behind", 36);
//! if error.is_recoverable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for playout operations.
pub type Result<T, E = PlayoutError> = std::result::Result<T, E>;

/// Main error type for playout operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PlayoutError {
    #[error("Invalid stream configuration ({field}): {reason}")]
    Configuration { field: &'static str, reason: String },

    #[error("Frame dropped, {pending} frames already pending: {context}")]
    ResourceExhaustion { context: String, pending: usize },

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Decoder failure: {reason}")]
    Decoder {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid pipeline config: {details}")]
    Config { details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl PlayoutError {
    /// Returns whether the pipeline keeps going after this error.
    ///
    /// Recoverable errors cost a single frame; the session stays intact.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayoutError::ResourceExhaustion { .. } => true,
            PlayoutError::Timeout { .. } => true,
            PlayoutError::NotRunning => false,
            PlayoutError::Configuration { .. } => false,
            PlayoutError::Decoder { .. } => false,
            PlayoutError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PlayoutError::Configuration { .. } => vec![
                "Check the demuxer reported a time base for the video stream",
                "Verify the stream dimensions are known before starting",
                "Probe the container again if metadata was incomplete",
            ],
            PlayoutError::ResourceExhaustion { .. } => vec![
                "Check the renderer is consuming deliveries",
                "Increase max_pending_deliveries",
                "Reduce decode-ahead on the decoder side",
            ],
            PlayoutError::NotRunning => {
                vec!["Call start() before feeding frames", "Stop feeding frames after stop()"]
            }
            PlayoutError::Decoder { .. } => vec![
                "Verify the stream's encode format is supported",
                "Check the codec configuration record (extra data)",
                "Restart the session with a fresh decoder",
            ],
            PlayoutError::Config { .. } => vec![
                "Check reorder_window is at least 1",
                "Check default_frame_rate is positive",
                "Validate the YAML field names",
            ],
            PlayoutError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Verify the decoder is producing frames",
                "Check the reorder window is not larger than the stream",
            ],
        }
    }

    /// Helper constructor for missing or invalid stream metadata.
    pub fn configuration(field: &'static str, reason: impl Into<String>) -> Self {
        PlayoutError::Configuration { field, reason: reason.into() }
    }

    /// Helper constructor for dropped frames.
    pub fn resource_exhaustion(context: impl Into<String>, pending: usize) -> Self {
        PlayoutError::ResourceExhaustion { context: context.into(), pending }
    }

    /// Helper constructor for decoder errors.
    pub fn decoder_failed(reason: impl Into<String>) -> Self {
        PlayoutError::Decoder { reason: reason.into(), source: None }
    }

    /// Helper constructor for decoder errors with source.
    pub fn decoder_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PlayoutError::Decoder { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for invalid pipeline configuration.
    pub fn invalid_config(details: impl Into<String>) -> Self {
        PlayoutError::Config { details: details.into() }
    }
}

impl From<serde_yaml_ng::Error> for PlayoutError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        PlayoutError::Config { details: err.to_string() }
    }
}
