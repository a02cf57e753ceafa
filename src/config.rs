//! Pipeline configuration

use serde::{Deserialize, Serialize};

use crate::{PlayoutError, Result};

/// What the resequencer does with a frame that arrives after a later frame
/// has already been emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "snake_case")]
pub enum LateFramePolicy {
    /// Emit it immediately, flagged as a discontinuity
    #[default]
    Emit,
    /// Drop it so delivered presentation times never go backwards
    Drop,
}

/// Tunables for a [`Pipeline`](crate::Pipeline).
///
/// Every field has a default, so a YAML document only needs the fields it
/// overrides:
///
/// ```rust
/// use playout::{LateFramePolicy, PipelineConfig};
///
/// let config = PipelineConfig::from_yaml("reorder_window: 6\nlate_frame_policy: drop\n")?;
/// assert_eq!(config.reorder_window, 6);
/// assert_eq!(config.late_frame_policy, LateFramePolicy::Drop);
/// assert_eq!(config.max_pending_deliveries, 32);
/// # Ok::<(), playout::PlayoutError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Frames held before the earliest is forced out. Covers B-frame depth.
    pub reorder_window: usize,

    /// How far, in nominal frame intervals, a timestamp may fall below the
    /// highest one seen before it is treated as non-monotonic.
    pub timestamp_slack_frames: u32,

    pub late_frame_policy: LateFramePolicy,

    /// Ordered frames allowed to wait for the renderer before intake drops
    pub max_pending_deliveries: usize,

    /// Used when the stream does not declare a usable frame rate
    pub default_frame_rate: f64,

    /// Buffered events per subscriber before the slowest ones lag
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reorder_window: 4,
            timestamp_slack_frames: 8,
            late_frame_policy: LateFramePolicy::Emit,
            max_pending_deliveries: 32,
            default_frame_rate: 30.0,
            event_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reorder_window == 0 {
            return Err(PlayoutError::invalid_config("reorder_window must be at least 1"));
        }
        if !(self.default_frame_rate.is_finite() && self.default_frame_rate > 0.0) {
            return Err(PlayoutError::invalid_config(format!(
                "default_frame_rate must be positive, got {}",
                self.default_frame_rate
            )));
        }
        if self.event_capacity == 0 {
            return Err(PlayoutError::invalid_config("event_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window;
        self
    }

    pub fn with_late_frame_policy(mut self, policy: LateFramePolicy) -> Self {
        self.late_frame_policy = policy;
        self
    }

    pub fn with_timestamp_slack_frames(mut self, frames: u32) -> Self {
        self.timestamp_slack_frames = frames;
        self
    }

    pub fn with_max_pending_deliveries(mut self, pending: usize) -> Self {
        self.max_pending_deliveries = pending;
        self
    }

    pub fn with_default_frame_rate(mut self, fps: f64) -> Self {
        self.default_frame_rate = fps;
        self
    }

    /// Total frames a pipeline may hold between intake and the renderer.
    pub fn pending_capacity(&self) -> usize {
        self.reorder_window + self.max_pending_deliveries
    }
}
