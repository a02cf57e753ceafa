//! Stream metadata handed to the pipeline at session start

use serde::{Deserialize, Serialize};

use super::TimeBase;
use crate::{PlayoutError, Result};

/// Compressed format of the video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum EncodeFormat {
    #[default]
    H264,
    H265,
}

/// Display rotation carried from container metadata to the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// Map a container rotation in degrees onto a quarter turn.
    ///
    /// Values are normalized into `0..360`; anything that is not a multiple
    /// of 90 is rejected.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Clockwise180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }
}

/// Describes the video stream a session will play.
///
/// Produced by the demuxer when a stream is opened. The time base and
/// dimensions are required; everything else has a usable default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SourceDescriptor {
    /// Time base the decoder's timestamps are expressed in
    pub time_base: Option<TimeBase>,

    /// Coded width in pixels
    pub width: Option<u32>,

    /// Coded height in pixels
    pub height: Option<u32>,

    /// Declared frame rate, used for the nominal inter-frame interval
    pub frame_rate: Option<f64>,

    /// Encode format tag
    pub format: EncodeFormat,

    /// Display rotation
    pub rotation: Rotation,

    /// Codec configuration record (avcC / hvcC), opaque to the pipeline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_data: Vec<u8>,
}

impl SourceDescriptor {
    /// Create a descriptor with the required fields filled in.
    pub fn new(time_base: TimeBase, width: u32, height: u32) -> Self {
        Self {
            time_base: Some(time_base),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn with_format(mut self, format: EncodeFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_extra_data(mut self, extra_data: impl Into<Vec<u8>>) -> Self {
        self.extra_data = extra_data.into();
        self
    }

    /// Check the metadata required to start a session is present.
    pub fn validate(&self) -> Result<()> {
        match self.time_base {
            None => return Err(PlayoutError::configuration("time_base", "missing")),
            Some(tb) if !tb.is_valid() => {
                return Err(PlayoutError::configuration(
                    "time_base",
                    format!("{tb} cannot convert ticks"),
                ));
            }
            Some(_) => {}
        }

        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok(()),
            (None, _) => Err(PlayoutError::configuration("width", "missing")),
            (_, None) => Err(PlayoutError::configuration("height", "missing")),
            (Some(w), Some(h)) => {
                Err(PlayoutError::configuration("dimensions", format!("{w}x{h} is empty")))
            }
        }
    }

    /// Nominal seconds between frames, if the declared rate is usable.
    pub fn frame_interval(&self) -> Option<f64> {
        self.frame_rate.filter(|fps| fps.is_finite() && *fps > 0.0).map(|fps| 1.0 / fps)
    }
}
