//! Decoded watermark assets

use crate::{Error, Result};
use image::RgbaImage;
use wmark_core::{Dimensions, WatermarkMode};

/// A decoded watermark frame with its presentation time in seconds
#[derive(Debug, Clone)]
pub struct TimedFrame {
    /// Seconds from the start of the watermark
    pub timestamp: f64,
    /// RGBA pixels at native size
    pub image: RgbaImage,
}

impl TimedFrame {
    pub fn new(timestamp: f64, image: RgbaImage) -> Self {
        Self { timestamp, image }
    }
}

/// Watermark pixels at native resolution, before any scaling
#[derive(Debug, Clone)]
pub enum WatermarkAsset {
    /// Video watermark; looped over the host and cycled between anchors
    Animated {
        frames: Vec<TimedFrame>,
        /// Native duration in seconds as reported by the container (may be 0)
        duration: f64,
    },
    /// Still image watermark
    Static {
        image: RgbaImage,
        /// Whether the source image carried its own alpha channel
        has_alpha: bool,
    },
}

impl WatermarkAsset {
    /// Creates an animated asset, sorting frames by timestamp.
    ///
    /// Fails with [`Error::EmptyWatermark`] if no frames were decoded.
    pub fn animated(mut frames: Vec<TimedFrame>, duration: f64) -> Result<Self> {
        if frames.is_empty() {
            return Err(Error::EmptyWatermark);
        }
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(Self::Animated { frames, duration })
    }

    /// Creates a static asset
    pub fn still(image: RgbaImage, has_alpha: bool) -> Self {
        Self::Static { image, has_alpha }
    }

    pub fn mode(&self) -> WatermarkMode {
        match self {
            WatermarkAsset::Animated { .. } => WatermarkMode::Animated,
            WatermarkAsset::Static { .. } => WatermarkMode::Static,
        }
    }

    /// Size of the first frame at native resolution
    pub fn native_dimensions(&self) -> Dimensions {
        match self {
            WatermarkAsset::Animated { frames, .. } => frames
                .first()
                .map(|f| Dimensions::new(f.image.width(), f.image.height()))
                .unwrap_or(Dimensions::new(0, 0)),
            WatermarkAsset::Static { image, .. } => Dimensions::new(image.width(), image.height()),
        }
    }

    pub fn frame_count(&self) -> usize {
        match self {
            WatermarkAsset::Animated { frames, .. } => frames.len(),
            WatermarkAsset::Static { .. } => 1,
        }
    }

    /// Native duration in seconds; zero for still images
    pub fn duration(&self) -> f64 {
        match self {
            WatermarkAsset::Animated { duration, .. } => *duration,
            WatermarkAsset::Static { .. } => 0.0,
        }
    }
}
