//! Loading and probing of host videos and watermark assets

use crate::video_reader::VideoReader;
use crate::{Error, Result};
use image::ImageFormat;
use std::path::Path;
use tracing::debug;
use wmark_compositor::WatermarkAsset;
use wmark_core::{Dimensions, WatermarkMode};

/// Metadata of a host video
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    pub dimensions: Dimensions,
    /// Duration in seconds (zero if the container does not say)
    pub duration: f64,
    /// Frame rate as numerator and denominator
    pub frame_rate: (i32, i32),
    pub time_base: (i32, i32),
    pub has_audio: bool,
}

impl HostInfo {
    pub fn fps(&self) -> f64 {
        let (num, den) = self.frame_rate;
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }
}

/// Metadata of a watermark asset at native resolution
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkInfo {
    pub mode: WatermarkMode,
    pub dimensions: Dimensions,
    /// Native duration in seconds, zero for still images
    pub duration: f64,
    pub frame_count: usize,
}

/// Picks the watermark mode from the file extension.
///
/// Anything the `image` crate recognises as a still-image extension is
/// static; everything else is treated as video.
pub fn watermark_mode_for(path: &Path) -> WatermarkMode {
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Gif) | Err(_) => WatermarkMode::Animated,
        Ok(_) => WatermarkMode::Static,
    }
}

/// Decodes a watermark asset into memory
pub fn load_watermark(path: &Path) -> Result<WatermarkAsset> {
    match watermark_mode_for(path) {
        WatermarkMode::Static => load_still(path),
        WatermarkMode::Animated => load_animation(path),
    }
}

fn load_still(path: &Path) -> Result<WatermarkAsset> {
    let image = image::open(path).map_err(|e| Error::asset_open(path, e))?;
    let has_alpha = image.color().has_alpha();
    let rgba = image.to_rgba8();
    debug!(
        path = %path.display(),
        width = rgba.width(),
        height = rgba.height(),
        has_alpha,
        "Loaded still watermark"
    );
    Ok(WatermarkAsset::still(rgba, has_alpha))
}

fn load_animation(path: &Path) -> Result<WatermarkAsset> {
    let mut reader = VideoReader::open(path)?;
    let duration = reader.duration_secs();
    let frames = reader.read_frames()?;
    debug!(
        path = %path.display(),
        frames = frames.len(),
        duration,
        "Loaded animated watermark"
    );
    WatermarkAsset::animated(frames, duration).map_err(|e| Error::from_compositor(e, path))
}

/// Reads host metadata without decoding any frames
pub fn probe_host(path: &Path) -> Result<HostInfo> {
    let reader = VideoReader::open(path)?;
    let frame_rate = reader.frame_rate();
    let time_base = reader.time_base();
    Ok(HostInfo {
        dimensions: reader.dimensions(),
        duration: reader.duration_secs(),
        frame_rate: (frame_rate.numerator(), frame_rate.denominator()),
        time_base: (time_base.numerator(), time_base.denominator()),
        has_audio: reader.has_audio(),
    })
}

/// Reads watermark metadata.
///
/// Video watermarks are decoded in full to count their frames.
pub fn probe_watermark(path: &Path) -> Result<WatermarkInfo> {
    let asset = load_watermark(path)?;
    Ok(WatermarkInfo {
        mode: asset.mode(),
        dimensions: asset.native_dimensions(),
        duration: asset.duration(),
        frame_count: asset.frame_count(),
    })
}
