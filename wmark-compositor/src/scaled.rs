//! Watermarks resized for one host resolution, with precomputed masks

use crate::{AlphaMask, Result, WatermarkAsset};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use wmark_core::timing::{frame_index_at, wrap_time};
use wmark_core::{Dimensions, GeometryResolver, WatermarkMode};

/// A resized watermark frame and its opacity mask
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedFrame {
    pub image: RgbaImage,
    pub mask: AlphaMask,
}

/// Watermark resized for a host, ready to blend.
///
/// Built once per session (or once per cache key) and never mutated.
#[derive(Debug, Clone)]
pub struct ScaledWatermark {
    mode: WatermarkMode,
    scale: f64,
    native: Dimensions,
    size: Dimensions,
    native_duration: f64,
    timestamps: Vec<f64>,
    frames: Vec<MaskedFrame>,
}

impl ScaledWatermark {
    /// Resolves geometry against `host`, resizes every frame and derives
    /// its mask.
    pub fn prepare(asset: &WatermarkAsset, host: Dimensions, scale: f64) -> Result<Self> {
        let native = asset.native_dimensions();
        let size = GeometryResolver::new(asset.mode(), scale).resolve(host, native)?;

        let (timestamps, frames): (Vec<f64>, Vec<MaskedFrame>) = match asset {
            WatermarkAsset::Animated { frames, .. } => frames
                .iter()
                .map(|frame| {
                    let image = resize(&frame.image, size);
                    let mask = AlphaMask::from_luminance(&image);
                    (frame.timestamp, MaskedFrame { image, mask })
                })
                .unzip(),
            WatermarkAsset::Static { image, has_alpha } => {
                let image = resize(image, size);
                let mask = if *has_alpha {
                    AlphaMask::from_alpha_channel(&image)
                } else {
                    AlphaMask::opaque(size.width, size.height)
                };
                (vec![0.0], vec![MaskedFrame { image, mask }])
            }
        };

        // Timestamps become relative to the first frame.
        let origin = timestamps.first().copied().unwrap_or(0.0);
        let timestamps = timestamps.into_iter().map(|t| t - origin).collect();

        Ok(Self {
            mode: asset.mode(),
            scale,
            native,
            size,
            native_duration: asset.duration(),
            timestamps,
            frames,
        })
    }

    pub fn mode(&self) -> WatermarkMode {
        self.mode
    }

    /// Scale factor the geometry was resolved with
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Size before scaling
    pub fn native(&self) -> Dimensions {
        self.native
    }

    /// Size on screen
    pub fn size(&self) -> Dimensions {
        self.size
    }

    /// Duration reported by the source; zero for stills or unknown
    pub fn native_duration(&self) -> f64 {
        self.native_duration
    }

    /// Time covered by the decoded frames: the last timestamp plus one frame
    /// interval. Zero for a single frame.
    pub fn span(&self) -> f64 {
        match self.timestamps.as_slice() {
            [.., before, last] => last + (last - before),
            _ => 0.0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[MaskedFrame] {
        &self.frames
    }

    /// Frame shown at host time `t`, wrapping modulo `period`
    pub fn frame_at(&self, t: f64, period: f64) -> (usize, &MaskedFrame) {
        let index = match self.mode {
            WatermarkMode::Static => 0,
            WatermarkMode::Animated => frame_index_at(&self.timestamps, wrap_time(t, period)),
        };
        let index = index.min(self.frames.len().saturating_sub(1));
        (index, &self.frames[index])
    }
}

fn resize(image: &RgbaImage, size: Dimensions) -> RgbaImage {
    if image.dimensions() == (size.width, size.height) {
        return image.clone();
    }
    imageops::resize(image, size.width, size.height, FilterType::Triangle)
}
