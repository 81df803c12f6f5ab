//! Watermark geometry resolution

use crate::{Error, Result, WatermarkMode};

/// Pixel dimensions of a frame or watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dimensions {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either side is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Length of the shorter side
    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Unrounded animated-mode width.
///
/// The third candidate enlarges the watermark on very wide or very tall hosts
/// so it stays legible.
pub fn animated_target_width(host: Dimensions, scale: f64) -> f64 {
    let w = host.width as f64;
    let h = host.height as f64;
    (w * scale).max(h * scale).max((w + h) * scale * 0.75)
}

/// Unrounded static-mode width: a fixed fraction of the host width.
pub fn static_target_width(host: Dimensions, scale: f64) -> f64 {
    host.width as f64 * scale
}

/// Resolves the on-screen watermark size for one compositing session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryResolver {
    mode: WatermarkMode,
    scale: f64,
}

impl GeometryResolver {
    /// Creates a resolver for the given mode and scale factor
    pub fn new(mode: WatermarkMode, scale: f64) -> Self {
        Self { mode, scale }
    }

    pub fn mode(&self) -> WatermarkMode {
        self.mode
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Target width before rounding
    pub fn target_width(&self, host: Dimensions) -> f64 {
        match self.mode {
            WatermarkMode::Animated => animated_target_width(host, self.scale),
            WatermarkMode::Static => static_target_width(host, self.scale),
        }
    }

    /// Computes the scaled watermark size, preserving the native aspect ratio.
    ///
    /// Fails with [`Error::DegenerateGeometry`] if either side rounds to zero.
    pub fn resolve(&self, host: Dimensions, native: Dimensions) -> Result<Dimensions> {
        let width = round_to_pixels(self.target_width(host));
        if width == 0 || native.is_empty() {
            return Err(Error::DegenerateGeometry { width, height: 0 });
        }

        let height = round_to_pixels(width as f64 * native.height as f64 / native.width as f64);
        if height == 0 {
            return Err(Error::DegenerateGeometry { width, height });
        }

        Ok(Dimensions::new(width, height))
    }
}

/// Rounds to the nearest pixel count. NaN and negatives become zero.
fn round_to_pixels(value: f64) -> u32 {
    value.round() as u32
}
