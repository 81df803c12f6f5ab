//! Compositing configuration and watermark modes

/// Default global opacity for animated watermarks
pub const DEFAULT_OPACITY: f64 = 0.7;
/// Default scale factor for animated watermarks
pub const DEFAULT_SCALE: f64 = 0.14;
/// Default global opacity for static image watermarks
pub const DEFAULT_STATIC_OPACITY: f64 = 1.0;
/// Default scale factor for static image watermarks (fraction of host width)
pub const DEFAULT_STATIC_SCALE: f64 = 0.15;

/// How the watermark behaves over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WatermarkMode {
    /// Looping video watermark that hops between anchors every cycle
    Animated,
    /// Still image pinned to the bottom-right corner
    Static,
}

impl WatermarkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkMode::Animated => "animated",
            WatermarkMode::Static => "static",
        }
    }
}

impl std::fmt::Display for WatermarkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compositing configuration
///
/// `opacity` and `scale` apply to animated watermarks; static image
/// watermarks use `static_opacity` and `static_scale` instead.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompositionConfig {
    /// Global opacity for animated watermarks (0.0 - 1.0)
    pub opacity: f64,
    /// Scale factor for animated watermarks, relative to host dimensions
    pub scale: f64,
    /// Global opacity for static watermarks (0.0 - 1.0)
    pub static_opacity: f64,
    /// Scale factor for static watermarks, relative to host width
    pub static_scale: f64,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            opacity: DEFAULT_OPACITY,
            scale: DEFAULT_SCALE,
            static_opacity: DEFAULT_STATIC_OPACITY,
            static_scale: DEFAULT_STATIC_SCALE,
        }
    }
}

impl CompositionConfig {
    /// Sets the animated-mode opacity.
    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    /// Sets the animated-mode scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the static-mode opacity.
    pub fn with_static_opacity(mut self, opacity: f64) -> Self {
        self.static_opacity = opacity;
        self
    }

    /// Sets the static-mode scale.
    pub fn with_static_scale(mut self, scale: f64) -> Self {
        self.static_scale = scale;
        self
    }

    /// Scale factor in effect for the given mode
    pub fn scale_for(&self, mode: WatermarkMode) -> f64 {
        match mode {
            WatermarkMode::Animated => self.scale,
            WatermarkMode::Static => self.static_scale,
        }
    }

    /// Opacity in effect for the given mode, clamped to [0, 1].
    ///
    /// NaN is treated as fully opaque.
    pub fn opacity_for(&self, mode: WatermarkMode) -> f64 {
        let raw = match mode {
            WatermarkMode::Animated => self.opacity,
            WatermarkMode::Static => self.static_opacity,
        };
        if raw.is_nan() {
            1.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }

    /// Returns true if the configured opacity for `mode` lies outside [0, 1].
    pub fn opacity_out_of_range(&self, mode: WatermarkMode) -> bool {
        let raw = match mode {
            WatermarkMode::Animated => self.opacity,
            WatermarkMode::Static => self.static_opacity,
        };
        !(0.0..=1.0).contains(&raw)
    }
}
