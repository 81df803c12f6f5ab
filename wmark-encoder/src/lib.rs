//! wmark Encoder Library
//!
//! This library loads host videos and watermark assets with FFmpeg, runs
//! compositing sessions and writes the watermarked result as H.264.

pub mod asset_loader;
pub mod encoder_sink;
pub mod progress_tracker;
pub mod session;
pub mod video_reader;

pub use asset_loader::{load_watermark, probe_host, probe_watermark, HostInfo, WatermarkInfo};
pub use encoder_sink::{EncoderProfile, EncoderSink, SinkConfig, VideoCodec};
pub use session::{AnchorChange, ComposeOptions, ComposeReport, Compositor, SessionState};
pub use video_reader::{DecodedFrame, Demuxed, HostVideo, VideoReader};

use std::path::{Path, PathBuf};

/// Result type for wmark-encoder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the compositing boundary
pub type CompositorError = Error;

/// Error types for wmark-encoder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open asset {path}: {reason}")]
    AssetOpen { path: PathBuf, reason: String },

    #[error("Watermark has no decodable frames: {0}")]
    EmptyWatermark(PathBuf),

    #[error("Degenerate watermark geometry: {width}x{height}")]
    DegenerateGeometry { width: u32, height: u32 },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AssetOpen,
    EmptyWatermark,
    DegenerateGeometry,
    Encode,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AssetOpen => "asset_open",
            ErrorKind::EmptyWatermark => "empty_watermark",
            ErrorKind::DegenerateGeometry => "degenerate_geometry",
            ErrorKind::Encode => "encode",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AssetOpen { .. } => ErrorKind::AssetOpen,
            Error::EmptyWatermark(_) => ErrorKind::EmptyWatermark,
            Error::DegenerateGeometry { .. } => ErrorKind::DegenerateGeometry,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub(crate) fn asset_open(path: &Path, reason: impl std::fmt::Display) -> Self {
        Error::AssetOpen {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Encode(format!("{context}: {err}"))
    }

    /// Classifies a compositor error raised while handling `watermark`
    pub(crate) fn from_compositor(err: wmark_compositor::Error, watermark: &Path) -> Self {
        match err {
            wmark_compositor::Error::EmptyWatermark => Error::EmptyWatermark(watermark.to_path_buf()),
            wmark_compositor::Error::Core(core) => core.into(),
            other => Error::Unexpected(other.to_string()),
        }
    }
}

impl From<wmark_core::Error> for Error {
    fn from(err: wmark_core::Error) -> Self {
        match err {
            wmark_core::Error::DegenerateGeometry { width, height } => {
                Error::DegenerateGeometry { width, height }
            }
        }
    }
}

/// Overlays `watermark` onto `host` and writes the result to `output`.
///
/// `opacity` and `scale` apply to video watermarks; still images use the
/// static defaults (fully opaque, 15% of the host width). On failure no
/// file is left at `output`.
pub fn compose(host: &Path, watermark: &Path, output: &Path, opacity: f64, scale: f64) -> Result<()> {
    let config = wmark_core::CompositionConfig::default()
        .with_opacity(opacity)
        .with_scale(scale);
    let options = ComposeOptions::default().with_config(config);
    Compositor::new(options).compose(host, watermark, output)?;
    Ok(())
}
