//! wmark Compositor Library
//!
//! This library turns decoded watermark frames into scaled, masked overlays
//! and blends them onto host frames.

pub mod alpha;
pub mod asset;
pub mod blend;
pub mod cache;
pub mod frame_compositor;
pub mod scaled;

pub use alpha::AlphaMask;
pub use asset::{TimedFrame, WatermarkAsset};
pub use cache::{CacheKey, WatermarkCache};
pub use frame_compositor::{FrameCompositor, Placement};
pub use scaled::{MaskedFrame, ScaledWatermark};

/// Result type for wmark-compositor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for wmark-compositor operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wmark core error: {0}")]
    Core(#[from] wmark_core::Error),

    #[error("Watermark has no decodable frames")]
    EmptyWatermark,

    #[error("Mask size {mask_width}x{mask_height} does not match frame size {frame_width}x{frame_height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },
}
