//! wmark Core Library
//!
//! This library provides the pure data model behind watermark compositing:
//! geometry resolution, time-based position scheduling and loop timing.
//! Nothing in here touches pixels or codecs.

pub mod config;
pub mod geometry;
pub mod schedule;
pub mod timing;

pub use config::{CompositionConfig, WatermarkMode};
pub use geometry::{Dimensions, GeometryResolver};
pub use schedule::{
    Anchor, CyclingSchedule, FixedSchedule, HorizontalAnchor, Offset, PositionScheduler,
    VerticalAnchor, ANIMATED_ANCHORS,
};

/// Result type for wmark-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for wmark-core operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Degenerate watermark geometry: {width}x{height}")]
    DegenerateGeometry { width: u32, height: u32 },
}
