//! Time-based watermark position scheduling
//!
//! Positions are pure functions of playback time. Nothing here keeps a
//! "current anchor" around, so any frame range can be scheduled on its own.

use crate::Dimensions;

/// Horizontal placement of an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum HorizontalAnchor {
    Left,
    Center,
    Right,
}

/// Vertical placement of an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VerticalAnchor {
    Top,
    Center,
    Bottom,
}

/// A named screen position that resolves to a pixel offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Anchor {
    pub x: HorizontalAnchor,
    pub y: VerticalAnchor,
}

/// Anchors visited by animated watermarks, in order
pub const ANIMATED_ANCHORS: [Anchor; 3] = [
    Anchor::new(HorizontalAnchor::Left, VerticalAnchor::Top),
    Anchor::new(HorizontalAnchor::Right, VerticalAnchor::Center),
    Anchor::new(HorizontalAnchor::Left, VerticalAnchor::Bottom),
];

/// Anchor used by static watermarks
pub const STATIC_ANCHOR: Anchor = Anchor::new(HorizontalAnchor::Right, VerticalAnchor::Bottom);

/// Fraction of the host width kept free around a static watermark
pub const STATIC_PADDING_RATIO: f64 = 0.02;

impl Anchor {
    /// Creates a new anchor
    pub const fn new(x: HorizontalAnchor, y: VerticalAnchor) -> Self {
        Self { x, y }
    }

    /// Resolves the anchor to a top-left offset.
    ///
    /// `inset` is applied on edge-aligned axes only; centered axes ignore it.
    pub fn resolve(&self, host: Dimensions, watermark: Dimensions, inset: f64) -> Offset {
        let free_w = host.width as f64 - watermark.width as f64;
        let free_h = host.height as f64 - watermark.height as f64;

        let x = match self.x {
            HorizontalAnchor::Left => inset,
            HorizontalAnchor::Center => free_w / 2.0,
            HorizontalAnchor::Right => free_w - inset,
        };
        let y = match self.y {
            VerticalAnchor::Top => inset,
            VerticalAnchor::Center => free_h / 2.0,
            VerticalAnchor::Bottom => free_h - inset,
        };

        Offset { x, y }
    }

    /// Human-readable name such as `left-top`
    pub fn name(&self) -> &'static str {
        use HorizontalAnchor as H;
        use VerticalAnchor as V;
        match (self.x, self.y) {
            (H::Left, V::Top) => "left-top",
            (H::Left, V::Center) => "left-center",
            (H::Left, V::Bottom) => "left-bottom",
            (H::Center, V::Top) => "center-top",
            (H::Center, V::Center) => "center",
            (H::Center, V::Bottom) => "center-bottom",
            (H::Right, V::Top) => "right-top",
            (H::Right, V::Center) => "right-center",
            (H::Right, V::Bottom) => "right-bottom",
        }
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sub-pixel top-left offset of the watermark within the host frame
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

impl Offset {
    /// Truncates toward zero to whole pixels. May be negative when the
    /// watermark overhangs.
    pub fn to_pixels(&self) -> (i64, i64) {
        (self.x.trunc() as i64, self.y.trunc() as i64)
    }
}

/// Index into [`ANIMATED_ANCHORS`] for playback time `t`.
///
/// Negative or non-finite times and non-positive cycle lengths map to the
/// first anchor.
pub fn anchor_index(t: f64, cycle_duration: f64) -> usize {
    if !(cycle_duration > 0.0) || !t.is_finite() || t < 0.0 {
        return 0;
    }
    let cycle = (t / cycle_duration).floor() as u64;
    (cycle % ANIMATED_ANCHORS.len() as u64) as usize
}

/// Maps playback time to a watermark position
pub trait PositionScheduler: Send + Sync {
    /// Anchor in effect at time `t` (seconds)
    fn anchor_at(&self, t: f64) -> Anchor;

    /// Distance kept from edge-aligned sides, in pixels
    fn inset(&self) -> f64;

    /// Host frame size the schedule was built for
    fn host(&self) -> Dimensions;

    /// Top-left offset at time `t` for a watermark of the given size
    fn offset_at(&self, t: f64, watermark: Dimensions) -> Offset {
        self.anchor_at(t).resolve(self.host(), watermark, self.inset())
    }
}

/// Animated schedule: hops to the next anchor at every watermark cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclingSchedule {
    host: Dimensions,
    cycle_duration: f64,
    margin: f64,
}

impl CyclingSchedule {
    /// Creates a schedule for the given host, scale and cycle length.
    ///
    /// The margin is `min(W, H) * scale / 4`, so the inset grows with the
    /// watermark.
    pub fn new(host: Dimensions, scale: f64, cycle_duration: f64) -> Self {
        let margin = (host.min_side() as f64 * (scale / 4.0)).max(0.0);
        Self {
            host,
            cycle_duration,
            margin,
        }
    }

    pub fn cycle_duration(&self) -> f64 {
        self.cycle_duration
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Index of the anchor in [`ANIMATED_ANCHORS`] at time `t`
    pub fn anchor_index_at(&self, t: f64) -> usize {
        anchor_index(t, self.cycle_duration)
    }
}

impl PositionScheduler for CyclingSchedule {
    fn anchor_at(&self, t: f64) -> Anchor {
        ANIMATED_ANCHORS[self.anchor_index_at(t)]
    }

    fn inset(&self) -> f64 {
        self.margin
    }

    fn host(&self) -> Dimensions {
        self.host
    }
}

/// Static schedule: always the bottom-right corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSchedule {
    host: Dimensions,
    padding: f64,
}

impl FixedSchedule {
    /// Creates a schedule with `padding = W * 0.02`
    pub fn new(host: Dimensions) -> Self {
        Self {
            host,
            padding: host.width as f64 * STATIC_PADDING_RATIO,
        }
    }

    pub fn padding(&self) -> f64 {
        self.padding
    }
}

impl PositionScheduler for FixedSchedule {
    fn anchor_at(&self, _t: f64) -> Anchor {
        STATIC_ANCHOR
    }

    fn inset(&self) -> f64 {
        self.padding
    }

    fn host(&self) -> Dimensions {
        self.host
    }
}
