//! Frame compositor for blending the watermark onto host frames

use crate::{blend, Result, ScaledWatermark};
use image::RgbaImage;
use std::sync::Arc;
use wmark_core::timing::cycle_duration;
use wmark_core::{
    Anchor, CompositionConfig, CyclingSchedule, Dimensions, FixedSchedule, PositionScheduler,
    WatermarkMode,
};

/// Where and what was drawn for one host frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Anchor in effect
    pub anchor: Anchor,
    /// Top-left pixel column (may be negative when overhanging)
    pub x: i64,
    /// Top-left pixel row
    pub y: i64,
    /// Index of the watermark frame that was blended
    pub frame_index: usize,
}

/// Blends a prepared watermark onto host frames by playback time
pub struct FrameCompositor {
    watermark: Arc<ScaledWatermark>,
    schedule: Box<dyn PositionScheduler>,
    opacity: f32,
    loop_period: f64,
}

impl FrameCompositor {
    /// Creates a compositor for a host of the given size and duration.
    ///
    /// The schedule is picked once from the watermark mode. Animated
    /// watermarks cycle anchors every native duration, falling back to the
    /// host duration when the watermark reports none. When both are zero the
    /// anchor stays put and the frames loop over their own timestamp span.
    pub fn new(
        watermark: Arc<ScaledWatermark>,
        host: Dimensions,
        host_duration: f64,
        config: &CompositionConfig,
    ) -> Self {
        let mode = watermark.mode();
        let cycle = cycle_duration(watermark.native_duration(), host_duration);
        let schedule: Box<dyn PositionScheduler> = match mode {
            WatermarkMode::Animated => {
                Box::new(CyclingSchedule::new(host, watermark.scale(), cycle))
            }
            WatermarkMode::Static => Box::new(FixedSchedule::new(host)),
        };

        let loop_period = if cycle > 0.0 { cycle } else { watermark.span() };

        Self {
            opacity: config.opacity_for(mode) as f32,
            loop_period,
            watermark,
            schedule,
        }
    }

    pub fn watermark(&self) -> &ScaledWatermark {
        &self.watermark
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Period the watermark frames loop over, in seconds
    pub fn loop_period(&self) -> f64 {
        self.loop_period
    }

    /// Resolves the placement at time `t` without touching any pixels
    pub fn placement_at(&self, t: f64) -> Placement {
        let (frame_index, _) = self.watermark.frame_at(t, self.loop_period);
        let anchor = self.schedule.anchor_at(t);
        let (x, y) = self.schedule.offset_at(t, self.watermark.size()).to_pixels();
        Placement {
            anchor,
            x,
            y,
            frame_index,
        }
    }

    /// Blends the watermark onto `frame` for host time `t` (seconds)
    pub fn composite(&self, frame: &mut RgbaImage, t: f64) -> Result<Placement> {
        let placement = self.placement_at(t);
        let (_, masked) = self.watermark.frame_at(t, self.loop_period);
        blend::overlay_masked(
            frame,
            &masked.image,
            &masked.mask,
            self.opacity,
            placement.x,
            placement.y,
        )?;
        Ok(placement)
    }
}
