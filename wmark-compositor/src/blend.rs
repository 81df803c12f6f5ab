//! Masked alpha blending of a watermark onto a host frame

use crate::{AlphaMask, Error, Result};
use image::RgbaImage;

/// Blends `overlay` onto `base` with its top-left corner at (x, y).
///
/// Each covered pixel becomes `dst * (1 - a) + src * a` with
/// `a = mask * opacity`. The overlay is clipped to the base bounds and the
/// base alpha channel is left untouched. Returns the number of rows written.
pub fn overlay_masked(
    base: &mut RgbaImage,
    overlay: &RgbaImage,
    mask: &AlphaMask,
    opacity: f32,
    x: i64,
    y: i64,
) -> Result<u32> {
    if mask.width() != overlay.width() || mask.height() != overlay.height() {
        return Err(Error::MaskSizeMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            frame_width: overlay.width(),
            frame_height: overlay.height(),
        });
    }

    let base_width = base.width() as i64;
    let base_height = base.height() as i64;
    let overlay_width = overlay.width() as i64;
    let overlay_height = overlay.height() as i64;

    // Calculate the region to copy
    let src_x_start = 0.max(-x);
    let src_y_start = 0.max(-y);
    let src_x_end = overlay_width.min(base_width - x);
    let src_y_end = overlay_height.min(base_height - y);

    if src_x_start >= src_x_end || src_y_start >= src_y_end || opacity <= 0.0 {
        return Ok(0);
    }

    let base_stride = base_width as usize * 4;
    let overlay_stride = overlay_width as usize * 4;
    let span = (src_x_end - src_x_start) as usize;
    let base_raw: &mut [u8] = &mut **base;
    let overlay_raw = overlay.as_raw();

    for src_y in src_y_start..src_y_end {
        let dest_y = (y + src_y) as usize;
        let dest_x = (x + src_x_start) as usize;

        let dst_start = dest_y * base_stride + dest_x * 4;
        let src_start = src_y as usize * overlay_stride + src_x_start as usize * 4;

        let dst_row = &mut base_raw[dst_start..dst_start + span * 4];
        let src_row = &overlay_raw[src_start..src_start + span * 4];
        let mask_row = &mask.row(src_y as u32)[src_x_start as usize..src_x_start as usize + span];

        blend_row(dst_row, src_row, mask_row, opacity);
    }

    Ok((src_y_end - src_y_start) as u32)
}

fn blend_row(dst: &mut [u8], src: &[u8], mask: &[f32], opacity: f32) {
    for ((d, s), &m) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)).zip(mask) {
        let a = m * opacity;
        if a <= 0.0 {
            continue;
        }
        let inv = 1.0 - a;
        for c in 0..3 {
            d[c] = (d[c] as f32 * inv + s[c] as f32 * a).round() as u8;
        }
    }
}
