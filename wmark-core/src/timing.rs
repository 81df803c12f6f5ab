//! Loop timing for watermarks shorter than the host

/// Length of one watermark cycle in seconds.
///
/// Falls back to the host duration when the watermark reports no duration,
/// so callers never divide by zero on a well-formed host.
pub fn cycle_duration(watermark_duration: f64, host_duration: f64) -> f64 {
    if watermark_duration.is_finite() && watermark_duration > 0.0 {
        watermark_duration
    } else {
        host_duration
    }
}

/// Wraps `t` into `[0, period)`. Non-positive periods leave `t` untouched.
pub fn wrap_time(t: f64, period: f64) -> f64 {
    if period.is_finite() && period > 0.0 {
        t.rem_euclid(period)
    } else {
        t
    }
}

/// Index of the frame on screen at time `t`, given ascending presentation
/// timestamps. Times before the first frame select frame 0.
pub fn frame_index_at(timestamps: &[f64], t: f64) -> usize {
    timestamps.partition_point(|&ts| ts <= t).saturating_sub(1)
}

/// Expected number of frames for a duration at the given frame rate
pub fn estimated_frame_count(duration_secs: f64, fps: f64) -> u64 {
    if duration_secs > 0.0 && fps > 0.0 {
        (duration_secs * fps).round() as u64
    } else {
        0
    }
}
