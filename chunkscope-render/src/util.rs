//! Numeric conversion utilities for chunkscope-render.
//!
//! These functions handle conversions between numeric types with explicit
//! handling of precision loss and bounds checking.

/// Convert usize to f64 with allowed precision loss.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

/// Convert f64 to u8 with clamping to [0, 255].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn f64_to_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0).round() as u8
}

/// Convert f64 to i64 with saturation; NaN maps to 0.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f64_to_i64(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(-9.0e15, 9.0e15) as i64
}

/// Convert a pixel coordinate to a buffer index in `0..=max`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn pixel_clamped(value: f64, max: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    value.min(f64::from(max)) as u32
}
