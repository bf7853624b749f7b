//! Numeric conversion utilities.
//!
//! These functions handle conversions between numeric types with explicit
//! handling of precision loss and bounds checking.

/// Convert usize to f64 with allowed precision loss.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

/// Convert u64 to f64 with allowed precision loss.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn u64_to_f64(value: u64) -> f64 {
    value as f64
}

/// Convert usize to u64 (lossless on every supported target).
#[must_use]
pub fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Convert u64 to usize, saturating on 32-bit targets.
#[must_use]
pub fn u64_to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Convert f64 to usize with bounds checking.
///
/// Returns `None` if the value is not finite, negative, or >= `max_exclusive`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn f64_to_usize_bounded(value: f64, max_exclusive: usize) -> Option<usize> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value >= usize_to_f64(max_exclusive) {
        return None;
    }
    Some(value as usize)
}

/// Convert f64 to usize, clamping into `[0, max]`. NaN maps to 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn f64_to_usize_clamped(value: f64, max: usize) -> usize {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    if value >= usize_to_f64(max) {
        return max;
    }
    (value as usize).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_conversion_rejects_out_of_range() {
        assert_eq!(f64_to_usize_bounded(3.7, 10), Some(3));
        assert_eq!(f64_to_usize_bounded(-0.1, 10), None);
        assert_eq!(f64_to_usize_bounded(10.0, 10), None);
        assert_eq!(f64_to_usize_bounded(f64::NAN, 10), None);
    }

    #[test]
    fn clamped_conversion() {
        assert_eq!(f64_to_usize_clamped(-5.0, 10), 0);
        assert_eq!(f64_to_usize_clamped(f64::NAN, 10), 0);
        assert_eq!(f64_to_usize_clamped(4.2, 10), 4);
        assert_eq!(f64_to_usize_clamped(1e30, 10), 10);
    }
}
