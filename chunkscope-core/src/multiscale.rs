//! Downsample factor selection for multiscale arrays.

use crate::util::usize_to_f64;

/// Pick the downsample factor to display `range_len` full-resolution bins on
/// `target_px` pixels.
///
/// Factors are walked in ascending order starting from full resolution (1),
/// advancing while the next factor still yields more than `target_px / 2`
/// bins. The result is therefore the coarsest factor that keeps more than
/// half a bin per pixel, or 1 when no factor qualifies.
#[must_use]
pub fn select_downsample_factor(factors: &[u32], range_len: usize, target_px: usize) -> u32 {
    let mut ladder: Vec<u32> = factors.iter().copied().filter(|&f| f > 1).collect();
    ladder.sort_unstable();
    ladder.dedup();

    let half = usize_to_f64(target_px) / 2.0;
    let range_len = usize_to_f64(range_len);
    let mut chosen = 1;
    for factor in ladder {
        if range_len / f64::from(factor) > half {
            chosen = factor;
        } else {
            break;
        }
    }
    chosen
}

/// Dataset name of a downsampled sibling, e.g. `spike_counts_ds_10`.
#[must_use]
pub fn downsampled_name(base: &str, separator: &str, factor: u32) -> String {
    if factor <= 1 {
        base.to_string()
    } else {
        format!("{base}{separator}{factor}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_resolution_when_range_is_small() {
        assert_eq!(select_downsample_factor(&[1, 3, 9, 27], 800, 1000), 1);
        assert_eq!(select_downsample_factor(&[], 1_000_000, 1000), 1);
    }

    #[test]
    fn picks_coarsest_that_keeps_resolution() {
        // 100_000 / 81 = 1234 > 500, 100_000 / 243 = 411 <= 500
        let factors = [3, 9, 27, 81, 243, 729];
        assert_eq!(select_downsample_factor(&factors, 100_000, 1000), 81);
        // unsorted and duplicated input
        assert_eq!(select_downsample_factor(&[243, 3, 81, 9, 9, 27], 100_000, 1000), 81);
    }

    #[test]
    fn fractional_bins_count_at_the_boundary() {
        // 10 / 3 = 3.33 bins is more than 6 / 2 = 3
        assert_eq!(select_downsample_factor(&[3], 10, 6), 3);
        // but not more than 7 / 2 = 3.5
        assert_eq!(select_downsample_factor(&[3], 10, 7), 1);
        // exactly half a bin per pixel does not qualify
        assert_eq!(select_downsample_factor(&[3, 9], 90, 20), 3);
        assert_eq!(select_downsample_factor(&[3], 30, 20), 1);
    }

    #[test]
    fn names() {
        assert_eq!(downsampled_name("spike_counts", "_ds_", 1), "spike_counts");
        assert_eq!(downsampled_name("spike_counts", "_ds_", 10), "spike_counts_ds_10");
    }
}
