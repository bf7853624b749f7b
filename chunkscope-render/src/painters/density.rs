//! Heat map of a binned matrix (spike density or spectrogram).

use serde::{Deserialize, Serialize};

use super::Painter;
use crate::engine::{Interrupted, PaintContext};
use crate::options::RenderOptions;
use crate::surface::{Rect, Rgba, Surface, TextAlign, TextBaseline, TextLabel};
use crate::util::usize_to_f64;

/// Time-binned values, stored bin-major: `values[bin * num_rows + row]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensityData {
    /// Left edge of bin 0.
    pub start_time_sec: f64,
    /// Bin duration.
    pub bin_size_sec: f64,
    /// Number of time bins.
    pub num_bins: usize,
    /// Number of rows (units or frequency bands).
    pub num_rows: usize,
    /// Bin-major values.
    pub values: Vec<f64>,
}

impl DensityData {
    /// Value at `(bin, row)`.
    #[must_use]
    pub fn get(&self, bin: usize, row: usize) -> Option<f64> {
        if row >= self.num_rows {
            return None;
        }
        self.values.get(bin * self.num_rows + row).copied()
    }

    /// Largest finite value, 0 when empty.
    #[must_use]
    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

/// Paints [`DensityData`] through the colormap in the options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityPainter;

impl Painter for DensityPainter {
    type Data = DensityData;

    fn paint(
        &mut self,
        surface: &mut dyn Surface,
        opts: &RenderOptions,
        data: &DensityData,
        ctx: &mut PaintContext<'_>,
    ) -> Result<(), Interrupted> {
        if data.num_rows == 0 || data.num_bins == 0 {
            return Ok(());
        }
        let plot_rect = opts.plot_rect();
        let row_height = plot_rect.height / usize_to_f64(data.num_rows);

        if row_height >= 10.0 {
            for row in 0..data.num_rows {
                surface.fill_text(
                    TextLabel::new(
                        row.to_string(),
                        opts.margins.left - 4.0,
                        opts.row_to_y(row, data.num_rows),
                        Rgba::BLACK,
                    )
                    .anchored(TextAlign::Right, TextBaseline::Middle),
                );
            }
        }

        let max = data.max_value();
        let x_start = opts.time_to_x(data.start_time_sec);
        let bin_px = opts.time_to_x(data.start_time_sec + data.bin_size_sec) - x_start;
        surface.set_clip(Some(plot_rect));
        for bin in 0..data.num_bins {
            let x0 = x_start + usize_to_f64(bin) * bin_px;
            let x1 = x0 + bin_px;
            if x1 < plot_rect.x || x0 > plot_rect.right() {
                continue;
            }
            for row in 0..data.num_rows {
                ctx.checkpoint()?;
                let Some(value) = data.get(bin, row) else {
                    continue;
                };
                // zero bins stay blank
                if value.is_nan() || value <= 0.0 {
                    continue;
                }
                let y = opts.row_to_y(row, data.num_rows);
                let color = opts.colormap.apply_scaled(value, max, opts.log_scale);
                surface.fill_rect(
                    Rect::from_corners(x0, y - row_height / 2.0, x1, y + row_height / 2.0),
                    color,
                );
            }
        }
        surface.set_clip(None);
        Ok(())
    }
}
