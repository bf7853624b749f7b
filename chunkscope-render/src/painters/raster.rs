//! Spike raster: one row of ticks per unit.

use serde::{Deserialize, Serialize};

use super::Painter;
use crate::engine::{Interrupted, PaintContext};
use crate::options::RenderOptions;
use crate::surface::{Rgba, Surface, TextAlign, TextBaseline, TextLabel};
use crate::util::usize_to_f64;

/// Spikes of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterPlot {
    /// Unit identifier, shown as the row label.
    pub unit_id: i64,
    /// Tick color.
    #[serde(default)]
    pub color: Rgba,
    /// Spike times in seconds.
    pub spike_times_sec: Vec<f64>,
}

/// Raster rows, bottom row first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RasterData {
    /// One entry per unit.
    pub plots: Vec<RasterPlot>,
}

/// Paints [`RasterData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterPainter;

/// Half-width of a spike tick in pixels.
const TICK_HALF_WIDTH: f64 = 2.0;

impl Painter for RasterPainter {
    type Data = RasterData;

    fn zoom_message(&self) -> &str {
        "Zoom in (mouse-wheel) to view raster plot"
    }

    fn paint(
        &mut self,
        surface: &mut dyn Surface,
        opts: &RenderOptions,
        data: &RasterData,
        ctx: &mut PaintContext<'_>,
    ) -> Result<(), Interrupted> {
        let n = data.plots.len();
        if n == 0 {
            return Ok(());
        }
        let width = f64::from(opts.canvas_width);
        let pixels_per_unit = f64::from(opts.canvas_height) / usize_to_f64(n);
        let rows: Vec<f64> = (0..n).map(|i| opts.row_to_y(i, n)).collect();

        // labels sit in the margins, outside the clip
        for pass in 1..=3 {
            for (plot, &y) in data.plots.iter().zip(&rows) {
                let hovered = opts.hovered_unit_id == Some(plot.unit_id);
                let selected = opts.is_selected(plot.unit_id);
                let drawn = match pass {
                    1 => pixels_per_unit >= 10.0,
                    2 => selected,
                    _ => hovered,
                };
                if !drawn {
                    continue;
                }
                let color = if pass == 2 { Rgba::BLACK } else { plot.color };
                let text = plot.unit_id.to_string();
                surface.fill_text(
                    TextLabel::new(text.clone(), opts.margins.left - 4.0, y, color)
                        .with_bold(pass > 1)
                        .anchored(TextAlign::Right, TextBaseline::Middle),
                );
                if pass == 3 || (pass == 2 && hovered) {
                    surface.fill_text(
                        TextLabel::new(text, width - opts.margins.right + 4.0, y, color)
                            .with_bold(true)
                            .anchored(TextAlign::Left, TextBaseline::Middle),
                    );
                }
            }
        }

        let plot_rect = opts.plot_rect();
        surface.set_clip(Some(plot_rect));

        for (plot, &y) in data.plots.iter().zip(&rows) {
            if opts.is_selected(plot.unit_id) {
                surface.stroke_line(0.0, y, width, y, 3.0, Rgba::LIGHT_BLUE);
            }
        }
        for (plot, &y) in data.plots.iter().zip(&rows) {
            if opts.hovered_unit_id == Some(plot.unit_id) {
                surface.stroke_line(0.0, y, width, y, 3.0, Rgba::YELLOW);
                surface.stroke_line(0.0, y, width, y, 1.0, Rgba::GRAY);
            }
        }

        let line_width = (pixels_per_unit / 2.0).clamp(3.0, 20.0);
        for (plot, &y) in data.plots.iter().zip(&rows) {
            for &t in &plot.spike_times_sec {
                ctx.checkpoint()?;
                let x = opts.time_to_x(t);
                if x + TICK_HALF_WIDTH < plot_rect.x || x - TICK_HALF_WIDTH > plot_rect.right() {
                    continue;
                }
                surface.stroke_line(
                    x - TICK_HALF_WIDTH,
                    y,
                    x + TICK_HALF_WIDTH,
                    y,
                    line_width,
                    plot.color,
                );
            }
        }
        surface.set_clip(None);
        Ok(())
    }
}
