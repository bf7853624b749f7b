//! Line and marker series against a value axis.

use serde::{Deserialize, Serialize};

use super::Painter;
use crate::engine::{Interrupted, PaintContext};
use crate::options::RenderOptions;
use crate::surface::{Rect, Rgba, Surface};

/// How a series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    /// Connected line; NaN values break it.
    #[default]
    Line,
    /// Square marker per sample.
    Marker,
}

/// One series of `(time, value)` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    /// Drawing style.
    #[serde(rename = "type", default)]
    pub kind: SeriesKind,
    /// Stroke or fill color.
    #[serde(default)]
    pub color: Rgba,
    /// Line width, or marker radius.
    #[serde(default = "default_width")]
    pub width: f64,
    /// Sample times in seconds.
    pub times: Vec<f64>,
    /// Sample values, same length as `times`.
    pub values: Vec<f64>,
}

fn default_width() -> f64 {
    1.1
}

impl Series {
    /// A line series.
    #[must_use]
    pub fn line(times: Vec<f64>, values: Vec<f64>, color: Rgba) -> Self {
        Self {
            kind: SeriesKind::Line,
            color,
            width: default_width(),
            times,
            values,
        }
    }

    /// A marker series.
    #[must_use]
    pub fn markers(times: Vec<f64>, values: Vec<f64>, color: Rgba, radius: f64) -> Self {
        Self {
            kind: SeriesKind::Marker,
            color,
            width: radius,
            times,
            values,
        }
    }
}

/// Series to draw, in order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesData {
    /// The series.
    pub series: Vec<Series>,
}

/// Paints [`SeriesData`] scaled to `min_value..max_value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesPainter;

impl Painter for SeriesPainter {
    type Data = SeriesData;

    fn paint(
        &mut self,
        surface: &mut dyn Surface,
        opts: &RenderOptions,
        data: &SeriesData,
        ctx: &mut PaintContext<'_>,
    ) -> Result<(), Interrupted> {
        surface.set_clip(Some(opts.plot_rect()));
        for series in &data.series {
            let points = series.times.iter().zip(&series.values);
            match series.kind {
                SeriesKind::Line => {
                    let mut previous: Option<(f64, f64)> = None;
                    for (&t, &v) in points {
                        ctx.checkpoint()?;
                        if t.is_nan() || v.is_nan() {
                            previous = None;
                            continue;
                        }
                        let p = (opts.time_to_x(t), opts.value_to_y(v));
                        if let Some((x0, y0)) = previous {
                            surface.stroke_line(x0, y0, p.0, p.1, series.width, series.color);
                        }
                        previous = Some(p);
                    }
                }
                SeriesKind::Marker => {
                    let r = series.width.max(0.5);
                    for (&t, &v) in points {
                        ctx.checkpoint()?;
                        if t.is_nan() || v.is_nan() {
                            continue;
                        }
                        let (x, y) = (opts.time_to_x(t), opts.value_to_y(v));
                        surface.fill_rect(Rect::new(x - r, y - r, 2.0 * r, 2.0 * r), series.color);
                    }
                }
            }
        }
        surface.set_clip(None);
        Ok(())
    }
}
