//! Render options sent by the host and worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::colormap::Colormap;
use crate::error::{RenderError, Result};
use crate::surface::Rect;

/// Plot margins in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    /// Left margin (unit labels live here).
    pub left: f64,
    /// Right margin.
    pub right: f64,
    /// Top margin.
    pub top: f64,
    /// Bottom margin.
    pub bottom: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 50.0,
            right: 20.0,
            top: 20.0,
            bottom: 40.0,
        }
    }
}

/// Everything a painter needs to know about the view.
///
/// The host sends a fresh copy whenever the view changes; the worker always
/// keeps the most recent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    /// Surface width to apply before painting.
    pub canvas_width: u32,
    /// Surface height to apply before painting.
    pub canvas_height: u32,
    /// Plot margins.
    pub margins: Margins,
    /// Left edge of the visible time window.
    pub visible_start_time_sec: f64,
    /// Right edge of the visible time window.
    pub visible_end_time_sec: f64,
    /// Bottom of the value axis (series plots).
    pub min_value: f64,
    /// Top of the value axis (series plots).
    pub max_value: f64,
    /// Unit under the pointer.
    pub hovered_unit_id: Option<i64>,
    /// Units in the current selection.
    pub selected_unit_ids: Vec<i64>,
    /// Data would be too dense to draw; show the zoom advisory instead.
    pub zoom_in_required: bool,
    /// Message drawn at the top centre.
    pub info_message: Option<String>,
    /// Heat map colormap.
    pub colormap: Colormap,
    /// Heat map intensity on a `ln(1 + x)` scale.
    pub log_scale: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 400,
            margins: Margins::default(),
            visible_start_time_sec: 0.0,
            visible_end_time_sec: 1.0,
            min_value: 0.0,
            max_value: 1.0,
            hovered_unit_id: None,
            selected_unit_ids: Vec::new(),
            zoom_in_required: false,
            info_message: None,
            colormap: Colormap::default(),
            log_scale: false,
        }
    }
}

impl RenderOptions {
    /// Options for a canvas of the given size.
    #[must_use]
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
            ..Self::default()
        }
    }

    /// Set the visible time window.
    #[must_use]
    pub fn with_visible_range(mut self, start_sec: f64, end_sec: f64) -> Self {
        self.visible_start_time_sec = start_sec;
        self.visible_end_time_sec = end_sec;
        self
    }

    /// Set the value axis range.
    #[must_use]
    pub fn with_value_range(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// Set the margins.
    #[must_use]
    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    /// The plot area inside the margins.
    #[must_use]
    pub fn plot_rect(&self) -> Rect {
        let m = &self.margins;
        Rect::new(
            m.left,
            m.top,
            f64::from(self.canvas_width) - m.left - m.right,
            f64::from(self.canvas_height) - m.top - m.bottom,
        )
    }

    /// Map a time to an x pixel.
    #[must_use]
    pub fn time_to_x(&self, t: f64) -> f64 {
        let span = self.visible_end_time_sec - self.visible_start_time_sec;
        let width = f64::from(self.canvas_width) - self.margins.left - self.margins.right;
        if span == 0.0 {
            return self.margins.left;
        }
        self.margins.left + (t - self.visible_start_time_sec) / span * width
    }

    /// Map a value to a y pixel (larger values higher up).
    #[must_use]
    pub fn value_to_y(&self, v: f64) -> f64 {
        let span = self.max_value - self.min_value;
        let height = f64::from(self.canvas_height) - self.margins.top - self.margins.bottom;
        let bottom = f64::from(self.canvas_height) - self.margins.bottom;
        if span == 0.0 {
            return bottom;
        }
        bottom - (v - self.min_value) / span * height
    }

    /// Centre y of row `index` out of `count`, row 0 at the bottom.
    #[must_use]
    pub fn row_to_y(&self, index: usize, count: usize) -> f64 {
        let height = f64::from(self.canvas_height) - self.margins.top - self.margins.bottom;
        let bottom = f64::from(self.canvas_height) - self.margins.bottom;
        #[allow(clippy::cast_precision_loss)]
        let frac = (index as f64 + 0.5) / count.max(1) as f64;
        bottom - frac * height
    }

    /// Whether the unit is in the selection.
    #[must_use]
    pub fn is_selected(&self, unit_id: i64) -> bool {
        self.selected_unit_ids.contains(&unit_id)
    }
}

/// Worker timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConfig {
    /// Quiescent delay before a scheduled paint runs.
    pub debounce: Duration,
    /// Iterations between elapsed-time checks in long paints.
    pub yield_every: usize,
    /// Paint duration after which pending messages are drained.
    pub yield_after: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            yield_every: 1000,
            yield_after: Duration::from_millis(100),
        }
    }
}

impl RenderConfig {
    /// Set the debounce delay.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the checkpoint interval (minimum 1).
    #[must_use]
    pub fn with_yield_every(mut self, iterations: usize) -> Self {
        self.yield_every = iterations.max(1);
        self
    }

    /// Set the paint duration after which messages are drained.
    #[must_use]
    pub fn with_yield_after(mut self, yield_after: Duration) -> Self {
        self.yield_after = yield_after;
        self
    }

    /// Set the checkpoint interval.
    ///
    /// # Errors
    /// Returns an error if `iterations` is zero.
    pub fn try_with_yield_every(mut self, iterations: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(RenderError::ConfigError(
                "yield_every must be at least 1".into(),
            ));
        }
        self.yield_every = iterations;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_options_from_camel_case_json() {
        let opts: RenderOptions = serde_json::from_str(
            r#"{"canvasWidth": 300, "canvasHeight": 200,
                "margins": {"left": 10, "right": 10, "top": 5, "bottom": 5},
                "visibleStartTimeSec": 2.0, "visibleEndTimeSec": 4.0,
                "hoveredUnitId": 3, "selectedUnitIds": [1, 2],
                "zoomInRequired": false, "colormap": "hot"}"#,
        )
        .unwrap();
        assert_eq!(opts.canvas_width, 300);
        assert_eq!(opts.hovered_unit_id, Some(3));
        assert!(opts.is_selected(2));
        assert_eq!(opts.colormap, Colormap::Hot);
        assert_eq!(opts.info_message, None);
    }

    #[test]
    fn test_coordinate_maps() {
        let opts = RenderOptions::new(200, 100)
            .with_margins(Margins {
                left: 20.0,
                right: 20.0,
                top: 10.0,
                bottom: 10.0,
            })
            .with_visible_range(10.0, 20.0)
            .with_value_range(-1.0, 1.0);
        assert_relative_eq!(opts.time_to_x(10.0), 20.0);
        assert_relative_eq!(opts.time_to_x(15.0), 100.0);
        assert_relative_eq!(opts.value_to_y(-1.0), 90.0);
        assert_relative_eq!(opts.value_to_y(1.0), 10.0);
        // four rows share 80 px, bottom row first
        assert_relative_eq!(opts.row_to_y(0, 4), 80.0);
        assert_relative_eq!(opts.row_to_y(3, 4), 20.0);
        assert_eq!(opts.plot_rect(), Rect::new(20.0, 10.0, 160.0, 80.0));
    }

    #[test]
    fn test_config_builders() {
        let c = RenderConfig::default().with_yield_every(0);
        assert_eq!(c.yield_every, 1);
        assert!(RenderConfig::default().try_with_yield_every(0).is_err());
        assert_eq!(RenderConfig::default().debounce, Duration::from_millis(10));
    }
}
