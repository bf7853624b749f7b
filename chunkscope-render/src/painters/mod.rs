//! Painters draw one kind of plot data onto a surface.

mod density;
mod raster;
mod series;

pub use density::{DensityData, DensityPainter};
pub use raster::{RasterData, RasterPainter, RasterPlot};
pub use series::{Series, SeriesData, SeriesKind, SeriesPainter};

use crate::engine::{Interrupted, PaintContext};
use crate::options::RenderOptions;
use crate::surface::Surface;

/// Draws `Data` for the current options.
///
/// The core has already resized and cleared the surface, drawn the info
/// message, and handled the zoom-in and loading states. Long loops must call
/// [`PaintContext::checkpoint`] and bail out with `?`.
pub trait Painter: Send + 'static {
    /// Plot data this painter understands.
    type Data: Send + 'static;

    /// Advisory shown when the options require zooming in.
    fn zoom_message(&self) -> &str {
        "Zoom in (mouse-wheel) to view"
    }

    /// Draw a frame.
    ///
    /// # Errors
    /// Returns [`Interrupted`] when the context reports newer input.
    fn paint(
        &mut self,
        surface: &mut dyn Surface,
        opts: &RenderOptions,
        data: &Self::Data,
        ctx: &mut PaintContext<'_>,
    ) -> Result<(), Interrupted>;
}
