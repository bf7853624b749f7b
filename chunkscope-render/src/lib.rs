//! chunkscope-render: off-thread, debounced plot rendering.
//!
//! Each panel gets a [`RenderWorker`] thread that owns its drawing
//! [`Surface`]. The host sends options and data; the worker coalesces bursts
//! into one paint and abandons long paints when newer input arrives.
//!
//! Painters:
//! - [`RasterPainter`] - spike raster with hover/selection highlights
//! - [`DensityPainter`] - heat map through a [`Colormap`]
//! - [`SeriesPainter`] - line and marker series
//!
#![warn(missing_docs)]

mod colormap;
mod debounce;
mod engine;
mod error;
mod message;
mod options;
pub mod painters;
mod surface;
mod util;
mod worker;

pub use colormap::Colormap;
pub use debounce::Debouncer;
pub use engine::{Interrupted, PaintContext, PaintOutcome, PaintStats, RenderCore, RenderState};
pub use error::{RenderError, Result};
pub use message::{RenderCommand, RenderMessage};
pub use options::{Margins, RenderConfig, RenderOptions};
pub use painters::{
    DensityData, DensityPainter, Painter, RasterData, RasterPainter, RasterPlot, Series,
    SeriesData, SeriesKind, SeriesPainter,
};
pub use surface::{RasterSurface, Rect, Rgba, Surface, TextAlign, TextBaseline, TextLabel};
pub use worker::RenderWorker;
