use std::time::Instant;

use chunkscope_render::{
    Colormap, DensityData, DensityPainter, Painter, RasterData, RasterPainter, RasterPlot,
    RasterSurface, RenderConfig, RenderCore, RenderMessage, RenderOptions, Rgba, Series,
    SeriesData, SeriesPainter, Surface, TextAlign,
};

/// Plot area is x 50..180, y 20..60 with the default margins.
fn opts() -> RenderOptions {
    RenderOptions::new(200, 100)
        .with_visible_range(0.0, 1.0)
        .with_value_range(0.0, 10.0)
}

fn paint<P: Painter>(painter: P, opts: RenderOptions, data: P::Data) -> RasterSurface {
    let mut core = RenderCore::new(painter, RenderConfig::default());
    let now = Instant::now();
    core.handle(RenderMessage::Canvas(RasterSurface::new(1, 1)), now)
        .unwrap();
    core.handle(RenderMessage::Opts(opts), now).unwrap();
    core.handle(RenderMessage::Data(data), now).unwrap();
    core.paint_now(now, &mut || None);
    core.into_surface().unwrap()
}

fn raster() -> RasterData {
    RasterData {
        plots: vec![
            RasterPlot {
                unit_id: 1,
                color: Rgba::rgb(0, 0, 255),
                spike_times_sec: vec![0.5, 5.0],
            },
            RasterPlot {
                unit_id: 2,
                color: Rgba::rgb(0, 128, 0),
                spike_times_sec: vec![0.25],
            },
        ],
    }
}

#[test]
fn test_raster_ticks_rows_and_labels() {
    let mut opts = opts();
    opts.hovered_unit_id = Some(2);
    opts.selected_unit_ids = vec![1];
    let surface = paint(RasterPainter, opts, raster());

    assert_eq!((surface.width(), surface.height()), (200, 100));
    // unit 1 sits on y = 50 with a 20 px tall tick at x = 115
    assert_eq!(surface.pixel(115, 50), Some(Rgba::rgb(0, 0, 255)));
    assert_eq!(surface.pixel(115, 41), Some(Rgba::rgb(0, 0, 255)));
    // selection highlight across the plot area
    assert_eq!(surface.pixel(60, 50), Some(Rgba::LIGHT_BLUE));
    // hover: yellow band with a gray centre line
    assert_eq!(surface.pixel(60, 30), Some(Rgba::YELLOW));
    assert_eq!(surface.pixel(60, 29), Some(Rgba::GRAY));
    assert_eq!(surface.pixel(82, 30), Some(Rgba::rgb(0, 128, 0)));
    // nothing leaks into the margins
    assert_eq!(surface.pixel(10, 50), Some(Rgba::TRANSPARENT));
    assert_eq!(surface.pixel(190, 30), Some(Rgba::TRANSPARENT));

    let labels = surface.labels();
    let unit2: Vec<_> = labels.iter().filter(|l| l.text == "2").collect();
    assert_eq!(unit2.len(), 3);
    assert!(unit2.iter().any(|l| l.align == TextAlign::Left && l.x == 184.0));
    let selected = labels
        .iter()
        .find(|l| l.text == "1" && l.bold)
        .unwrap();
    assert_eq!(selected.color, Rgba::BLACK);
}

#[test]
fn test_raster_labels_hidden_when_rows_are_dense() {
    let plots = (0..20)
        .map(|i| RasterPlot {
            unit_id: i,
            color: Rgba::BLACK,
            spike_times_sec: vec![0.5],
        })
        .collect();
    let surface = paint(RasterPainter, opts(), RasterData { plots });
    assert!(surface.labels().is_empty());
    // 3 px ticks on a 2 px pitch merge into one 4 px wide column
    assert_eq!(surface.painted_pixels(), 4 * 40);
}

#[test]
fn test_density_heat_map() {
    let mut opts = opts();
    opts.colormap = Colormap::Grayscale;
    let data = DensityData {
        start_time_sec: 0.0,
        bin_size_sec: 0.25,
        num_bins: 4,
        num_rows: 2,
        values: vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0, 4.0, 0.0],
    };
    let surface = paint(DensityPainter, opts, data);

    // row 0 spans y 40..60, bins are 32.5 px wide from x = 50
    assert_eq!(surface.pixel(60, 50), Some(Rgba::TRANSPARENT));
    assert_eq!(surface.pixel(100, 50), Some(Rgba::rgb(128, 128, 128)));
    assert_eq!(surface.pixel(170, 50), Some(Rgba::WHITE));
    assert_eq!(surface.pixel(60, 30), Some(Rgba::rgb(64, 64, 64)));
    assert_eq!(surface.pixel(140, 30), Some(Rgba::TRANSPARENT));
    // two 20 px rows get labels
    assert_eq!(surface.labels().len(), 2);
}

#[test]
fn test_series_lines_break_on_nan() {
    let data = SeriesData {
        series: vec![
            Series::line(vec![0.0, 1.0], vec![0.0, 10.0], Rgba::RED),
            Series::line(vec![0.0, 0.5, 1.0], vec![0.0, f64::NAN, 10.0], Rgba::BLACK),
        ],
    };
    let surface = paint(SeriesPainter, opts(), data);
    // midpoint of the diagonal from (50, 60) to (180, 20)
    assert_eq!(surface.pixel(115, 40), Some(Rgba::RED));
    let black = surface
        .pixels()
        .iter()
        .filter(|p| **p == Rgba::BLACK)
        .count();
    assert_eq!(black, 0);
}

#[test]
fn test_series_markers() {
    let data = SeriesData {
        series: vec![Series::markers(vec![0.5], vec![5.0], Rgba::BLACK, 2.0)],
    };
    let surface = paint(SeriesPainter, opts(), data);
    assert_eq!(surface.painted_pixels(), 16);
    assert_eq!(surface.pixel(115, 40), Some(Rgba::BLACK));
}

#[test]
fn test_ppm_export() {
    let surface = paint(RasterPainter, opts(), raster());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raster.ppm");
    surface.save_ppm(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    let header = b"P6\n200 100\n255\n";
    assert!(bytes.starts_with(header));
    assert_eq!(bytes.len(), header.len() + 200 * 100 * 3);
}
