//! Drawing surfaces owned by render workers.
//!
//! [`Surface`] is the small set of primitives painters need. [`RasterSurface`]
//! implements it over an in-memory RGBA buffer; text is not rasterized but
//! recorded as [`TextLabel`]s so the host can draw it with its own fonts.

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::util::{f64_to_i64, f64_to_u8, pixel_clamped};

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    /// Fully transparent.
    pub const TRANSPARENT: Self = Self([0, 0, 0, 0]);
    /// Black.
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    /// White.
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    /// Red, used for info messages.
    pub const RED: Self = Self([255, 0, 0, 255]);
    /// Pink, used for the zoom-in advisory.
    pub const PINK: Self = Self([255, 192, 203, 255]);
    /// Gray, used for "Loading..." and hover guides.
    pub const GRAY: Self = Self([128, 128, 128, 255]);
    /// Yellow hover highlight.
    pub const YELLOW: Self = Self([255, 255, 0, 255]);
    /// Light blue selection highlight.
    pub const LIGHT_BLUE: Self = Self([173, 216, 230, 255]);

    /// Opaque color from components.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    /// Same color with a new alpha, `alpha` in [0, 1].
    #[must_use]
    pub fn with_alpha(self, alpha: f64) -> Self {
        let [r, g, b, _] = self.0;
        Self([r, g, b, f64_to_u8(alpha * 255.0)])
    }

    /// Parse `#rrggbb`, `#rrggbbaa` or one of the named colors painters use.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(hex) = text.strip_prefix('#') {
            let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            return match hex.len() {
                6 => Some(Self([channel(0)?, channel(2)?, channel(4)?, 255])),
                8 => Some(Self([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
                _ => None,
            };
        }
        let named = match text.to_ascii_lowercase().as_str() {
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "red" => Self::RED,
            "pink" => Self::PINK,
            "gray" | "grey" => Self::GRAY,
            "yellow" => Self::YELLOW,
            "lightblue" => Self::LIGHT_BLUE,
            "blue" => Self::rgb(0, 0, 255),
            "green" => Self::rgb(0, 128, 0),
            "orange" => Self::rgb(255, 165, 0),
            "transparent" => Self::TRANSPARENT,
            _ => return None,
        };
        Some(named)
    }

    /// Source-over blend of `self` onto `dst`.
    #[must_use]
    pub fn over(self, dst: Self) -> Self {
        let alpha = self.0[3];
        match alpha {
            255 => self,
            0 => dst,
            _ => {
                let a = f64::from(alpha) / 255.0;
                let mix = |s: u8, d: u8| f64_to_u8(f64::from(s) * a + f64::from(d) * (1.0 - a));
                let out_a = a + f64::from(dst.0[3]) / 255.0 * (1.0 - a);
                Self([
                    mix(self.0[0], dst.0[0]),
                    mix(self.0[1], dst.0[1]),
                    mix(self.0[2], dst.0[2]),
                    f64_to_u8(out_a * 255.0),
                ])
            }
        }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

impl TryFrom<String> for Rgba {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unrecognized color: {value}"))
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width (may be negative before [`Rect::normalized`]).
    pub width: f64,
    /// Height (may be negative before [`Rect::normalized`]).
    pub height: f64,
}

impl Rect {
    /// Construct a rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two corners.
    #[must_use]
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Same rectangle with non-negative width and height.
    #[must_use]
    pub fn normalized(self) -> Self {
        let (x, width) = if self.width < 0.0 {
            (self.x + self.width, -self.width)
        } else {
            (self.x, self.width)
        };
        let (y, height) = if self.height < 0.0 {
            (self.y + self.height, -self.height)
        } else {
            (self.y, self.height)
        };
        Self::new(x, y, width, height)
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Whether the point lies inside (half-open on the right/bottom).
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Horizontal text anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    /// Anchor at the left end.
    #[default]
    Left,
    /// Anchor at the centre.
    Center,
    /// Anchor at the right end.
    Right,
}

/// Vertical text anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextBaseline {
    /// Anchor at the top.
    Top,
    /// Anchor at the middle.
    #[default]
    Middle,
    /// Anchor at the bottom.
    Bottom,
}

/// Text drawn on a surface.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    /// The text.
    pub text: String,
    /// Anchor x.
    pub x: f64,
    /// Anchor y.
    pub y: f64,
    /// Fill color.
    pub color: Rgba,
    /// Font size in pixels.
    pub size: f64,
    /// Bold weight.
    pub bold: bool,
    /// Horizontal anchor.
    pub align: TextAlign,
    /// Vertical anchor.
    pub baseline: TextBaseline,
}

impl TextLabel {
    /// A 12 px label anchored middle-left.
    #[must_use]
    pub fn new(text: impl Into<String>, x: f64, y: f64, color: Rgba) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            color,
            size: 12.0,
            bold: false,
            align: TextAlign::Left,
            baseline: TextBaseline::Middle,
        }
    }

    /// Set the font size.
    #[must_use]
    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    /// Set the weight.
    #[must_use]
    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }

    /// Set the anchors.
    #[must_use]
    pub fn anchored(mut self, align: TextAlign, baseline: TextBaseline) -> Self {
        self.align = align;
        self.baseline = baseline;
        self
    }
}

/// Drawing target owned by exactly one render worker.
pub trait Surface: Send {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Reallocate to the given size. Clears the contents and the clip.
    fn resize(&mut self, width: u32, height: u32);

    /// Clear all pixels and text to transparent.
    fn clear(&mut self);

    /// Restrict subsequent drawing to `clip`, or lift the restriction.
    fn set_clip(&mut self, clip: Option<Rect>);

    /// Fill a rectangle.
    fn fill_rect(&mut self, rect: Rect, color: Rgba);

    /// Stroke a straight line of the given width.
    fn stroke_line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, width: f64, color: Rgba);

    /// Draw a label. Text is not clipped.
    fn fill_text(&mut self, label: TextLabel);
}

/// In-memory RGBA surface.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
    clip: Option<Rect>,
    labels: Vec<TextLabel>,
}

impl RasterSurface {
    /// A cleared surface of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba::TRANSPARENT; pixel_count(width, height)],
            clip: None,
            labels: Vec::new(),
        }
    }

    /// Pixel at `(x, y)`, `None` when out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(self.index(x, y)).copied()
    }

    /// All pixels, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    /// Labels drawn since the last clear.
    #[must_use]
    pub fn labels(&self) -> &[TextLabel] {
        &self.labels
    }

    /// Number of pixels that are not fully transparent.
    #[must_use]
    pub fn painted_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p.0[3] != 0).count()
    }

    /// Write a binary PPM (P6), compositing onto `background`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_ppm<W: Write>(&self, mut out: W, background: Rgba) -> Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let mut row = Vec::with_capacity(self.width as usize * 3);
        for chunk in self.pixels.chunks(self.width.max(1) as usize) {
            row.clear();
            for pixel in chunk {
                let [r, g, b, _] = pixel.over(background).0;
                row.extend_from_slice(&[r, g, b]);
            }
            out.write_all(&row)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Save as a PPM file on a white background.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_ppm(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_ppm(std::io::BufWriter::new(file), Rgba::WHITE)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Pixel-space bounds drawing may touch, as half-open `(x0, y0, x1, y1)`.
    fn bounds(&self) -> (f64, f64, f64, f64) {
        let full = (0.0, 0.0, f64::from(self.width), f64::from(self.height));
        match self.clip {
            None => full,
            Some(clip) => {
                let clip = clip.normalized();
                (
                    clip.x.max(full.0),
                    clip.y.max(full.1),
                    clip.right().min(full.2),
                    clip.bottom().min(full.3),
                )
            }
        }
    }

    fn blend(&mut self, x: u32, y: u32, color: Rgba) {
        let idx = self.index(x, y);
        if let Some(dst) = self.pixels.get_mut(idx) {
            *dst = color.over(*dst);
        }
    }

    fn fill_bounded(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgba) {
        let (bx0, by0, bx1, by1) = self.bounds();
        let (x0, y0, x1, y1) = (x0.max(bx0), y0.max(by0), x1.min(bx1), y1.min(by1));
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        // pixel centres inside the rectangle
        let px0 = pixel_clamped((x0 - 0.5).ceil(), self.width);
        let px1 = pixel_clamped((x1 - 0.5).ceil(), self.width);
        let py0 = pixel_clamped((y0 - 0.5).ceil(), self.height);
        let py1 = pixel_clamped((y1 - 0.5).ceil(), self.height);
        for y in py0..py1 {
            for x in px0..px1 {
                self.blend(x, y, color);
            }
        }
    }
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![Rgba::TRANSPARENT; pixel_count(width, height)];
        self.clip = None;
        self.labels.clear();
    }

    fn clear(&mut self) {
        self.pixels.fill(Rgba::TRANSPARENT);
        self.labels.clear();
    }

    fn set_clip(&mut self, clip: Option<Rect>) {
        self.clip = clip;
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let r = rect.normalized();
        self.fill_bounded(r.x, r.y, r.right(), r.bottom(), color);
    }

    fn stroke_line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, width: f64, color: Rgba) {
        let half = width.max(1.0) / 2.0;
        if (y0 - y1).abs() < f64::EPSILON {
            let (a, b) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
            self.fill_bounded(a, y0 - half, b, y0 + half, color);
            return;
        }
        if (x0 - x1).abs() < f64::EPSILON {
            let (a, b) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
            self.fill_bounded(x0 - half, a, x0 + half, b, color);
            return;
        }
        // DDA with a square brush
        let steps = f64_to_i64((x1 - x0).abs().max((y1 - y0).abs()).ceil()).clamp(1, 1 << 20);
        #[allow(clippy::cast_precision_loss)]
        let n = steps as f64;
        for step in 0..=steps {
            #[allow(clippy::cast_precision_loss)]
            let t = step as f64 / n;
            let x = x0 + (x1 - x0) * t;
            let y = y0 + (y1 - y0) * t;
            self.fill_bounded(x - half, y - half, x + half, y + half, color);
        }
    }

    fn fill_text(&mut self, label: TextLabel) {
        self.labels.push(label);
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}
