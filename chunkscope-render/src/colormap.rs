//! Colormap definitions and application logic.

use serde::{Deserialize, Serialize};

use crate::surface::Rgba;
use crate::util::f64_to_u8;

/// Available colormaps for density and spectrogram heat maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    /// Ink on paper - mid gray to black; zero stays blank.
    #[default]
    Ink,
    /// Hot (Thermal) - black to red to yellow to white.
    Hot,
    /// Grayscale - black to white.
    Grayscale,
    /// Viridis (approximate) - blue to teal to green to yellow.
    Viridis,
}

impl std::fmt::Display for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Colormap::Ink => write!(f, "Ink"),
            Colormap::Hot => write!(f, "Hot (Thermal)"),
            Colormap::Grayscale => write!(f, "Grayscale"),
            Colormap::Viridis => write!(f, "Viridis"),
        }
    }
}

impl std::str::FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ink" => Ok(Colormap::Ink),
            "hot" => Ok(Colormap::Hot),
            "grayscale" | "gray" => Ok(Colormap::Grayscale),
            "viridis" => Ok(Colormap::Viridis),
            other => Err(format!("unknown colormap: {other}")),
        }
    }
}

impl Colormap {
    /// Apply the colormap to a normalized value.
    ///
    /// # Arguments
    /// * `val` - Normalized value, clamped to [0, 1]
    #[must_use]
    pub fn apply(self, val: f64) -> Rgba {
        let val = if val.is_nan() { 0.0 } else { val.clamp(0.0, 1.0) };
        match self {
            Colormap::Ink => {
                let v = f64_to_u8(128.0 - (val * 255.0 / 2.0).floor());
                Rgba::rgb(v, v, v)
            }
            Colormap::Grayscale => {
                let v = f64_to_u8(val * 255.0);
                Rgba::rgb(v, v, v)
            }
            Colormap::Hot => {
                if val < 0.5 {
                    // Red to Yellow
                    Rgba::rgb(255, f64_to_u8(val * 2.0 * 255.0), 0)
                } else {
                    // Yellow to White
                    Rgba::rgb(255, 255, f64_to_u8((val - 0.5) * 2.0 * 255.0))
                }
            }
            Colormap::Viridis => Rgba::rgb(
                f64_to_u8(255.0 * val.powi(2)),
                f64_to_u8(255.0 * val),
                f64_to_u8(255.0 * (1.0 - val)),
            ),
        }
    }

    /// Normalize `value` against `max` (linearly or as `ln(1 + x)`) and apply.
    #[must_use]
    pub fn apply_scaled(self, value: f64, max: f64, log_scale: bool) -> Rgba {
        if max <= 0.0 || max.is_nan() {
            return self.apply(0.0);
        }
        let norm = if log_scale {
            value.max(0.0).ln_1p() / max.ln_1p()
        } else {
            value / max
        };
        self.apply(norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(Colormap::Ink.apply(0.0), Rgba::rgb(128, 128, 128));
        assert_eq!(Colormap::Ink.apply(1.0), Rgba::rgb(1, 1, 1));
        assert_eq!(Colormap::Grayscale.apply(1.0), Rgba::WHITE);
        assert_eq!(Colormap::Hot.apply(0.0), Rgba::rgb(255, 0, 0));
        assert_eq!(Colormap::Hot.apply(1.0), Rgba::WHITE);
        assert_eq!(Colormap::Viridis.apply(0.0), Rgba::rgb(0, 0, 255));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(Colormap::Grayscale.apply(7.0), Rgba::WHITE);
        assert_eq!(Colormap::Grayscale.apply(-1.0), Rgba::BLACK);
        assert_eq!(Colormap::Grayscale.apply(f64::NAN), Rgba::BLACK);
    }

    #[test]
    fn test_log_scale_lifts_small_values() {
        let linear = Colormap::Grayscale.apply_scaled(10.0, 1000.0, false);
        let log = Colormap::Grayscale.apply_scaled(10.0, 1000.0, true);
        assert!(log.0[0] > linear.0[0]);
        assert_eq!(Colormap::Grayscale.apply_scaled(5.0, 0.0, false), Rgba::BLACK);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("HOT".parse::<Colormap>(), Ok(Colormap::Hot));
        assert!("plasma".parse::<Colormap>().is_err());
        let c: Colormap = serde_json::from_str("\"viridis\"").unwrap();
        assert_eq!(c, Colormap::Viridis);
    }
}
