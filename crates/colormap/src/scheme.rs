//! Color schemes and multi-stop interpolation engine.

/// RGB color as (r, g, b) with values in 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A color stop: position in [0, 1] mapped to an RGB color.
#[derive(Debug, Clone, Copy)]
pub struct ColorStop {
    pub t: f64,
    pub color: Rgb,
}

impl ColorStop {
    pub const fn new(t: f64, r: u8, g: u8, b: u8) -> Self {
        Self {
            t,
            color: Rgb::new(r, g, b),
        }
    }
}

/// Available color schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorScheme {
    /// Pale yellow -> green -> dark blue, for weights and importances in [0, 1]
    Sequential,
    /// Blue -> White -> Red, for signed coefficients centred on zero
    BlueWhiteRed,
    /// Black -> White
    Grayscale,
}

// YlGnBu
const SEQUENTIAL_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 255, 255, 217),
    ColorStop::new(0.25, 199, 233, 180),
    ColorStop::new(0.50, 65, 182, 196),
    ColorStop::new(0.75, 34, 94, 168),
    ColorStop::new(1.00, 8, 29, 88),
];

// RdBu, reversed
const BLUE_WHITE_RED_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 33, 102, 172),
    ColorStop::new(0.25, 103, 169, 207),
    ColorStop::new(0.50, 247, 247, 247),
    ColorStop::new(0.75, 239, 138, 98),
    ColorStop::new(1.00, 178, 24, 43),
];

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_color(c1: Rgb, c2: Rgb, t: f64) -> Rgb {
    Rgb::new(
        lerp(c1.r as f64, c2.r as f64, t).round() as u8,
        lerp(c1.g as f64, c2.g as f64, t).round() as u8,
        lerp(c1.b as f64, c2.b as f64, t).round() as u8,
    )
}

fn multi_stop(stops: &[ColorStop], t: f64) -> Rgb {
    let (first, last) = (stops[0], stops[stops.len() - 1]);
    if t <= first.t {
        return first.color;
    }
    stops
        .windows(2)
        .find(|w| t <= w[1].t)
        .map(|w| lerp_color(w[0].color, w[1].color, (t - w[0].t) / (w[1].t - w[0].t)))
        .unwrap_or(last.color)
}

/// Evaluate a color scheme at normalized position `t` ∈ [0, 1]; values
/// outside are clamped.
pub fn evaluate(scheme: ColorScheme, t: f64) -> Rgb {
    match scheme {
        ColorScheme::Sequential => multi_stop(SEQUENTIAL_STOPS, t),
        ColorScheme::BlueWhiteRed => multi_stop(BLUE_WHITE_RED_STOPS, t),
        ColorScheme::Grayscale => {
            let v = (t.clamp(0.0, 1.0) * 255.0).round() as u8;
            Rgb::new(v, v, v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_endpoints() {
        assert_eq!(evaluate(ColorScheme::Sequential, 0.0), Rgb::new(255, 255, 217));
        assert_eq!(evaluate(ColorScheme::Sequential, 1.0), Rgb::new(8, 29, 88));
    }

    #[test]
    fn diverging_midpoint_is_white() {
        assert_eq!(evaluate(ColorScheme::BlueWhiteRed, 0.5), Rgb::new(247, 247, 247));
    }

    #[test]
    fn grayscale_midpoint() {
        assert_eq!(evaluate(ColorScheme::Grayscale, 0.5), Rgb::new(128, 128, 128));
    }

    #[test]
    fn clamping_outside_unit_interval() {
        assert_eq!(evaluate(ColorScheme::BlueWhiteRed, -0.5), Rgb::new(33, 102, 172));
        assert_eq!(evaluate(ColorScheme::BlueWhiteRed, 1.5), Rgb::new(178, 24, 43));
    }

    #[test]
    fn interpolates_between_stops() {
        let c = evaluate(ColorScheme::Sequential, 0.125);
        assert_eq!(c, Rgb::new(227, 244, 199));
    }
}
