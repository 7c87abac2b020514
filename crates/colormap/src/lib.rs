//! # birdocc colormap
//!
//! Colour schemes and heatmap rendering for the summary figures. A result
//! matrix (species x predictor) is held in a `Raster<f64>`, mapped to RGBA
//! through [`raster_to_rgba`] and written as PNG.
//!
//! ```ignore
//! use birdocc_colormap::{symmetric_params, write_heatmap, ColorScheme};
//!
//! let params = symmetric_params(&coefficients, ColorScheme::BlueWhiteRed);
//! write_heatmap(&coefficients, &params, 24, "summary/coefficients.png")?;
//! ```

mod png;
mod render;
mod scheme;

pub use png::{write_heatmap, write_rgba_png};
pub use render::{auto_params, raster_to_rgba, symmetric_params, upscale_rgba, ColormapParams};
pub use scheme::{evaluate, ColorScheme, ColorStop, Rgb};
