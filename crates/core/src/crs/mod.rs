//! Coordinate Reference System handling
//!
//! Checklist coordinates arrive as WGS84 longitude/latitude while the
//! covariate grid is usually projected (UTM), so the pipeline needs a
//! transform between the two. Only WGS84 and the UTM zones are supported;
//! they cover every dataset this pipeline targets and need no libproj.

mod utm;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation (primary)
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if available
    proj: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
            proj: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
            proj: None,
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        self.epsg == Some(4326)
    }

    /// UTM zone and hemisphere, if this is a WGS84 UTM CRS
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        self.epsg.and_then(parse_utm_epsg)
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Parse an EPSG code into UTM zone info: `Some((zone, is_north))`.
///
/// - EPSG 326xx → zone xx, North hemisphere
/// - EPSG 327xx → zone xx, South hemisphere
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Geographic,
    Utm { zone: u32, north: bool },
}

impl Frame {
    fn of(crs: &CRS) -> Result<Self> {
        if crs.is_geographic() {
            return Ok(Frame::Geographic);
        }
        match crs.utm_zone() {
            Some((zone, north)) => Ok(Frame::Utm { zone, north }),
            None => Err(Error::CrsMismatch(
                crs.identifier(),
                "supported CRS (EPSG:4326 or WGS84 UTM)".into(),
            )),
        }
    }
}

/// Point transform between two supported CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordTransform {
    from: Frame,
    to: Frame,
}

impl CoordTransform {
    /// Build a transform from `from` to `to`.
    ///
    /// # Errors
    /// `CrsMismatch` when either CRS is neither WGS84 nor a UTM zone.
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        Ok(Self {
            from: Frame::of(from)?,
            to: Frame::of(to)?,
        })
    }

    /// Whether the transform leaves coordinates unchanged
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Transform a single (x, y) pair; x is longitude/easting.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (lon, lat) = match self.from {
            Frame::Geographic => (x, y),
            Frame::Utm { zone, north } => utm::utm_to_wgs84(x, y, zone, north),
        };
        match self.to {
            Frame::Geographic => (lon, lat),
            Frame::Utm { zone, north } => utm::wgs84_to_utm(lon, lat, zone, north),
        }
    }

    /// The reverse transform
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(4326);
        assert_eq!(crs.epsg(), Some(4326));
        assert_eq!(crs.identifier(), "EPSG:4326");
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_utm_zone_parsing() {
        assert_eq!(parse_utm_epsg(32630), Some((30, true)));
        assert_eq!(parse_utm_epsg(32721), Some((21, false)));
        assert_eq!(parse_utm_epsg(32600), None);
        assert_eq!(parse_utm_epsg(3857), None);
    }

    #[test]
    fn test_transform_roundtrip_through_utm() {
        let t = CoordTransform::new(&CRS::wgs84(), &CRS::from_epsg(32643)).unwrap();
        let (e, n) = t.apply(76.95, 11.02);
        let (lon, lat) = t.inverse().apply(e, n);
        assert_relative_eq!(lon, 76.95, epsilon = 1e-6);
        assert_relative_eq!(lat, 11.02, epsilon = 1e-6);
    }

    #[test]
    fn test_unsupported_crs_rejected() {
        assert!(CoordTransform::new(&CRS::wgs84(), &CRS::from_epsg(3857)).is_err());
    }

    #[test]
    fn test_identity_transform() {
        let t = CoordTransform::new(&CRS::from_epsg(32630), &CRS::from_epsg(32630)).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.apply(1.0, 2.0), (1.0, 2.0));
    }
}
