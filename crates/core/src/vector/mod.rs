//! Study-area geometry

use crate::error::{Error, Result};
use geo::{BoundingRect, Contains, Coord, LineString, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Study-area boundary as given in configuration: an optional WGS84
/// bounding box `[min_lon, min_lat, max_lon, max_lat]` and an optional
/// polygon ring of `[lon, lat]` vertices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyAreaDef {
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
}

/// The region checklists must fall in. A point is inside when it lies in
/// every boundary that is set; an area with no boundary contains everything.
#[derive(Debug, Clone)]
pub struct StudyArea {
    bbox: Option<Rect<f64>>,
    polygon: Option<Polygon<f64>>,
}

impl StudyArea {
    pub fn unbounded() -> Self {
        Self {
            bbox: None,
            polygon: None,
        }
    }

    pub fn from_bbox(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            bbox: Some(Rect::new(
                Coord { x: min_lon, y: min_lat },
                Coord { x: max_lon, y: max_lat },
            )),
            polygon: None,
        }
    }

    pub fn from_polygon(vertices: &[[f64; 2]]) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(Error::InvalidParameter {
                name: "polygon",
                value: format!("{} vertices", vertices.len()),
                reason: "a ring needs at least 3 vertices".into(),
            });
        }
        let ring: LineString<f64> = vertices.iter().map(|&[x, y]| Coord { x, y }).collect();
        Ok(Self {
            bbox: None,
            polygon: Some(Polygon::new(ring, vec![])),
        })
    }

    pub fn from_def(def: &StudyAreaDef) -> Result<Self> {
        let mut area = match &def.polygon {
            Some(vertices) => Self::from_polygon(vertices)?,
            None => Self::unbounded(),
        };
        if let Some([min_lon, min_lat, max_lon, max_lat]) = def.bbox {
            if !(max_lon > min_lon && max_lat > min_lat) {
                return Err(Error::InvalidParameter {
                    name: "bbox",
                    value: format!("{:?}", def.bbox),
                    reason: "expected [min_lon, min_lat, max_lon, max_lat]".into(),
                });
            }
            area.bbox = Self::from_bbox(min_lon, min_lat, max_lon, max_lat).bbox;
        }
        Ok(area)
    }

    pub fn is_bounded(&self) -> bool {
        self.bbox.is_some() || self.polygon.is_some()
    }

    /// Whether (lon, lat) is inside. Box edges count as inside.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        if !lon.is_finite() || !lat.is_finite() {
            return false;
        }
        let in_box = self.bbox.map_or(true, |r| {
            lon >= r.min().x && lon <= r.max().x && lat >= r.min().y && lat <= r.max().y
        });
        in_box
            && self
                .polygon
                .as_ref()
                .map_or(true, |p| p.contains(&Point::new(lon, lat)))
    }

    /// (min_lon, min_lat, max_lon, max_lat) of the tightest boundary, if any
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let poly = self.polygon.as_ref().and_then(|p| p.bounding_rect());
        let rect = match (self.bbox, poly) {
            (Some(a), Some(b)) => Rect::new(
                Coord {
                    x: a.min().x.max(b.min().x),
                    y: a.min().y.max(b.min().y),
                },
                Coord {
                    x: a.max().x.min(b.max().x),
                    y: a.max().y.min(b.max().y),
                },
            ),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        Some((rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }
}

impl Default for StudyArea {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<[f64; 2]> {
        vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]
    }

    #[test]
    fn test_polygon_contains() {
        let area = StudyArea::from_polygon(&triangle()).unwrap();
        assert!(area.contains(2.0, 2.0));
        assert!(!area.contains(8.0, 8.0));
        assert!(!area.contains(f64::NAN, 1.0));
    }

    #[test]
    fn test_bbox_and_polygon_both_apply() {
        let def = StudyAreaDef {
            bbox: Some([0.0, 0.0, 3.0, 3.0]),
            polygon: Some(triangle()),
        };
        let area = StudyArea::from_def(&def).unwrap();
        assert!(area.contains(1.0, 1.0));
        assert!(!area.contains(4.0, 1.0));
        assert_eq!(area.bounds(), Some((0.0, 0.0, 3.0, 3.0)));
    }

    #[test]
    fn test_unbounded_contains_everything() {
        let area = StudyArea::default();
        assert!(area.contains(-170.0, 80.0));
        assert_eq!(area.bounds(), None);
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        assert!(StudyArea::from_polygon(&[[0.0, 0.0], [1.0, 1.0]]).is_err());
        let def = StudyAreaDef {
            bbox: Some([5.0, 0.0, 1.0, 1.0]),
            polygon: None,
        };
        assert!(StudyArea::from_def(&def).is_err());
    }
}
