//! Region of interest: the boundary every raster is clipped and sampled to.
//!
//! Regions are read from a JSON feature file:
//!
//! ```json
//! { "features": [
//!     { "properties": { "District": "VELLORE" },
//!       "polygons": [ [ [[x, y], ...], [[x, y], ...] ] ] }
//! ] }
//! ```
//!
//! Each polygon is a list of rings; the first ring is the exterior, the rest
//! are holes. All selected features are merged into one multi-polygon.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use geo::{BoundingRect, Contains, LineString, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::maybe_rayon::*;
use crate::raster::GeoTransform;

#[derive(Debug, Clone, Deserialize)]
pub struct RegionFile {
    pub features: Vec<RegionFeature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionFeature {
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

/// Select features whose `property` equals `value`. Non-string property
/// values are compared through their JSON rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub value: String,
}

impl PropertyFilter {
    fn matches(&self, feature: &RegionFeature) -> bool {
        match feature.properties.get(&self.property) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

/// Axis-aligned extent in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

#[derive(Debug, Clone)]
pub struct RegionOfInterest {
    shape: MultiPolygon<f64>,
    extent: Extent,
}

impl RegionOfInterest {
    pub fn new(shape: MultiPolygon<f64>) -> Result<Self> {
        let rect = shape
            .bounding_rect()
            .ok_or_else(|| LandcoverError::InvalidConfig("region has no polygons".into()))?;
        let extent = Extent {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        };
        Ok(Self { shape, extent })
    }

    /// Axis-aligned rectangular region.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let ring = LineString::from(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ]);
        Self::new(MultiPolygon::new(vec![Polygon::new(ring, vec![])]))
    }

    /// Build a region from the features of `file` matching `filter`
    /// (all features when `filter` is `None`).
    pub fn from_region_file(file: &RegionFile, filter: Option<&PropertyFilter>) -> Result<Self> {
        let mut polygons = Vec::new();
        for feature in &file.features {
            if filter.is_some_and(|f| !f.matches(feature)) {
                continue;
            }
            for rings in &feature.polygons {
                let mut rings = rings.iter().map(|ring| LineString::from(ring.clone()));
                let Some(exterior) = rings.next() else {
                    continue;
                };
                polygons.push(Polygon::new(exterior, rings.collect()));
            }
        }
        if polygons.is_empty() {
            let what = filter
                .map(|f| format!("{} == {}", f.property, f.value))
                .unwrap_or_else(|| "any feature".to_string());
            return Err(LandcoverError::InvalidConfig(format!("region file has no polygons matching {what}")));
        }
        Self::new(MultiPolygon::new(polygons))
    }

    pub fn load(path: &Path, filter: Option<&PropertyFilter>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: RegionFile = serde_json::from_str(&text)?;
        Self::from_region_file(&file, filter)
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// True if (x, y) lies strictly inside the region.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if x < self.extent.min_x || x > self.extent.max_x || y < self.extent.min_y || y > self.extent.max_y {
            return false;
        }
        self.shape.contains(&Point::new(x, y))
    }

    /// Pixel window `(row0, col0, rows, cols)` of a `width × height` grid that
    /// covers the region's extent, or `None` if they do not overlap.
    pub fn pixel_window(&self, transform: &GeoTransform, width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
        let (r_a, c_a) = transform.world_to_pixel(self.extent.min_x, self.extent.max_y);
        let (r_b, c_b) = transform.world_to_pixel(self.extent.max_x, self.extent.min_y);
        let (r_lo, r_hi) = (r_a.min(r_b), r_a.max(r_b));
        let (c_lo, c_hi) = (c_a.min(c_b), c_a.max(c_b));

        let row0 = r_lo.floor().max(0.0);
        let col0 = c_lo.floor().max(0.0);
        let row1 = r_hi.ceil().min(height as f64);
        let col1 = c_hi.ceil().min(width as f64);
        if row1 <= row0 || col1 <= col0 {
            return None;
        }
        Some((row0 as usize, col0 as usize, (row1 - row0) as usize, (col1 - col0) as usize))
    }

    /// Row-major inside/outside mask of pixel centres for a grid.
    pub fn mask(&self, width: usize, height: usize, transform: &GeoTransform) -> Vec<bool> {
        let mut mask = vec![false; width * height];
        if width == 0 {
            return mask;
        }
        mask.par_chunks_mut(width).enumerate().for_each(|(r, row)| {
            for (c, inside) in row.iter_mut().enumerate() {
                let (x, y) = transform.pixel_center(r, c);
                *inside = self.contains(x, y);
            }
        });
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> RegionFile {
        serde_json::from_str(
            r#"{ "features": [
                { "properties": { "District": "VELLORE", "code": 7 },
                  "polygons": [ [ [[0,0],[10,0],[10,10],[0,10],[0,0]],
                                  [[4,4],[6,4],[6,6],[4,6],[4,4]] ] ] },
                { "properties": { "District": "CHENNAI" },
                  "polygons": [ [ [[20,20],[30,20],[30,30],[20,30],[20,20]] ] ] }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn property_filter_selects_matching_features() {
        let filter = PropertyFilter { property: "District".into(), value: "VELLORE".into() };
        let roi = RegionOfInterest::from_region_file(&sample_file(), Some(&filter)).unwrap();
        assert_eq!(roi.extent(), Extent { min_x: 0.0, min_y: 0.0, max_x: 10.0, max_y: 10.0 });
        assert!(roi.contains(1.0, 1.0));
        assert!(!roi.contains(25.0, 25.0));
    }

    #[test]
    fn numeric_property_matches_json_rendering() {
        let filter = PropertyFilter { property: "code".into(), value: "7".into() };
        assert!(RegionOfInterest::from_region_file(&sample_file(), Some(&filter)).is_ok());
    }

    #[test]
    fn holes_are_outside() {
        let roi = RegionOfInterest::from_region_file(&sample_file(), None).unwrap();
        assert!(!roi.contains(5.0, 5.0));
        assert!(roi.contains(2.0, 5.0));
        assert!(roi.contains(25.0, 25.0));
    }

    #[test]
    fn unmatched_filter_is_an_error() {
        let filter = PropertyFilter { property: "District".into(), value: "MADURAI".into() };
        let err = RegionOfInterest::from_region_file(&sample_file(), Some(&filter));
        assert!(matches!(err, Err(LandcoverError::InvalidConfig(_))));
    }

    #[test]
    fn pixel_window_covers_extent() {
        let roi = RegionOfInterest::rectangle(12.0, -38.0, 31.0, -21.0).unwrap();
        // 10 m pixels, origin (0, 0), rows going south.
        let t = GeoTransform::new(0.0, 0.0, 10.0, -10.0);
        assert_eq!(roi.pixel_window(&t, 10, 10), Some((2, 1, 2, 3)));
        assert_eq!(roi.pixel_window(&t, 2, 2), None);
    }

    #[test]
    fn mask_marks_pixel_centres_inside() {
        let roi = RegionOfInterest::rectangle(0.0, -2.0, 2.0, 0.0).unwrap();
        let mask = roi.mask(3, 3, &GeoTransform::unit());
        assert_eq!(mask, vec![true, true, false, true, true, false, false, false, false]);
    }
}
