//! Raster loader: acquisition catalogs, metadata filtering, per-pixel median
//! compositing and clipping to the region of interest.
//!
//! A sensor source is described by a JSON catalog listing its acquisitions,
//! each with one single-band GeoTIFF per band:
//!
//! ```json
//! { "acquisitions": [
//!     { "id": "S2A_20230114", "date": "2023-01-14", "cloud_cover": 0.4,
//!       "bands": { "B2": "s2/20230114/B2.tif", "B3": "s2/20230114/B3.tif" } }
//! ] }
//! ```
//!
//! Relative band paths are resolved against the catalog's directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::io::read_band;
use crate::maybe_rayon::*;
use crate::raster::Raster;
use crate::region::{Extent, RegionOfInterest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acquisition {
    pub id: String,
    pub date: NaiveDate,
    /// Scene cloud cover in percent.
    #[serde(default)]
    pub cloud_cover: Option<f32>,
    /// Polarisation channels present (radar), e.g. `["VV", "VH"]`.
    #[serde(default)]
    pub polarisations: Vec<String>,
    #[serde(default)]
    pub instrument_mode: Option<String>,
    /// Scene footprint in the raster CRS.
    #[serde(default)]
    pub footprint: Option<Extent>,
    pub bands: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionCatalog {
    pub acquisitions: Vec<Acquisition>,
}

impl AcquisitionCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut catalog: AcquisitionCatalog = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for acq in &mut catalog.acquisitions {
            for band_path in acq.bands.values_mut() {
                if band_path.is_relative() {
                    *band_path = base.join(&*band_path);
                }
            }
        }
        Ok(catalog)
    }
}

/// Metadata predicates an acquisition must pass to enter the composite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionFilter {
    /// Inclusive start date.
    pub start: Option<NaiveDate>,
    /// Exclusive end date.
    pub end: Option<NaiveDate>,
    /// Cloud cover must be strictly below this percentage.
    pub max_cloud_cover: Option<f32>,
    /// Every listed polarisation must be present.
    pub required_polarisations: Vec<String>,
    pub instrument_mode: Option<String>,
}

impl AcquisitionFilter {
    /// Why `acq` is rejected, or `None` if it passes.
    pub fn rejection(&self, acq: &Acquisition, region: &Extent) -> Option<&'static str> {
        if self.start.is_some_and(|s| acq.date < s) || self.end.is_some_and(|e| acq.date >= e) {
            return Some("outside date range");
        }
        if let Some(max) = self.max_cloud_cover {
            match acq.cloud_cover {
                Some(cc) if cc < max => {}
                _ => return Some("cloud cover"),
            }
        }
        if !self
            .required_polarisations
            .iter()
            .all(|p| acq.polarisations.iter().any(|q| q == p))
        {
            return Some("missing polarisation");
        }
        if let Some(mode) = &self.instrument_mode {
            if acq.instrument_mode.as_deref() != Some(mode.as_str()) {
                return Some("instrument mode");
            }
        }
        if acq.footprint.is_some_and(|f| !f.intersects(region)) {
            return Some("footprint outside region");
        }
        None
    }
}

/// One sensor's inputs: where its catalog lives, which bands to read and how
/// to filter its acquisitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSource {
    pub name: String,
    pub catalog: PathBuf,
    pub bands: Vec<String>,
    /// Stored value that marks missing pixels (mapped to NaN on load).
    #[serde(default)]
    pub nodata: Option<f32>,
    #[serde(default)]
    pub filter: AcquisitionFilter,
}

/// Acquisitions passing `filter`, in date order.
pub fn select_acquisitions<'a>(
    acquisitions: &'a [Acquisition],
    filter: &AcquisitionFilter,
    roi: &RegionOfInterest,
) -> Vec<&'a Acquisition> {
    let extent = roi.extent();
    let mut selected = Vec::new();
    for acq in acquisitions {
        match filter.rejection(acq, &extent) {
            None => selected.push(acq),
            Some(reason) => log::debug!("rejected {} ({reason})", acq.id),
        }
    }
    selected.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    if selected.len() < acquisitions.len() {
        log::info!(
            "{} of {} acquisitions passed the filters",
            selected.len(),
            acquisitions.len()
        );
    }
    selected
}

/// Read the requested bands of one acquisition into a raster.
pub fn read_acquisition(acq: &Acquisition, bands: &[String], nodata: Option<f32>) -> Result<Raster> {
    let mut layers = Vec::with_capacity(bands.len());
    let mut grid = None;
    let mut epsg = None;
    for name in bands {
        let path = acq
            .bands
            .get(name)
            .ok_or_else(|| LandcoverError::UnknownBand(format!("{name} (acquisition {})", acq.id)))?;
        let band = read_band(path, nodata)?;
        match grid {
            None => grid = Some((band.width, band.height, band.transform)),
            Some((w, h, t)) => {
                if band.width != w || band.height != h || !band.transform.approx_eq(&t) {
                    return Err(LandcoverError::GridMismatch {
                        expected_width: w,
                        expected_height: h,
                        width: band.width,
                        height: band.height,
                        context: format!("band {name} of {}", acq.id),
                    });
                }
            }
        }
        epsg = epsg.or(band.epsg);
        layers.push((name.clone(), band.values));
    }
    let Some((width, height, transform)) = grid else {
        return Err(LandcoverError::InvalidConfig(format!("no bands requested for {}", acq.id)));
    };
    let mut raster = Raster::from_bands(width, height, transform, layers)?;
    raster.epsg = epsg;
    Ok(raster)
}

/// Per-pixel, per-band median over the finite values of `rasters`.
/// An even number of values averages the two middle ones; no finite value
/// gives NaN. All inputs must share grid and band list.
pub fn median_composite(rasters: &[Raster]) -> Result<Raster> {
    let Some(first) = rasters.first() else {
        return Err(LandcoverError::InvalidConfig("median of zero rasters".into()));
    };
    for (i, r) in rasters.iter().enumerate().skip(1) {
        first.check_same_grid(r, &format!("composite input {i}"))?;
        if r.band_names != first.band_names {
            return Err(LandcoverError::InvalidConfig(format!(
                "composite input {i} has bands {:?}, expected {:?}",
                r.band_names, first.band_names
            )));
        }
    }

    let mut out = Raster::new(first.width, first.height, first.band_names.clone(), first.transform, f32::NAN);
    out.epsg = first.epsg;
    let (width, height) = (first.width, first.height);
    if width == 0 || height == 0 {
        return Ok(out);
    }

    // One chunk per (band, row).
    out.data.par_chunks_mut(width).enumerate().for_each(|(chunk, row_out)| {
        let band = chunk / height;
        let row = chunk % height;
        let mut values: Vec<f32> = Vec::with_capacity(rasters.len());
        for (col, out_v) in row_out.iter_mut().enumerate() {
            values.clear();
            values.extend(
                rasters
                    .iter()
                    .map(|r| r.get(band, row, col))
                    .filter(|v| v.is_finite()),
            );
            *out_v = median(&mut values);
        }
    });
    Ok(out)
}

fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return f32::NAN;
    }
    values.sort_unstable_by(f32::total_cmp);
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Crop `raster` to the region's extent and set pixels whose centre lies
/// outside the region to NaN.
pub fn clip_to_region(raster: &Raster, roi: &RegionOfInterest) -> Result<Raster> {
    let (row0, col0, rows, cols) = roi
        .pixel_window(&raster.transform, raster.width, raster.height)
        .ok_or_else(|| LandcoverError::InvalidConfig("region does not overlap the raster".into()))?;
    let mut clipped = raster.crop(row0, col0, rows, cols);
    let mask = roi.mask(clipped.width, clipped.height, &clipped.transform);
    for b in 0..clipped.band_count() {
        for (v, &inside) in clipped.band_mut(b).iter_mut().zip(&mask) {
            if !inside {
                *v = f32::NAN;
            }
        }
    }
    Ok(clipped)
}

/// Filter, read, clip and median-composite one sensor source.
pub fn load_composite(source: &SensorSource, roi: &RegionOfInterest) -> Result<Raster> {
    let catalog = AcquisitionCatalog::load(&source.catalog)?;
    let selected = select_acquisitions(&catalog.acquisitions, &source.filter, roi);
    if selected.is_empty() {
        return Err(LandcoverError::NoAcquisitions { source_name: source.name.clone() });
    }
    log::info!("[{}] compositing {} acquisitions", source.name, selected.len());

    // Scenes are clipped as they are read; only the region window is kept.
    let clipped: Vec<Raster> = selected
        .par_iter()
        .map(|acq| read_acquisition(acq, &source.bands, source.nodata).and_then(|scene| clip_to_region(&scene, roi)))
        .collect::<Result<Vec<_>>>()?;

    let reference = &clipped[0];
    for (acq, scene) in selected.iter().zip(&clipped).skip(1) {
        reference.check_same_grid(scene, &format!("acquisition {}", acq.id))?;
    }

    let composite = median_composite(&clipped)?;
    log::info!(
        "[{}] composite {}x{} with {} bands",
        source.name,
        composite.width,
        composite.height,
        composite.band_count()
    );
    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_f32;
    use crate::raster::GeoTransform;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn acq(id: &str, d: &str, cloud: Option<f32>) -> Acquisition {
        Acquisition {
            id: id.into(),
            date: date(d),
            cloud_cover: cloud,
            polarisations: vec![],
            instrument_mode: None,
            footprint: None,
            bands: BTreeMap::new(),
        }
    }

    fn region() -> RegionOfInterest {
        RegionOfInterest::rectangle(0.0, -4.0, 4.0, 0.0).unwrap()
    }

    #[test]
    fn date_range_is_half_open() {
        let filter = AcquisitionFilter {
            start: Some(date("2023-01-01")),
            end: Some(date("2023-12-30")),
            ..Default::default()
        };
        let ext = region().extent();
        assert!(filter.rejection(&acq("a", "2023-01-01", None), &ext).is_none());
        assert!(filter.rejection(&acq("b", "2023-12-29", None), &ext).is_none());
        assert_eq!(filter.rejection(&acq("c", "2023-12-30", None), &ext), Some("outside date range"));
        assert_eq!(filter.rejection(&acq("d", "2022-12-31", None), &ext), Some("outside date range"));
    }

    #[test]
    fn cloud_cover_is_strictly_less_than() {
        let filter = AcquisitionFilter { max_cloud_cover: Some(1.0), ..Default::default() };
        let ext = region().extent();
        assert!(filter.rejection(&acq("a", "2023-03-01", Some(0.99)), &ext).is_none());
        assert!(filter.rejection(&acq("b", "2023-03-01", Some(1.0)), &ext).is_some());
        assert!(filter.rejection(&acq("c", "2023-03-01", None), &ext).is_some());
    }

    #[test]
    fn radar_predicates_require_all_polarisations_and_mode() {
        let filter = AcquisitionFilter {
            required_polarisations: vec!["VV".into(), "VH".into()],
            instrument_mode: Some("IW".into()),
            ..Default::default()
        };
        let ext = region().extent();
        let mut a = acq("s1", "2023-08-01", None);
        a.polarisations = vec!["VV".into(), "VH".into()];
        a.instrument_mode = Some("IW".into());
        assert!(filter.rejection(&a, &ext).is_none());

        a.polarisations = vec!["VV".into()];
        assert_eq!(filter.rejection(&a, &ext), Some("missing polarisation"));

        a.polarisations = vec!["VH".into(), "VV".into()];
        a.instrument_mode = Some("EW".into());
        assert_eq!(filter.rejection(&a, &ext), Some("instrument mode"));
    }

    #[test]
    fn footprint_must_touch_region() {
        let filter = AcquisitionFilter::default();
        let mut a = acq("a", "2023-03-01", None);
        a.footprint = Some(Extent { min_x: 10.0, min_y: 10.0, max_x: 20.0, max_y: 20.0 });
        assert_eq!(filter.rejection(&a, &region().extent()), Some("footprint outside region"));
    }

    #[test]
    fn selection_is_date_ordered() {
        let acqs = vec![acq("late", "2023-06-01", None), acq("early", "2023-02-01", None)];
        let selected = select_acquisitions(&acqs, &AcquisitionFilter::default(), &region());
        let ids: Vec<&str> = selected.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    fn one_band(values: Vec<f32>) -> Raster {
        Raster::from_bands(values.len(), 1, GeoTransform::unit(), vec![("B".into(), values)]).unwrap()
    }

    #[test]
    fn median_skips_nan_and_averages_even_counts() {
        let inputs = vec![
            one_band(vec![1.0, 5.0, f32::NAN, f32::NAN]),
            one_band(vec![3.0, f32::NAN, 2.0, f32::NAN]),
            one_band(vec![2.0, 9.0, f32::NAN, f32::NAN]),
        ];
        let m = median_composite(&inputs).unwrap();
        assert_eq!(m.band(0)[0], 2.0);
        assert_eq!(m.band(0)[1], 7.0);
        assert_eq!(m.band(0)[2], 2.0);
        assert!(m.band(0)[3].is_nan());
    }

    #[test]
    fn median_rejects_mismatched_grids() {
        let err = median_composite(&[one_band(vec![1.0; 3]), one_band(vec![1.0; 4])]);
        assert!(matches!(err, Err(LandcoverError::GridMismatch { .. })));
    }

    #[test]
    fn clip_crops_to_extent_and_masks_outside() {
        let r = Raster::new(6, 6, vec!["B".into()], GeoTransform::unit(), 1.0);
        let roi = RegionOfInterest::new(geo::MultiPolygon::new(vec![geo::Polygon::new(
            geo::LineString::from(vec![(1.0, -1.0), (4.0, -1.0), (1.0, -4.0), (1.0, -1.0)]),
            vec![],
        )]))
        .unwrap();
        let c = clip_to_region(&r, &roi).unwrap();
        assert_eq!((c.width, c.height), (3, 3));
        assert_eq!(c.transform.origin_x, 1.0);
        // Top-left pixel centre (1.5, -1.5) is inside the triangle, bottom-right is not.
        assert_eq!(c.get(0, 0, 0), 1.0);
        assert!(c.get(0, 2, 2).is_nan());
    }

    #[test]
    fn load_composite_reads_catalog_and_reports_empty_selection() {
        let dir = tempfile::tempdir().unwrap();
        let t = GeoTransform::unit();
        for (day, value) in [("a", 1.0f32), ("b", 3.0), ("c", 100.0)] {
            write_f32(&dir.path().join(format!("{day}.tif")), 4, 4, &t, None, &vec![value; 16]).unwrap();
        }
        let catalog = r#"{ "acquisitions": [
            { "id": "a", "date": "2023-02-01", "cloud_cover": 0.1, "bands": { "B": "a.tif" } },
            { "id": "b", "date": "2023-03-01", "cloud_cover": 0.5, "bands": { "B": "b.tif" } },
            { "id": "c", "date": "2023-04-01", "cloud_cover": 40.0, "bands": { "B": "c.tif" } }
        ] }"#;
        let catalog_path = dir.path().join("catalog.json");
        fs::write(&catalog_path, catalog).unwrap();

        let mut source = SensorSource {
            name: "optical".into(),
            catalog: catalog_path,
            bands: vec!["B".into()],
            nodata: None,
            filter: AcquisitionFilter { max_cloud_cover: Some(1.0), ..Default::default() },
        };
        let composite = load_composite(&source, &region()).unwrap();
        assert_eq!((composite.width, composite.height), (4, 4));
        assert!(composite.band(0).iter().all(|&v| v == 2.0));

        source.filter.start = Some(date("2024-01-01"));
        let err = load_composite(&source, &region());
        assert!(matches!(err, Err(LandcoverError::NoAcquisitions { ref source_name }) if source_name == "optical"));
    }

    #[test]
    fn load_composite_rejects_scenes_on_shifted_grids() {
        let dir = tempfile::tempdir().unwrap();
        write_f32(&dir.path().join("a.tif"), 4, 4, &GeoTransform::unit(), None, &[1.0; 16]).unwrap();
        let shifted = GeoTransform::new(0.5, 0.0, 1.0, -1.0);
        write_f32(&dir.path().join("b.tif"), 4, 4, &shifted, None, &[2.0; 16]).unwrap();
        let catalog = r#"{ "acquisitions": [
            { "id": "a", "date": "2023-02-01", "bands": { "B": "a.tif" } },
            { "id": "b", "date": "2023-03-01", "bands": { "B": "b.tif" } }
        ] }"#;
        let catalog_path = dir.path().join("catalog.json");
        fs::write(&catalog_path, catalog).unwrap();

        let source = SensorSource {
            name: "optical".into(),
            catalog: catalog_path,
            bands: vec!["B".into()],
            nodata: None,
            filter: AcquisitionFilter::default(),
        };
        let err = load_composite(&source, &region());
        assert!(matches!(err, Err(LandcoverError::GridMismatch { ref context, .. }) if context == "acquisition b"));
    }
}
