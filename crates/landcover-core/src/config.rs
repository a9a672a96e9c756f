//! Pipeline configuration. One JSON document drives a whole run; every
//! section falls back to its default when omitted.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::features::SamplingConfig;
use crate::indices::IndexSpec;
use crate::kmeans::KMeansConfig;
use crate::labels::{LabelMapping, ReferencePoint};
use crate::loader::{AcquisitionFilter, SensorSource};
use crate::region::PropertyFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// JSON feature file with the study-area polygons.
    pub path: PathBuf,
    /// Features to keep; all features when absent.
    #[serde(default)]
    pub filter: Option<PropertyFilter>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tamilnadu_subdistricts.json"),
            filter: Some(PropertyFilter { property: "District".into(), value: "VELLORE".into() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub region: RegionConfig,
    pub optical: SensorSource,
    /// Loaded only when some channel is one of its bands.
    pub radar: Option<SensorSource>,
    pub indices: Vec<IndexSpec>,
    /// Feature stack channels, in order.
    pub channels: Vec<String>,
    pub sampling: SamplingConfig,
    pub kmeans: KMeansConfig,
    pub labels: LabelMapping,
    pub reference_points: Vec<ReferencePoint>,
    pub output_dir: PathBuf,
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Sentinel-2 surface reflectance, calendar 2023, scenes under 1 % cloud.
pub fn default_optical() -> SensorSource {
    SensorSource {
        name: "sentinel2".into(),
        catalog: PathBuf::from("data/sentinel2/catalog.json"),
        bands: strings(&["B2", "B3", "B4", "B5", "B6", "B7", "B8"]),
        nodata: Some(0.0),
        filter: AcquisitionFilter {
            start: NaiveDate::from_ymd_opt(2023, 1, 1),
            end: NaiveDate::from_ymd_opt(2023, 12, 30),
            max_cloud_cover: Some(1.0),
            ..Default::default()
        },
    }
}

/// Sentinel-1 GRD, July to October 2023, dual-polarised IW scenes.
pub fn default_radar() -> SensorSource {
    SensorSource {
        name: "sentinel1".into(),
        catalog: PathBuf::from("data/sentinel1/catalog.json"),
        bands: strings(&["VV", "VH"]),
        nodata: None,
        filter: AcquisitionFilter {
            start: NaiveDate::from_ymd_opt(2023, 7, 1),
            end: NaiveDate::from_ymd_opt(2023, 10, 30),
            max_cloud_cover: None,
            required_polarisations: strings(&["VV", "VH"]),
            instrument_mode: Some("IW".into()),
        },
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: RegionConfig::default(),
            optical: default_optical(),
            radar: Some(default_radar()),
            indices: vec![IndexSpec::ndvi(), IndexSpec::ndwi(), IndexSpec::evi()],
            channels: strings(&["B2", "B3", "B4", "B5", "B6", "B7", "B8", "NDVI", "NDWI", "EVI"]),
            sampling: SamplingConfig::default(),
            kmeans: KMeansConfig::default(),
            labels: LabelMapping::default_crops(),
            reference_points: [
                (79.1842854, 12.979444),
                (79.175526, 12.979951),
                (79.175544, 12.979702),
                (79.175481, 12.979096),
                (79.175481, 12.978659),
            ]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| ReferencePoint { name: format!("marker_{}", i + 1), x, y })
            .collect(),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config. Relative input paths are resolved against the
    /// config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config: PipelineConfig = serde_json::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.region.path);
        resolve(&mut self.optical.catalog);
        if let Some(radar) = self.radar.as_mut() {
            resolve(&mut radar.catalog);
        }
    }

    /// Whether any configured channel is a radar band.
    pub fn uses_radar(&self) -> bool {
        self.radar
            .as_ref()
            .is_some_and(|r| self.channels.iter().any(|c| r.bands.contains(c)))
    }

    /// Checks that need no input data: channel list, K and the label table.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(LandcoverError::InvalidConfig("no channels configured".into()));
        }
        let mut seen = HashSet::new();
        for c in &self.channels {
            if !seen.insert(c.as_str()) {
                return Err(LandcoverError::InvalidConfig(format!("channel '{c}' listed twice")));
            }
        }
        if self.kmeans.k == 0 {
            return Err(LandcoverError::InvalidConfig("k must be at least 1".into()));
        }
        if self.sampling.max_samples == 0 {
            return Err(LandcoverError::InvalidConfig("max_samples must be at least 1".into()));
        }
        self.labels.validate(self.kmeans.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reproduces_reference_analysis() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.channels.len(), 10);
        assert_eq!(cfg.kmeans.k, 50);
        assert_eq!(cfg.sampling.max_samples, 50_000);
        assert_eq!(cfg.optical.filter.max_cloud_cover, Some(1.0));
        assert_eq!(cfg.radar.as_ref().unwrap().filter.instrument_mode.as_deref(), Some("IW"));
        assert_eq!(cfg.reference_points.len(), 5);
        assert!(!cfg.uses_radar());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "kmeans": { "k": 8 }, "channels": ["B4", "B8", "VV"] }"#).unwrap();
        assert_eq!(cfg.kmeans.k, 8);
        assert_eq!(cfg.kmeans.max_iterations, 100);
        assert_eq!(cfg.indices.len(), 3);
        assert!(cfg.uses_radar());
        // Default labels reach cluster 36, beyond k = 8.
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_round_trips_through_json() {
        let json = serde_json::to_string_pretty(&PipelineConfig::default()).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channels, PipelineConfig::default().channels);
        assert_eq!(back.optical.filter, default_optical().filter);
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "region": { "path": "area.json" }, "optical": { "name": "s2", "catalog": "s2/catalog.json", "bands": ["B4"] } }"#)
            .unwrap();
        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.region.path, dir.path().join("area.json"));
        assert_eq!(cfg.region.filter, None);
        assert_eq!(cfg.optical.catalog, dir.path().join("s2/catalog.json"));
    }

    #[test]
    fn duplicate_channels_rejected() {
        let cfg = PipelineConfig { channels: strings(&["B4", "B4"]), ..Default::default() };
        assert!(matches!(cfg.validate(), Err(LandcoverError::InvalidConfig(_))));
    }
}
