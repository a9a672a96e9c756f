//! Mapping of user-chosen labels onto cluster IDs and the per-label masks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::maybe_rayon::*;
use crate::raster::ClassRaster;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub label: String,
    pub cluster_id: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelMapping {
    pub entries: Vec<LabelEntry>,
    /// Permit several labels on one cluster ID (warned, not rejected).
    pub allow_shared_ids: bool,
}

/// A named map coordinate (raster CRS) to look up after clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    #[serde(default)]
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointProbe {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// `None` outside the grid or on a no-data pixel.
    pub cluster_id: Option<u16>,
    pub labels: Vec<String>,
}

/// Binary raster for one label: 1 where the pixel carries the label's
/// cluster ID, 0 (no-data) elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    pub label: String,
    pub cluster_id: u16,
    pub mask: ClassRaster<u8>,
}

impl LabelMapping {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u16)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(label, cluster_id)| LabelEntry { label: label.to_string(), cluster_id })
                .collect(),
            allow_shared_ids: false,
        }
    }

    /// Crop and water labels picked by inspection of a K = 50 run over the
    /// default study area.
    pub fn default_crops() -> Self {
        Self::from_pairs([("groundnut", 8), ("sugarcane", 35), ("sorghum", 13), ("water_bodies", 36)])
    }

    /// IDs must lie in `1..=k`, labels must be unique file-name-safe names,
    /// and no two labels may share an ID unless `allow_shared_ids` is set.
    pub fn validate(&self, k: usize) -> Result<()> {
        let mut by_id: HashMap<u16, &str> = HashMap::new();
        let mut seen_labels: HashMap<&str, u16> = HashMap::new();
        for entry in &self.entries {
            let label = entry.label.as_str();
            if label.is_empty() || label.contains(['/', '\\']) || label == "." || label == ".." {
                return Err(LandcoverError::InvalidConfig(format!("label '{label}' is not a valid file name")));
            }
            if entry.cluster_id == 0 || entry.cluster_id as usize > k {
                return Err(LandcoverError::InvalidConfig(format!(
                    "label '{label}' maps to cluster {} outside 1..={k}",
                    entry.cluster_id
                )));
            }
            if seen_labels.insert(label, entry.cluster_id).is_some() {
                return Err(LandcoverError::InvalidConfig(format!("label '{label}' is listed twice")));
            }
            if let Some(first) = by_id.get(&entry.cluster_id) {
                if !self.allow_shared_ids {
                    return Err(LandcoverError::DuplicateClusterId {
                        cluster_id: entry.cluster_id,
                        first: first.to_string(),
                        second: label.to_string(),
                    });
                }
                log::warn!("cluster {} shared by '{}' and '{}'", entry.cluster_id, first, label);
            } else {
                by_id.insert(entry.cluster_id, label);
            }
        }
        Ok(())
    }

    /// Labels mapped to `cluster_id`, in entry order.
    pub fn labels_for(&self, cluster_id: u16) -> Vec<&str> {
        self.entries.iter().filter(|e| e.cluster_id == cluster_id).map(|e| e.label.as_str()).collect()
    }

    /// Cluster ID and mapped labels under each reference point.
    pub fn probe_points(&self, assignment: &ClassRaster<u16>, points: &[ReferencePoint]) -> Vec<PointProbe> {
        points
            .iter()
            .map(|p| {
                let (row, col) = assignment.transform.world_to_pixel(p.x, p.y);
                let inside = row >= 0.0
                    && col >= 0.0
                    && (row as usize) < assignment.height
                    && (col as usize) < assignment.width;
                let cluster_id = inside
                    .then(|| assignment.get(row as usize, col as usize))
                    .filter(|&id| id != 0);
                let labels = cluster_id
                    .map(|id| self.labels_for(id).into_iter().map(str::to_string).collect())
                    .unwrap_or_default();
                log::info!("point '{}' ({}, {}): cluster {:?} {:?}", p.name, p.x, p.y, cluster_id, labels);
                PointProbe { name: p.name.clone(), x: p.x, y: p.y, cluster_id, labels }
            })
            .collect()
    }

    pub fn masks(&self, assignment: &ClassRaster<u16>) -> Vec<LabelMask> {
        self.entries
            .par_iter()
            .map(|entry| {
                let data: Vec<u8> = assignment.data.iter().map(|&id| u8::from(id == entry.cluster_id)).collect();
                let pixels = data.iter().filter(|&&m| m == 1).count();
                log::info!("mask '{}' (cluster {}): {} pixels", entry.label, entry.cluster_id, pixels);
                LabelMask {
                    label: entry.label.clone(),
                    cluster_id: entry.cluster_id,
                    mask: ClassRaster {
                        data,
                        width: assignment.width,
                        height: assignment.height,
                        transform: assignment.transform,
                        epsg: assignment.epsg,
                    },
                }
            })
            .collect()
    }
}
