//! Pipeline orchestrator: runs all clustering stages in order and writes
//! the products.

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::evaluate::{cluster_statistics, ClusterStatistics};
use crate::features::{build_feature_stack, sample_pixels};
use crate::indices::compute_indices;
use crate::io::{write_class_u16, write_class_u8};
use crate::kmeans::{assign_raster, train, ClusterModel, TrainedModel, TrainingReport};
use crate::labels::{LabelMask, PointProbe};
use crate::loader::load_composite;
use crate::raster::{ClassRaster, Raster};
use crate::region::RegionOfInterest;

/// Everything one run produces.
pub struct PipelineResult {
    /// Feature stack the model was trained on and applied to.
    pub stack: Raster,
    pub sample_size: usize,
    pub trained: TrainedModel,
    pub assignment: ClassRaster<u16>,
    pub statistics: ClusterStatistics,
    pub masks: Vec<LabelMask>,
    pub probes: Vec<PointProbe>,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
struct TrainingOutput<'a> {
    sample_size: usize,
    report: &'a TrainingReport,
    model: &'a ClusterModel,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Run the full pipeline from the files named in `config`.
///
/// Stage order:
///   1. Region of interest
///   2. Sensor composites
///   3. Spectral indices
///   4. Feature stack and sample
///   5. K-Means training and assignment
///   6. Evaluation and labelling
pub fn run(config: &PipelineConfig) -> Result<PipelineResult> {
    config.validate()?;

    // ── 1. Region of interest ───────────────────────────────────────────────
    let roi = RegionOfInterest::load(&config.region.path, config.region.filter.as_ref())?;
    log::info!("region extent {:?}", roi.extent());

    // ── 2. Sensor composites ────────────────────────────────────────────────
    let optical = load_composite(&config.optical, &roi)?;
    let radar = match &config.radar {
        Some(source) if config.uses_radar() => Some(load_composite(source, &roi)?),
        Some(source) => {
            log::info!("[{}] no configured channel uses this source, skipped", source.name);
            None
        }
        None => None,
    };

    run_stages(&optical, radar.as_ref(), &roi, config)
}

/// Run stages 3 to 6 on composites already in memory.
pub fn run_on_inputs(
    optical: &Raster,
    radar: Option<&Raster>,
    roi: &RegionOfInterest,
    config: &PipelineConfig,
) -> Result<PipelineResult> {
    config.validate()?;
    run_stages(optical, radar, roi, config)
}

fn run_stages(
    optical: &Raster,
    radar: Option<&Raster>,
    roi: &RegionOfInterest,
    config: &PipelineConfig,
) -> Result<PipelineResult> {
    let started = Instant::now();

    // ── 3. Spectral indices ─────────────────────────────────────────────────
    let indices = compute_indices(optical, &config.indices)?;

    // ── 4. Feature stack and sample ─────────────────────────────────────────
    let mut layers: Vec<&Raster> = vec![optical];
    layers.extend(indices.iter());
    layers.extend(radar);
    let mut stack = build_feature_stack(&layers, &config.channels)?;
    drop(indices);
    mask_outside(&mut stack, roi);

    let sample = sample_pixels(&stack, Some(roi), &config.sampling)?;

    // ── 5. K-Means training and assignment ──────────────────────────────────
    let trained = train(&sample, &stack.band_names, &config.kmeans)?;
    let assignment = assign_raster(&trained.model, &stack)?;

    // ── 6. Evaluation and labelling ─────────────────────────────────────────
    let statistics = cluster_statistics(&stack, &assignment, config.kmeans.k)?;
    let masks = config.labels.masks(&assignment);
    let probes = config.labels.probe_points(&assignment, &config.reference_points);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    log::info!("clustering finished in {elapsed_ms} ms");

    Ok(PipelineResult {
        stack,
        sample_size: sample.len(),
        trained,
        assignment,
        statistics,
        masks,
        probes,
        elapsed_ms,
    })
}

/// Blank every stack pixel whose centre lies outside the region so the
/// assignment raster carries no-data there.
fn mask_outside(stack: &mut Raster, roi: &RegionOfInterest) {
    let inside = roi.mask(stack.width, stack.height, &stack.transform);
    for b in 0..stack.band_count() {
        for (v, &keep) in stack.band_mut(b).iter_mut().zip(&inside) {
            if !keep {
                *v = f32::NAN;
            }
        }
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Write `clusters.tif`, `statistics.json`, `training.json`,
/// `masks/<label>.tif` and, when points were probed, `points.json`.
pub fn write_outputs(result: &PipelineResult, dir: &Path) -> Result<()> {
    let mask_dir = dir.join("masks");
    fs::create_dir_all(&mask_dir)?;

    write_class_u16(&dir.join("clusters.tif"), &result.assignment)?;
    fs::write(dir.join("statistics.json"), serde_json::to_string_pretty(&result.statistics)?)?;
    let training = TrainingOutput {
        sample_size: result.sample_size,
        report: &result.trained.report,
        model: &result.trained.model,
    };
    fs::write(dir.join("training.json"), serde_json::to_string_pretty(&training)?)?;

    for mask in &result.masks {
        write_class_u8(&mask_dir.join(format!("{}.tif", mask.label)), &mask.mask)?;
    }
    if !result.probes.is_empty() {
        fs::write(dir.join("points.json"), serde_json::to_string_pretty(&result.probes)?)?;
    }
    log::info!("outputs written to {}", dir.display());
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::IndexSpec;
    use crate::io::read_band;
    use crate::kmeans::KMeansConfig;
    use crate::labels::{LabelMapping, ReferencePoint};
    use crate::raster::GeoTransform;

    /// 8×6 optical raster: left half bare soil, right half vegetation.
    fn optical() -> Raster {
        let (w, h) = (8, 6);
        let band = |soil: f32, veg: f32| (0..w * h).map(|i| if i % w < w / 2 { soil } else { veg }).collect::<Vec<f32>>();
        Raster::from_bands(
            w,
            h,
            GeoTransform::new(0.0, 60.0, 10.0, -10.0),
            vec![("B4".into(), band(0.30, 0.05)), ("B8".into(), band(0.35, 0.50))],
        )
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            indices: vec![IndexSpec::ndvi()],
            channels: vec!["B4".into(), "B8".into(), "NDVI".into()],
            kmeans: KMeansConfig { k: 2, ..Default::default() },
            labels: LabelMapping::from_pairs([("vegetation", 1), ("soil", 2)]),
            reference_points: vec![ReferencePoint { name: "field".into(), x: 75.0, y: 5.0 }],
            ..Default::default()
        }
    }

    #[test]
    fn in_memory_run_separates_halves_and_masks_outside_region() {
        let optical = optical();
        // Region covers the top four rows only.
        let roi = RegionOfInterest::rectangle(0.0, 20.0, 80.0, 60.0).unwrap();
        let result = run_on_inputs(&optical, None, &roi, &config()).unwrap();

        assert_eq!(result.sample_size, 32);
        let a = &result.assignment;
        assert!(a.data[32..].iter().all(|&id| id == 0));
        let (soil, veg) = (a.get(0, 0), a.get(0, 7));
        assert_ne!(soil, veg);
        for row in 0..4 {
            for col in 0..8 {
                assert_eq!(a.get(row, col), if col < 4 { soil } else { veg });
            }
        }
        assert!(result.statistics.score.unwrap() < 1e-9);
        assert_eq!(result.masks.len(), 2);
        assert_eq!(result.probes[0].cluster_id, None);
    }

    #[test]
    fn outputs_land_on_disk() {
        let optical = optical();
        let roi = RegionOfInterest::rectangle(0.0, 0.0, 80.0, 60.0).unwrap();
        let result = run_on_inputs(&optical, None, &roi, &config()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        write_outputs(&result, dir.path()).unwrap();
        for file in ["clusters.tif", "statistics.json", "training.json", "points.json", "masks/soil.tif", "masks/vegetation.tif"] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }

        let clusters = read_band(&dir.path().join("clusters.tif"), Some(0.0)).unwrap();
        assert_eq!((clusters.width, clusters.height), (8, 6));
        assert_eq!(clusters.values[0], result.assignment.data[0] as f32);

        let stats: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("statistics.json")).unwrap()).unwrap();
        assert_eq!(stats["clusters"].as_array().unwrap().len(), 2);
        assert_eq!(stats["channel_names"][2], "NDVI");
    }
}
