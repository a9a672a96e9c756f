//! K-Means clustering: seeded initialisation, Lloyd iterations on a pixel
//! sample, then nearest-centroid classification of the full feature stack.
//!
//! Behaviour fixed here rather than left to an engine:
//! - distance is squared Euclidean in feature space;
//! - equidistant centroids resolve to the lowest centroid index;
//! - a centroid left without members is moved to the sample point farthest
//!   from its centroid as measured in this iteration's assignment pass
//!   (points already used for reseeding in the same pass are skipped, ties
//!   go to the lowest sample index);
//! - training stops when an assignment pass changes nothing. After
//!   `max_iterations` updates one more pass is made, and a `NotConverged`
//!   warning is raised only if it still moves a sample.
pub mod assign;
pub mod init;
pub mod lloyds;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::features::Sample;

pub use assign::assign_raster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// Greedy k-means++.
    PlusPlus,
    /// K distinct sample points chosen uniformly.
    RandomSubset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
    pub init: InitStrategy,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 50,
            max_iterations: 100,
            seed: 42,
            init: InitStrategy::PlusPlus,
        }
    }
}

/// Trained centroids. Cluster IDs exposed to callers are 1-based:
/// centroid `c` is cluster `c + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub k: usize,
    pub channel_names: Vec<String>,
    /// `k × channels` values, one row per centroid.
    pub centroids: Vec<f32>,
}

impl ClusterModel {
    #[inline]
    pub fn channels(&self) -> usize {
        self.channel_names.len()
    }

    #[inline]
    pub fn centroid(&self, c: usize) -> &[f32] {
        let d = self.channels();
        &self.centroids[c * d..(c + 1) * d]
    }

    /// 1-based cluster ID of the nearest centroid.
    pub fn classify(&self, point: &[f32]) -> u16 {
        let (c, _) = lloyds::nearest(&self.centroids, self.channels(), point);
        (c + 1) as u16
    }
}

/// A centroid lost all members and was reseeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegenerateClusterEvent {
    pub iteration: usize,
    pub cluster_id: u16,
    /// Sample index the centroid was moved to.
    pub reseeded_from: usize,
}

/// Non-fatal training outcomes worth inspecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingWarning {
    NotConverged { iterations: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub iterations: usize,
    pub converged: bool,
    /// Sum of squared distances from each sample to its centroid.
    pub inertia: f64,
    /// Members per cluster, index `c` for cluster `c + 1`.
    pub cluster_sizes: Vec<usize>,
    pub degenerate_events: Vec<DegenerateClusterEvent>,
    pub warnings: Vec<TrainingWarning>,
}

pub struct TrainedModel {
    pub model: ClusterModel,
    pub report: TrainingReport,
    /// 1-based cluster ID of every sample point under the final model.
    pub sample_assignments: Vec<u16>,
}

fn validate(sample: &Sample, channel_names: &[String], config: &KMeansConfig) -> Result<()> {
    if config.k == 0 {
        return Err(LandcoverError::InvalidConfig("k must be at least 1".into()));
    }
    if config.k >= u16::MAX as usize {
        return Err(LandcoverError::InvalidConfig(format!("k = {} does not fit a u16 cluster raster", config.k)));
    }
    if config.max_iterations == 0 {
        return Err(LandcoverError::InvalidConfig("max_iterations must be at least 1".into()));
    }
    if channel_names.is_empty() {
        return Err(LandcoverError::InvalidConfig("k-means needs at least one channel".into()));
    }
    if channel_names.len() != sample.channels {
        return Err(LandcoverError::InvalidConfig(format!(
            "{} channel names for a {}-channel sample",
            channel_names.len(),
            sample.channels
        )));
    }
    if sample.is_empty() {
        return Err(LandcoverError::EmptySample);
    }
    Ok(())
}

struct LloydRun {
    iterations: usize,
    converged: bool,
    assignments: Vec<usize>,
    distances: Vec<f32>,
    degenerate_events: Vec<DegenerateClusterEvent>,
}

/// Lloyd iterations from the given centroids. Assignments and distances in
/// the result always match the final centroids.
fn run_lloyd(sample: &Sample, k: usize, centroids: &mut [f32], max_iterations: usize) -> LloydRun {
    let n = sample.len();
    let mut assignments = vec![usize::MAX; n];
    let mut distances = vec![0.0f32; n];
    let mut degenerate_events = Vec::new();
    let mut converged = false;
    let mut iterations = 0;

    for iteration in 1..=max_iterations {
        iterations = iteration;
        let changed = lloyds::assign_step(sample, centroids, &mut assignments, &mut distances);
        log::debug!("k-means iteration {iteration}: {changed} reassigned");
        if changed == 0 {
            converged = true;
            break;
        }
        let counts = lloyds::update_step(sample, &assignments, k, centroids);
        for event in lloyds::reseed_empty(sample, &counts, &distances, centroids, iteration) {
            log::debug!(
                "cluster {} empty at iteration {}, reseeded from sample {}",
                event.cluster_id,
                event.iteration,
                event.reseeded_from
            );
            degenerate_events.push(event);
        }
    }

    if !converged {
        // The cap was hit right after an update; one more pass settles
        // whether that update moved any sample.
        let changed = lloyds::assign_step(sample, centroids, &mut assignments, &mut distances);
        converged = changed == 0;
    }

    LloydRun { iterations, converged, assignments, distances, degenerate_events }
}

/// Train K-Means on `sample`. Identical sample, channels and config give
/// identical centroids and assignments.
pub fn train(sample: &Sample, channel_names: &[String], config: &KMeansConfig) -> Result<TrainedModel> {
    validate(sample, channel_names, config)?;
    let (d, k) = (sample.channels, config.k);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut seeds = match config.init {
        InitStrategy::PlusPlus => init::plus_plus(&mut rng, sample, k),
        InitStrategy::RandomSubset => init::random_subset(&mut rng, sample, k),
    };
    if seeds.len() < k {
        log::warn!("only {} distinct seed points for k = {}; filling with farthest points", seeds.len(), k);
        init::fill_farthest(sample, &mut seeds, k);
    }

    let mut centroids = vec![0.0f32; k * d];
    for (c, &s) in seeds.iter().enumerate() {
        centroids[c * d..(c + 1) * d].copy_from_slice(sample.point(s));
    }

    let LloydRun { iterations, converged, assignments, distances, degenerate_events } =
        run_lloyd(sample, k, &mut centroids, config.max_iterations);

    let mut warnings = Vec::new();
    if converged {
        log::info!("k-means converged after {iterations} iterations");
    } else {
        log::warn!("k-means did not converge within {iterations} iterations");
        warnings.push(TrainingWarning::NotConverged { iterations });
    }

    let mut cluster_sizes = vec![0usize; k];
    for &a in &assignments {
        cluster_sizes[a] += 1;
    }
    let inertia = distances.iter().map(|&x| x as f64).sum::<f64>();

    Ok(TrainedModel {
        model: ClusterModel { k, channel_names: channel_names.to_vec(), centroids },
        report: TrainingReport {
            iterations,
            converged,
            inertia,
            cluster_sizes,
            degenerate_events,
            warnings,
        },
        sample_assignments: assignments.iter().map(|&a| (a + 1) as u16).collect(),
    })
}
