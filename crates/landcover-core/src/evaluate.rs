//! Per-cluster spectral variance and the overall mean-variance score.

use serde::Serialize;

use crate::error::{LandcoverError, Result};
use crate::maybe_rayon::*;
use crate::raster::{ClassRaster, Raster};

/// Streaming mean / M2 accumulator.
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    #[inline]
    fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population variance, `None` before the first value.
    fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStat {
    pub id: u16,
    pub pixel_count: usize,
    /// Population variance per channel, `None` for an empty cluster.
    pub variance: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStatistics {
    pub channel_names: Vec<String>,
    /// One entry per ID in `1..=k`, in ID order.
    pub clusters: Vec<ClusterStat>,
    /// Mean over clusters with defined variance, per channel.
    pub mean_variance: Vec<Option<f64>>,
    /// Mean of `mean_variance`; lower means more homogeneous clusters.
    pub score: Option<f64>,
}

impl ClusterStatistics {
    pub fn channel_mean_variance(&self, name: &str) -> Option<f64> {
        let idx = self.channel_names.iter().position(|n| n == name)?;
        self.mean_variance[idx]
    }

    pub fn cluster(&self, id: u16) -> Option<&ClusterStat> {
        self.clusters.get((id as usize).checked_sub(1)?)
    }
}

fn mean_of_defined(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, n) = values.flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Variance of every stack channel within each cluster of `assignment`.
/// Pixels with ID 0, an ID above `k`, or a non-finite channel value do not
/// contribute to that channel.
pub fn cluster_statistics(stack: &Raster, assignment: &ClassRaster<u16>, k: usize) -> Result<ClusterStatistics> {
    if assignment.width != stack.width || assignment.height != stack.height {
        return Err(LandcoverError::GridMismatch {
            expected_width: stack.width,
            expected_height: stack.height,
            width: assignment.width,
            height: assignment.height,
            context: "cluster assignment vs feature stack".into(),
        });
    }

    let mut pixel_counts = vec![0usize; k];
    for &id in &assignment.data {
        if id != 0 && (id as usize) <= k {
            pixel_counts[id as usize - 1] += 1;
        }
    }

    let per_channel: Vec<Vec<Welford>> = (0..stack.band_count())
        .into_par_iter()
        .map(|b| {
            let mut acc = vec![Welford::default(); k];
            for (&id, &v) in assignment.data.iter().zip(stack.band(b)) {
                if id == 0 || id as usize > k || !v.is_finite() {
                    continue;
                }
                acc[id as usize - 1].push(v as f64);
            }
            acc
        })
        .collect();

    let clusters: Vec<ClusterStat> = (0..k)
        .map(|c| ClusterStat {
            id: (c + 1) as u16,
            pixel_count: pixel_counts[c],
            variance: per_channel.iter().map(|acc| acc[c].variance()).collect(),
        })
        .collect();

    let mean_variance: Vec<Option<f64>> = (0..stack.band_count())
        .map(|b| mean_of_defined(clusters.iter().map(|s| s.variance[b])))
        .collect();
    let score = mean_of_defined(mean_variance.iter().copied());

    let empty = pixel_counts.iter().filter(|&&n| n == 0).count();
    if empty > 0 {
        log::info!("{empty} of {k} clusters have no pixels");
    }
    match score {
        Some(s) => log::info!("mean within-cluster variance score: {s:.6}"),
        None => log::warn!("no cluster has pixels; score undefined"),
    }

    Ok(ClusterStatistics { channel_names: stack.band_names.clone(), clusters, mean_variance, score })
}
