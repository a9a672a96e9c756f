//! Lloyd iteration steps.
use super::DegenerateClusterEvent;
use crate::features::Sample;
use crate::maybe_rayon::*;

#[inline]
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Index and squared distance of the nearest centroid. Strict comparison
/// keeps the lowest index among equidistant centroids.
#[inline]
pub fn nearest(centroids: &[f32], channels: usize, point: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (c, centroid) in centroids.chunks_exact(channels).enumerate() {
        let d = squared_distance(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Assign every sample to its nearest centroid, recording the distance.
/// Returns how many assignments changed.
pub fn assign_step(sample: &Sample, centroids: &[f32], assignments: &mut [usize], distances: &mut [f32]) -> usize {
    let channels = sample.channels;
    assignments
        .par_iter_mut()
        .zip(distances.par_iter_mut())
        .enumerate()
        .map(|(i, (assigned, distance))| {
            let (c, d) = nearest(centroids, channels, sample.point(i));
            *distance = d;
            let changed = *assigned != c;
            *assigned = c;
            changed as usize
        })
        .sum()
}

/// Move each centroid to the mean of its members. Sums run sequentially in
/// f64 so the result does not depend on thread count. Centroids without
/// members keep their position; the member counts are returned.
pub fn update_step(sample: &Sample, assignments: &[usize], k: usize, centroids: &mut [f32]) -> Vec<usize> {
    let d = sample.channels;
    let mut sums = vec![0.0f64; k * d];
    let mut counts = vec![0usize; k];
    for (i, &c) in assignments.iter().enumerate() {
        counts[c] += 1;
        for (s, &v) in sums[c * d..(c + 1) * d].iter_mut().zip(sample.point(i)) {
            *s += v as f64;
        }
    }
    for (c, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        for j in 0..d {
            centroids[c * d + j] = (sums[c * d + j] / count as f64) as f32;
        }
    }
    counts
}

/// Reseed every empty centroid, in index order, at the sample farthest from
/// its assigned centroid as measured in this iteration's assignment pass
/// (`distances` from `assign_step`, before `update_step` moved the
/// centroids). A sample is used at most once per call.
pub fn reseed_empty(
    sample: &Sample,
    counts: &[usize],
    distances: &[f32],
    centroids: &mut [f32],
    iteration: usize,
) -> Vec<DegenerateClusterEvent> {
    let d = sample.channels;
    let mut used: Vec<usize> = Vec::new();
    let mut events = Vec::new();
    for (c, _) in counts.iter().enumerate().filter(|&(_, &count)| count == 0) {
        let mut best: Option<(usize, f32)> = None;
        for (i, &dist) in distances.iter().enumerate() {
            if used.contains(&i) {
                continue;
            }
            if best.map_or(true, |(_, b)| dist > b) {
                best = Some((i, dist));
            }
        }
        let Some((i, _)) = best else { break };
        centroids[c * d..(c + 1) * d].copy_from_slice(sample.point(i));
        used.push(i);
        events.push(DegenerateClusterEvent { iteration, cluster_id: (c + 1) as u16, reseeded_from: i });
    }
    events
}
