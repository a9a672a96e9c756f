//! Centroid seeding.
use rand::rngs::StdRng;
use rand::Rng;

use super::lloyds::squared_distance;
use crate::features::Sample;
use crate::maybe_rayon::*;

/// Greedy k-means++ (Arthur & Vassilvitskii, with the greedy candidate
/// trials of scikit-learn): each step draws `2 + ln k` candidates with
/// probability proportional to D², keeps the one that most reduces the
/// potential. Stops early once every sample coincides with a seed, so the
/// result may hold fewer than `k` indices.
pub fn plus_plus(rng: &mut StdRng, sample: &Sample, k: usize) -> Vec<usize> {
    let n = sample.len();
    let mut seeds = Vec::with_capacity(k);
    let first = rng.gen_range(0..n);
    seeds.push(first);

    let mut min_dist = distances_to(sample, first);
    let trials = 2 + (k as f64).ln() as usize;

    while seeds.len() < k {
        let potential: f64 = min_dist.iter().map(|&d| d as f64).sum();
        if potential <= 0.0 {
            break;
        }
        let mut best: Option<(usize, f64, Vec<f32>)> = None;
        for _ in 0..trials {
            let candidate = draw_weighted(rng, &min_dist, potential);
            let updated: Vec<f32> = min_dist
                .par_iter()
                .zip(distances_to(sample, candidate).par_iter())
                .map(|(&a, &b)| a.min(b))
                .collect();
            let reduced: f64 = updated.iter().map(|&d| d as f64).sum();
            if best.as_ref().map_or(true, |(_, p, _)| reduced < *p) {
                best = Some((candidate, reduced, updated));
            }
        }
        let Some((chosen, _, updated)) = best else { break };
        seeds.push(chosen);
        min_dist = updated;
    }
    seeds
}

/// `min(k, n)` distinct sample indices chosen uniformly.
pub fn random_subset(rng: &mut StdRng, sample: &Sample, k: usize) -> Vec<usize> {
    let n = sample.len();
    rand::seq::index::sample(rng, n, k.min(n)).into_vec()
}

/// Extend `seeds` to `k` entries with the samples farthest from their
/// nearest seed (ties to the lowest index). Once every sample is a seed the
/// remaining slots cycle through the samples again.
pub fn fill_farthest(sample: &Sample, seeds: &mut Vec<usize>, k: usize) {
    let n = sample.len();
    let mut min_dist = vec![f32::INFINITY; n];
    for &s in seeds.iter() {
        lower_to(&mut min_dist, &distances_to(sample, s));
    }
    while seeds.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (i, &d) in min_dist.iter().enumerate() {
            if seeds.contains(&i) {
                continue;
            }
            if best.map_or(true, |(_, b)| d > b) {
                best = Some((i, d));
            }
        }
        let next = best.map_or(seeds.len() % n, |(i, _)| i);
        lower_to(&mut min_dist, &distances_to(sample, next));
        seeds.push(next);
    }
}

fn distances_to(sample: &Sample, index: usize) -> Vec<f32> {
    let target = sample.point(index);
    (0..sample.len())
        .into_par_iter()
        .map(|i| squared_distance(sample.point(i), target))
        .collect()
}

fn lower_to(min_dist: &mut [f32], other: &[f32]) {
    for (m, &o) in min_dist.iter_mut().zip(other) {
        *m = m.min(o);
    }
}

/// Index drawn with probability proportional to `weights`. Zero weights are
/// never drawn; `total` must be positive.
fn draw_weighted(rng: &mut StdRng, weights: &[f32], total: f64) -> usize {
    let threshold = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    let mut last_positive = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            acc += w as f64;
            last_positive = i;
            if acc > threshold {
                return i;
            }
        }
    }
    last_positive
}
