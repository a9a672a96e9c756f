//! Feature stack assembly and bounded pixel sampling.
//!
//! Channel order of the stack is exactly the configured channel list; the
//! trained centroids are expressed in that order.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};
use crate::raster::Raster;
use crate::region::RegionOfInterest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Upper bound on sampled pixels.
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { max_samples: 50_000, seed: 42 }
    }
}

/// Pixels drawn from a feature stack, with their feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Row-major pixel indices, ascending.
    pub pixels: Vec<usize>,
    /// `pixels.len() × channels` values, one row per sampled pixel.
    pub features: Vec<f32>,
    pub channels: usize,
    /// Width of the stack the sample was drawn from.
    pub width: usize,
}

impl Sample {
    /// Wrap an explicit feature matrix (no pixel locations).
    pub fn from_features(features: Vec<f32>, channels: usize) -> Self {
        let n = if channels == 0 { 0 } else { features.len() / channels };
        Self { pixels: (0..n).collect(), features, channels, width: n.max(1) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn point(&self, i: usize) -> &[f32] {
        &self.features[i * self.channels..(i + 1) * self.channels]
    }

    /// (row, col) of sample `i` in the source stack.
    pub fn location(&self, i: usize) -> (usize, usize) {
        let p = self.pixels[i];
        (p / self.width, p % self.width)
    }
}

/// Stack the named channels from `layers` into one raster on the grid of the
/// first layer. Each channel is taken from the first layer that has a band of
/// that name; layers on another grid are nearest-neighbour resampled.
pub fn build_feature_stack(layers: &[&Raster], channels: &[String]) -> Result<Raster> {
    let Some(reference) = layers.first() else {
        return Err(LandcoverError::InvalidConfig("feature stack needs at least one layer".into()));
    };
    if channels.is_empty() {
        return Err(LandcoverError::InvalidConfig("feature stack needs at least one channel".into()));
    }

    let mut resampled: Vec<Option<Raster>> = vec![None; layers.len()];
    let mut bands = Vec::with_capacity(channels.len());
    for channel in channels {
        let (li, layer) = layers
            .iter()
            .enumerate()
            .find(|(_, l)| l.band_index(channel).is_some())
            .ok_or_else(|| LandcoverError::UnknownBand(channel.clone()))?;

        let source: &Raster = if layer.same_grid(reference) {
            layer
        } else {
            resampled[li].get_or_insert_with(|| {
                log::info!(
                    "resampling layer with bands {:?} from {}x{} onto {}x{}",
                    layer.band_names,
                    layer.width,
                    layer.height,
                    reference.width,
                    reference.height
                );
                layer.resample_nearest(reference.width, reference.height, reference.transform)
            })
        };
        bands.push((channel.clone(), source.band_by_name(channel)?.to_vec()));
    }

    let mut stack = Raster::from_bands(reference.width, reference.height, reference.transform, bands)?;
    stack.epsg = reference.epsg;
    Ok(stack)
}

/// Pixels inside the region (when given) whose every channel is finite.
pub fn valid_pixel_mask(stack: &Raster, roi: Option<&RegionOfInterest>) -> Vec<bool> {
    let mut mask = match roi {
        Some(roi) => roi.mask(stack.width, stack.height, &stack.transform),
        None => vec![true; stack.pixel_count()],
    };
    for (idx, m) in mask.iter_mut().enumerate() {
        *m = *m && stack.is_valid_pixel(idx);
    }
    mask
}

/// Uniform random sample without replacement of at most `max_samples` valid
/// pixels. The same stack, region and seed always give the same sample.
pub fn sample_pixels(stack: &Raster, roi: Option<&RegionOfInterest>, config: &SamplingConfig) -> Result<Sample> {
    let valid: Vec<usize> = valid_pixel_mask(stack, roi)
        .iter()
        .enumerate()
        .filter_map(|(i, &ok)| ok.then_some(i))
        .collect();
    if valid.is_empty() {
        return Err(LandcoverError::EmptySample);
    }

    let pixels: Vec<usize> = if valid.len() <= config.max_samples {
        valid
    } else {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut picked: Vec<usize> = rand::seq::index::sample(&mut rng, valid.len(), config.max_samples)
            .into_iter()
            .map(|i| valid[i])
            .collect();
        picked.sort_unstable();
        picked
    };

    let channels = stack.band_count();
    let mut features = vec![0.0f32; pixels.len() * channels];
    for (i, &p) in pixels.iter().enumerate() {
        stack.pixel_into(p, &mut features[i * channels..(i + 1) * channels]);
    }
    log::info!("sampled {} pixels ({} channels)", pixels.len(), channels);

    Ok(Sample { pixels, features, channels, width: stack.width })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    fn layer(names: &[&str], width: usize, height: usize, transform: GeoTransform) -> Raster {
        let n = width * height;
        let bands = names
            .iter()
            .enumerate()
            .map(|(b, name)| (name.to_string(), (0..n).map(|i| (b * 1000 + i) as f32).collect()))
            .collect();
        Raster::from_bands(width, height, transform, bands).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stack_follows_configured_channel_order() {
        let optical = layer(&["B2", "B3", "B4"], 3, 2, GeoTransform::unit());
        let ndvi = layer(&["NDVI"], 3, 2, GeoTransform::unit());
        let stack = build_feature_stack(&[&optical, &ndvi], &names(&["NDVI", "B4", "B2"])).unwrap();
        assert_eq!(stack.band_names, names(&["NDVI", "B4", "B2"]));
        assert_eq!(stack.band(0), ndvi.band(0));
        assert_eq!(stack.band(1), optical.band(2));
        assert_eq!(stack.band(2), optical.band(0));
    }

    #[test]
    fn off_grid_layer_is_resampled() {
        let optical = layer(&["B8"], 4, 4, GeoTransform::new(0.0, 0.0, 10.0, -10.0));
        let radar = layer(&["VV"], 2, 2, GeoTransform::new(0.0, 0.0, 20.0, -20.0));
        let stack = build_feature_stack(&[&optical, &radar], &names(&["B8", "VV"])).unwrap();
        assert_eq!((stack.width, stack.height), (4, 4));
        // 10 m pixel (3, 3) sits in 20 m pixel (1, 1) = index 3.
        assert_eq!(stack.get(1, 3, 3), 3.0);
        assert_eq!(stack.get(1, 0, 1), 0.0);
    }

    #[test]
    fn missing_channel_is_unknown_band() {
        let optical = layer(&["B2"], 2, 2, GeoTransform::unit());
        let err = build_feature_stack(&[&optical], &names(&["EVI"]));
        assert!(matches!(err, Err(LandcoverError::UnknownBand(c)) if c == "EVI"));
    }

    #[test]
    fn sampling_excludes_nodata_and_caps_size() {
        let mut stack = layer(&["A", "B"], 10, 10, GeoTransform::unit());
        for c in 0..10 {
            stack.set(1, 0, c, f32::NAN);
        }
        let all = sample_pixels(&stack, None, &SamplingConfig { max_samples: 1000, seed: 1 }).unwrap();
        assert_eq!(all.len(), 90);
        assert!(all.pixels.iter().all(|&p| p >= 10));

        let capped = sample_pixels(&stack, None, &SamplingConfig { max_samples: 25, seed: 1 }).unwrap();
        assert_eq!(capped.len(), 25);
        let mut dedup = capped.pixels.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), 25, "pixels must be distinct and sorted");
        for i in 0..capped.len() {
            let (r, c) = capped.location(i);
            assert_eq!(capped.point(i), &[stack.get(0, r, c), stack.get(1, r, c)]);
        }
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let stack = layer(&["A"], 50, 40, GeoTransform::unit());
        let cfg = SamplingConfig { max_samples: 100, seed: 42 };
        let a = sample_pixels(&stack, None, &cfg).unwrap();
        let b = sample_pixels(&stack, None, &cfg).unwrap();
        assert_eq!(a, b);

        let c = sample_pixels(&stack, None, &SamplingConfig { seed: 43, ..cfg }).unwrap();
        assert_ne!(a.pixels, c.pixels);
    }

    #[test]
    fn sampling_respects_region() {
        let stack = layer(&["A"], 4, 4, GeoTransform::unit());
        let roi = RegionOfInterest::rectangle(0.0, -2.0, 2.0, 0.0).unwrap();
        let s = sample_pixels(&stack, Some(&roi), &SamplingConfig::default()).unwrap();
        assert_eq!(s.pixels, vec![0, 1, 4, 5]);
    }

    #[test]
    fn all_nodata_is_empty_sample() {
        let stack = Raster::new(3, 3, names(&["A"]), GeoTransform::unit(), f32::NAN);
        let err = sample_pixels(&stack, None, &SamplingConfig::default());
        assert!(matches!(err, Err(LandcoverError::EmptySample)));
    }
}
