//! Spectral indices derived from composite bands.
//!
//! Every index maps non-finite inputs and zero denominators to NaN; index
//! math never returns an error for pixel values. A normalized difference is
//! also NaN when opposite-signed inputs would put it outside [-1, 1].

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::maybe_rayon::*;
use crate::raster::Raster;

/// An index definition with its band roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexSpec {
    /// `(a - b) / (a + b)`.
    NormalizedDifference { name: String, a: String, b: String },
    /// `2.5 * (nir - red) / (nir + 6 red - 7.5 blue + 1)`.
    Enhanced { name: String, nir: String, red: String, blue: String },
}

impl IndexSpec {
    pub fn name(&self) -> &str {
        match self {
            IndexSpec::NormalizedDifference { name, .. } | IndexSpec::Enhanced { name, .. } => name,
        }
    }

    /// NDVI on Sentinel-2 band names (B8 = NIR, B4 = red).
    pub fn ndvi() -> Self {
        IndexSpec::NormalizedDifference { name: "NDVI".into(), a: "B8".into(), b: "B4".into() }
    }

    /// McFeeters NDWI on Sentinel-2 band names (B3 = green, B8 = NIR).
    pub fn ndwi() -> Self {
        IndexSpec::NormalizedDifference { name: "NDWI".into(), a: "B3".into(), b: "B8".into() }
    }

    /// EVI on Sentinel-2 band names.
    pub fn evi() -> Self {
        IndexSpec::Enhanced { name: "EVI".into(), nir: "B8".into(), red: "B4".into(), blue: "B2".into() }
    }

    /// Evaluate this index over `raster`, returning a single-band raster
    /// named after the index.
    pub fn compute(&self, raster: &Raster) -> Result<Raster> {
        let values = match self {
            IndexSpec::NormalizedDifference { a, b, .. } => {
                normalized_difference(raster.band_by_name(a)?, raster.band_by_name(b)?)
            }
            IndexSpec::Enhanced { nir, red, blue, .. } => enhanced_vegetation_index(
                raster.band_by_name(nir)?,
                raster.band_by_name(red)?,
                raster.band_by_name(blue)?,
            ),
        };
        raster.single_band_like(self.name(), values)
    }
}

#[inline]
fn guarded_ratio(num: f32, den: f32) -> f32 {
    if !num.is_finite() || !den.is_finite() || den == 0.0 {
        f32::NAN
    } else {
        num / den
    }
}

/// Per-pixel `(a - b) / (a + b)`, always within [-1, 1] or NaN.
pub fn normalized_difference(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.par_iter()
        .zip(b.par_iter())
        .map(|(&a, &b)| {
            let (num, den) = (a - b, a + b);
            if num.abs() > den.abs() {
                f32::NAN
            } else {
                guarded_ratio(num, den)
            }
        })
        .collect()
}

/// Per-pixel `2.5 * (nir - red) / (nir + 6 red - 7.5 blue + 1)`.
pub fn enhanced_vegetation_index(nir: &[f32], red: &[f32], blue: &[f32]) -> Vec<f32> {
    nir.par_iter()
        .zip(red.par_iter())
        .zip(blue.par_iter())
        .map(|((&n, &r), &b)| {
            let ratio = guarded_ratio(n - r, n + 6.0 * r - 7.5 * b + 1.0);
            2.5 * ratio
        })
        .collect()
}

/// Evaluate every index definition over `raster`, one single-band raster each,
/// in definition order. Definitions are evaluated concurrently.
pub fn compute_indices(raster: &Raster, defs: &[IndexSpec]) -> Result<Vec<Raster>> {
    defs
        .par_iter()
        .map(|def| def.compute(raster))
        .collect::<Result<Vec<_>>>()
}
