use serde::{Deserialize, Serialize};

use crate::error::{LandcoverError, Result};

/// North-up affine transform: map = origin + (col, row) * pixel size.
/// `pixel_height` is negative for rasters stored north → south.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Unit pixels with the origin at (0, 0), rows running towards negative y.
    pub fn unit() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }

    /// Map coordinates of the centre of pixel (row, col).
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate.
    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }

    /// Transform of a window whose top-left pixel is (row0, col0) of this grid.
    pub fn offset(&self, row0: usize, col0: usize) -> Self {
        Self {
            origin_x: self.origin_x + col0 as f64 * self.pixel_width,
            origin_y: self.origin_y + row0 as f64 * self.pixel_height,
            ..*self
        }
    }

    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        const TOL: f64 = 1e-9;
        (self.origin_x - other.origin_x).abs() < TOL
            && (self.origin_y - other.origin_y).abs() < TOL
            && (self.pixel_width - other.pixel_width).abs() < TOL
            && (self.pixel_height - other.pixel_height).abs() < TOL
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::unit()
    }
}

/// Multi-band raster of f32 values, band-sequential, each band row-major.
/// No-data is NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    /// `band_count * width * height` values; band `b` starts at `b * width * height`.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub band_names: Vec<String>,
    pub transform: GeoTransform,
    /// EPSG code from the GeoTIFF key directory, when known.
    pub epsg: Option<u16>,
}

impl Raster {
    /// Create a raster with every band filled with `fill`.
    pub fn new(width: usize, height: usize, band_names: Vec<String>, transform: GeoTransform, fill: f32) -> Self {
        Self {
            data: vec![fill; band_names.len() * width * height],
            width,
            height,
            band_names,
            transform,
            epsg: None,
        }
    }

    /// Assemble a raster from named band buffers. Every buffer must hold
    /// `width * height` values.
    pub fn from_bands(
        width: usize,
        height: usize,
        transform: GeoTransform,
        bands: Vec<(String, Vec<f32>)>,
    ) -> Result<Self> {
        let n = width * height;
        let mut data = Vec::with_capacity(bands.len() * n);
        let mut band_names = Vec::with_capacity(bands.len());
        for (name, values) in bands {
            if values.len() != n {
                return Err(LandcoverError::GridMismatch {
                    expected_width: width,
                    expected_height: height,
                    width: values.len(),
                    height: 1,
                    context: format!("band '{name}' buffer length"),
                });
            }
            data.extend_from_slice(&values);
            band_names.push(name);
        }
        Ok(Self { data, width, height, band_names, transform, epsg: None })
    }

    /// A single-band raster on the same grid as `self`.
    pub fn single_band_like(&self, name: impl Into<String>, values: Vec<f32>) -> Result<Self> {
        let mut out = Self::from_bands(self.width, self.height, self.transform, vec![(name.into(), values)])?;
        out.epsg = self.epsg;
        Ok(out)
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn band_count(&self) -> usize {
        self.band_names.len()
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names.iter().position(|b| b == name)
    }

    pub fn require_band(&self, name: &str) -> Result<usize> {
        self.band_index(name)
            .ok_or_else(|| LandcoverError::UnknownBand(name.to_string()))
    }

    #[inline]
    pub fn band(&self, b: usize) -> &[f32] {
        let n = self.pixel_count();
        &self.data[b * n..(b + 1) * n]
    }

    #[inline]
    pub fn band_mut(&mut self, b: usize) -> &mut [f32] {
        let n = self.pixel_count();
        &mut self.data[b * n..(b + 1) * n]
    }

    pub fn band_by_name(&self, name: &str) -> Result<&[f32]> {
        Ok(self.band(self.require_band(name)?))
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.data[band * self.pixel_count() + row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, band: usize, row: usize, col: usize, val: f32) {
        let n = self.pixel_count();
        self.data[band * n + row * self.width + col] = val;
    }

    /// Copy the band values of pixel `idx` (row-major index) into `out`.
    #[inline]
    pub fn pixel_into(&self, idx: usize, out: &mut [f32]) {
        let n = self.pixel_count();
        for (b, v) in out.iter_mut().enumerate() {
            *v = self.data[b * n + idx];
        }
    }

    /// True when every band of pixel `idx` is finite.
    #[inline]
    pub fn is_valid_pixel(&self, idx: usize) -> bool {
        let n = self.pixel_count();
        (0..self.band_count()).all(|b| self.data[b * n + idx].is_finite())
    }

    pub fn same_grid(&self, other: &Raster) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.transform.approx_eq(&other.transform)
    }

    pub fn check_same_grid(&self, other: &Raster, context: &str) -> Result<()> {
        if self.same_grid(other) {
            return Ok(());
        }
        Err(LandcoverError::GridMismatch {
            expected_width: self.width,
            expected_height: self.height,
            width: other.width,
            height: other.height,
            context: context.to_string(),
        })
    }

    /// Extract the window `[row0, row0 + rows) × [col0, col0 + cols)`.
    pub fn crop(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Raster {
        let rows = rows.min(self.height.saturating_sub(row0));
        let cols = cols.min(self.width.saturating_sub(col0));
        let mut data = Vec::with_capacity(self.band_count() * rows * cols);
        for b in 0..self.band_count() {
            let band = self.band(b);
            for r in row0..row0 + rows {
                let start = r * self.width + col0;
                data.extend_from_slice(&band[start..start + cols]);
            }
        }
        Raster {
            data,
            width: cols,
            height: rows,
            band_names: self.band_names.clone(),
            transform: self.transform.offset(row0, col0),
            epsg: self.epsg,
        }
    }

    /// Nearest-neighbour resample onto a `width × height` grid with `transform`.
    /// Target pixels whose centre falls outside this raster become NaN.
    pub fn resample_nearest(&self, width: usize, height: usize, transform: GeoTransform) -> Raster {
        let n_out = width * height;
        let mut source_idx: Vec<Option<usize>> = Vec::with_capacity(n_out);
        for r in 0..height {
            for c in 0..width {
                let (x, y) = transform.pixel_center(r, c);
                let (fr, fc) = self.transform.world_to_pixel(x, y);
                let (sr, sc) = (fr.floor(), fc.floor());
                if sr < 0.0 || sc < 0.0 || sr >= self.height as f64 || sc >= self.width as f64 {
                    source_idx.push(None);
                } else {
                    source_idx.push(Some(sr as usize * self.width + sc as usize));
                }
            }
        }

        let mut data = Vec::with_capacity(self.band_count() * n_out);
        for b in 0..self.band_count() {
            let band = self.band(b);
            data.extend(source_idx.iter().map(|s| s.map_or(f32::NAN, |i| band[i])));
        }
        Raster {
            data,
            width,
            height,
            band_names: self.band_names.clone(),
            transform,
            epsg: self.epsg,
        }
    }
}

/// Single-band integer raster used for cluster IDs (u16) and label masks (u8).
/// Value 0 is no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRaster<T = u16> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub epsg: Option<u16>,
}

impl<T: Copy> ClassRaster<T> {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }
}
