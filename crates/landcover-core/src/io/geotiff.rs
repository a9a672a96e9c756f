//! Single-band GeoTIFF reading and writing with the pure-Rust `tiff` crate.
//!
//! Georeferencing is carried by ModelPixelScale (33550) + ModelTiepoint
//! (33922); the EPSG code, when present, by the GeoKeyDirectory (34735).
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType as DecodedColorType;

use crate::error::{LandcoverError, Result};
use crate::raster::{ClassRaster, GeoTransform};

// GeoKey ids.
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
/// EPSG:4326 and friends are geographic; everything else is written as projected.
const EPSG_WGS84: u16 = 4326;
const GDAL_NODATA: u16 = 42113;

/// One decoded band with its georeferencing.
#[derive(Debug, Clone)]
pub struct DecodedBand {
    pub values: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub epsg: Option<u16>,
}

/// Read the first image of a single-band GeoTIFF as f32.
/// Values equal to `nodata` become NaN.
pub fn read_band(path: &Path, nodata: Option<f32>) -> Result<DecodedBand> {
    let file = File::open(path)?;
    decode_band(BufReader::new(file), nodata, &path.display().to_string())
}

fn decode_band<R: Read + Seek>(reader: R, nodata: Option<f32>, name: &str) -> Result<DecodedBand> {
    // Full-scene Sentinel bands exceed the decoder's default buffer limit.
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());
    let (w, h) = decoder.dimensions()?;
    let (width, height) = (w as usize, h as usize);

    match decoder.colortype()? {
        DecodedColorType::Gray(_) => {}
        other => {
            return Err(LandcoverError::UnsupportedPixelType(format!("{name} ({other:?}, expected one gray sample)")))
        }
    }

    let transform = read_transform(&mut decoder).unwrap_or_else(|| {
        log::warn!("{name}: no ModelPixelScale/ModelTiepoint tags, using unit pixels");
        GeoTransform::unit()
    });
    let epsg = read_epsg(&mut decoder);

    let mut values: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return Err(LandcoverError::UnsupportedPixelType(name.to_string())),
    };

    if values.len() != width * height {
        return Err(LandcoverError::GridMismatch {
            expected_width: width,
            expected_height: height,
            width: values.len(),
            height: 1,
            context: format!("{name}: decoded sample count"),
        });
    }

    if let Some(nd) = nodata {
        for v in values.iter_mut() {
            if *v == nd {
                *v = f32::NAN;
            }
        }
    }

    Ok(DecodedBand { values, width, height, transform, epsg })
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    // Tiepoint: raster (I, J, K) → model (X, Y, Z).
    let pixel_width = scale[0];
    let pixel_height = -scale[1];
    Some(GeoTransform::new(
        tie[3] - tie[0] * pixel_width,
        tie[4] - tie[1] * pixel_height,
        pixel_width,
        pixel_height,
    ))
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u16> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    // Header is 4 shorts, then (key id, location, count, value) entries.
    let n = *keys.get(3)? as usize;
    let mut epsg = None;
    for entry in keys.get(4..4 + 4 * n)?.chunks_exact(4) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE => return Some(value),
            GEOGRAPHIC_TYPE => epsg = Some(value),
            _ => {}
        }
    }
    epsg
}

fn geokey_directory(epsg: Option<u16>) -> Vec<u16> {
    let mut keys: Vec<u16> = vec![1, 1, 0, 0];
    let geographic = epsg == Some(EPSG_WGS84);
    // ModelType: 1 = projected, 2 = geographic. RasterType 1 = PixelIsArea.
    keys.extend_from_slice(&[GT_MODEL_TYPE, 0, 1, if geographic { 2 } else { 1 }]);
    keys.extend_from_slice(&[GT_RASTER_TYPE, 0, 1, 1]);
    if let Some(code) = epsg {
        let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        keys.extend_from_slice(&[key, 0, 1, code]);
    }
    keys[3] = ((keys.len() - 4) / 4) as u16;
    keys
}

fn encode<W, C>(
    writer: W,
    width: usize,
    height: usize,
    transform: &GeoTransform,
    epsg: Option<u16>,
    nodata: &str,
    data: &[C::Inner],
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<C>(width as u32, height as u32)?;

    let scale = [transform.pixel_width, transform.pixel_height.abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &geokey_directory(epsg)[..])?;
    image.encoder().write_tag(Tag::Unknown(GDAL_NODATA), nodata)?;

    image.write_data(data)?;
    Ok(())
}

/// Write one f32 band (NaN is the no-data value).
pub fn write_f32(
    path: &Path,
    width: usize,
    height: usize,
    transform: &GeoTransform,
    epsg: Option<u16>,
    values: &[f32],
) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    encode::<_, colortype::Gray32Float>(writer, width, height, transform, epsg, "nan", values)
}

/// Write a u16 class raster (0 = no-data).
pub fn write_class_u16(path: &Path, raster: &ClassRaster<u16>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    encode::<_, colortype::Gray16>(writer, raster.width, raster.height, &raster.transform, raster.epsg, "0", &raster.data)
}

/// Write a u8 mask raster (0 = no-data).
pub fn write_class_u8(path: &Path, raster: &ClassRaster<u8>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    encode::<_, colortype::Gray8>(writer, raster.width, raster.height, &raster.transform, raster.epsg, "0", &raster.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_band_round_trips_with_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b4.tif");
        let t = GeoTransform::new(399_960.0, 1_500_000.0, 10.0, -10.0);
        let values = vec![0.0, 1.5, -9999.0, 42.0, 7.25, 3.0];
        write_f32(&path, 3, 2, &t, Some(32644), &values).unwrap();

        let band = read_band(&path, Some(-9999.0)).unwrap();
        assert_eq!((band.width, band.height), (3, 2));
        assert!(band.transform.approx_eq(&t));
        assert_eq!(band.epsg, Some(32644));
        assert_eq!(band.values[1], 1.5);
        assert!(band.values[2].is_nan());
        assert_eq!(band.values[5], 3.0);
    }

    #[test]
    fn class_raster_is_readable_as_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.tif");
        let raster = ClassRaster {
            data: vec![1u16, 2, 0, 2],
            width: 2,
            height: 2,
            transform: GeoTransform::new(79.0, 13.0, 0.0001, -0.0001),
            epsg: Some(EPSG_WGS84),
        };
        write_class_u16(&path, &raster).unwrap();

        let band = read_band(&path, Some(0.0)).unwrap();
        assert_eq!(band.epsg, Some(EPSG_WGS84));
        assert_eq!(band.values[0], 1.0);
        assert!(band.values[2].is_nan());
    }

    #[test]
    fn geokey_directory_counts_entries() {
        let keys = geokey_directory(Some(32644));
        assert_eq!(keys[3], 3);
        assert_eq!(&keys[12..16], &[PROJECTED_CS_TYPE, 0, 1, 32644]);
        assert_eq!(geokey_directory(None)[3], 2);
    }
}
