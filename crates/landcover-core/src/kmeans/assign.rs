//! Full-raster classification with a trained model.
use super::{lloyds, ClusterModel};
use crate::error::{LandcoverError, Result};
use crate::maybe_rayon::*;
use crate::raster::{ClassRaster, Raster};

/// Label every pixel of `stack` with its nearest centroid's 1-based ID.
/// Pixels with any non-finite channel get 0. Rows are classified in
/// parallel; output is independent of thread count.
pub fn assign_raster(model: &ClusterModel, stack: &Raster) -> Result<ClassRaster<u16>> {
    if stack.band_names != model.channel_names {
        return Err(LandcoverError::InvalidConfig(format!(
            "stack channels {:?} do not match model channels {:?}",
            stack.band_names, model.channel_names
        )));
    }
    let (width, channels) = (stack.width, model.channels());
    let mut data = vec![0u16; stack.pixel_count()];

    if width > 0 {
        data.par_chunks_mut(width).enumerate().for_each(|(row, out)| {
            let mut pixel = vec![0.0f32; channels];
            for (col, id) in out.iter_mut().enumerate() {
                stack.pixel_into(row * width + col, &mut pixel);
                if pixel.iter().all(|v| v.is_finite()) {
                    let (c, _) = lloyds::nearest(&model.centroids, channels, &pixel);
                    *id = (c + 1) as u16;
                }
            }
        });
    }

    let labelled = data.iter().filter(|&&id| id != 0).count();
    log::info!("assigned {labelled} of {} pixels to {} clusters", data.len(), model.k);

    Ok(ClassRaster { data, width, height: stack.height, transform: stack.transform, epsg: stack.epsg })
}
