use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use ndarray::Array2;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Output size that fits the long side into `target_size`, keeping aspect.
pub fn calculate_resize_dimensions(
    original_cols: usize,
    original_rows: usize,
    target_size: usize,
) -> (usize, usize) {
    let short_side = original_rows.min(original_cols);
    let long_side = original_rows.max(original_cols);

    if target_size >= long_side {
        if target_size > long_side {
            warn!(
                "Target size {} is larger than original long side {}. Keeping original dimensions {}x{}",
                target_size, long_side, original_cols, original_rows
            );
        }
        return (original_cols, original_rows);
    }

    let scale_factor = target_size as f64 / long_side as f64;
    let new_short_side = ((short_side as f64 * scale_factor).round() as usize).max(1);

    if original_cols > original_rows {
        (target_size, new_short_side)
    } else {
        (new_short_side, target_size)
    }
}

/// Bilinear resample of an `f32` band onto a `(rows, cols)` grid.
pub fn resample_band(data: &Array2<f32>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    let (src_rows, src_cols) = data.dim();
    if (src_rows, src_cols) == (rows, cols) {
        return Ok(data.clone());
    }
    debug!(
        "Resampling band {}x{} -> {}x{}",
        src_cols, src_rows, cols, rows
    );

    let mut src_bytes = Vec::with_capacity(data.len() * 4);
    for v in data.iter() {
        src_bytes.extend_from_slice(&v.to_le_bytes());
    }
    let src_image = Image::from_vec_u8(src_cols as u32, src_rows as u32, src_bytes, PixelType::F32)
        .map_err(Error::external)?;
    let mut dst_image = Image::new(cols as u32, rows as u32, PixelType::F32);

    let resize_options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
    let mut resizer = Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &resize_options)
        .map_err(Error::external)?;

    let out: Vec<f32> = dst_image
        .into_vec()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((rows, cols), out).map_err(Error::external)
}

/// Lanczos3 resize of interleaved RGB bytes, used for quicklooks.
pub fn resize_rgb_u8(
    data: &[u8],
    original_cols: usize,
    original_rows: usize,
    target_cols: usize,
    target_rows: usize,
) -> Result<Vec<u8>> {
    if (original_cols, original_rows) == (target_cols, target_rows) {
        return Ok(data.to_vec());
    }
    let resize_options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    let mut resizer = Resizer::new();

    let src_image = Image::from_vec_u8(
        original_cols as u32,
        original_rows as u32,
        data.to_vec(),
        PixelType::U8x3,
    )
    .map_err(Error::external)?;
    let mut dst_image = Image::new(target_cols as u32, target_rows as u32, PixelType::U8x3);
    resizer
        .resize(&src_image, &mut dst_image, &resize_options)
        .map_err(Error::external)?;

    Ok(dst_image.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_dimensions_keep_aspect() {
        assert_eq!(calculate_resize_dimensions(2000, 1000, 500), (500, 250));
        assert_eq!(calculate_resize_dimensions(1000, 2000, 500), (250, 500));
        assert_eq!(calculate_resize_dimensions(300, 200, 1024), (300, 200));
    }

    #[test]
    fn resample_to_same_shape_is_identity() {
        let band = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32);
        assert_eq!(resample_band(&band, 3, 4).unwrap(), band);
    }

    #[test]
    fn upsampling_constant_band_stays_constant() {
        let band = Array2::from_elem((3, 3), 0.25f32);
        let out = resample_band(&band, 6, 6).unwrap();
        assert_eq!(out.dim(), (6, 6));
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }
}
