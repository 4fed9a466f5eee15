use jpeg_encoder::{ColorType, Encoder};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::core::image::Image;
use crate::core::processing::resize::{calculate_resize_dimensions, resize_rgb_u8};
use crate::error::{Error, Result};

/// Reflectance mapped to black and white in quicklooks.
pub const QUICKLOOK_RANGE: (f32, f32) = (0.0, 0.15);

pub fn write_rgb_jpeg(output: &Path, cols: usize, rows: usize, rgb_data: &[u8]) -> Result<()> {
    if cols > u16::MAX as usize || rows > u16::MAX as usize {
        return Err(Error::Processing(format!(
            "{}x{} exceeds the JPEG size limit",
            cols, rows
        )));
    }
    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    let encoder = Encoder::new(&mut writer, 90);
    encoder
        .encode(rgb_data, cols as u16, rows as u16, ColorType::Rgb)
        .map_err(Error::external)?;
    Ok(())
}

fn scale_to_u8(value: f32) -> u8 {
    let (lo, hi) = QUICKLOOK_RANGE;
    if !value.is_finite() {
        return 0;
    }
    (((value - lo) / (hi - lo)).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Interleaved RGB bytes of three bands, downsized so that the long side is
/// at most `max_size`. Returns `(bytes, cols, rows)`.
pub fn quicklook_rgb(
    image: &Image,
    bands: [&str; 3],
    max_size: Option<usize>,
) -> Result<(Vec<u8>, usize, usize)> {
    let (rows, cols) = image
        .shape()
        .ok_or_else(|| Error::Processing("quicklook of an empty image".into()))?;
    let channels = [
        image.band(bands[0])?,
        image.band(bands[1])?,
        image.band(bands[2])?,
    ];
    let mut rgb = Vec::with_capacity(rows * cols * 3);
    for r in 0..rows {
        for c in 0..cols {
            for ch in &channels {
                rgb.push(scale_to_u8(ch[[r, c]]));
            }
        }
    }
    let (tc, tr) = match max_size {
        Some(size) => calculate_resize_dimensions(cols, rows, size),
        None => (cols, rows),
    };
    if (tc, tr) == (cols, rows) {
        return Ok((rgb, cols, rows));
    }
    let resized = resize_rgb_u8(&rgb, cols, rows, tc, tr)?;
    Ok((resized, tc, tr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflectance_scaling_clamps_and_zeroes_nan() {
        assert_eq!(scale_to_u8(-0.1), 0);
        assert_eq!(scale_to_u8(0.15), 255);
        assert_eq!(scale_to_u8(1.0), 255);
        assert_eq!(scale_to_u8(f32::NAN), 0);
    }
}
