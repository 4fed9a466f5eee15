//! Pixel validity masks.
//!
//! Threshold masks return `true` for pixels that pass (valid). The cloud and
//! shadow mask returns `true` for contaminated pixels; [`clear_sky_mask`]
//! inverts it. Comparisons against NaN are false, so masked input stays
//! masked.
use ndarray::{Array2, ArrayView2, Zip};
use tracing::debug;

use crate::core::image::Image;
use crate::core::processing::morphology::{dilate, erode};
use crate::core::settings::Settings;
use crate::error::{Error, Result};

/// Band holding the joined cloud probability (0-100).
pub const CLOUD_PROBABILITY_BAND: &str = "probability";

/// Set negative pixels of `band` to NaN. Returns the number of pixels masked.
pub fn mask_negative_reflectance(image: &mut Image, band: &str) -> Result<usize> {
    let data = image.band_mut(band)?;
    let mut masked = 0;
    data.mapv_inplace(|v| {
        if v < 0.0 {
            masked += 1;
            f32::NAN
        } else {
            v
        }
    });
    Ok(masked)
}

fn below(image: &Image, band: &str, threshold: f64) -> Result<Array2<bool>> {
    Ok(image.band(band)?.mapv(|v| (v as f64) < threshold))
}

/// Pixels whose TOA reflectance in `band` is below `threshold`.
pub fn toa_mask(image: &Image, band: &str, threshold: f64) -> Result<Array2<bool>> {
    below(image, band, threshold)
}

/// Pixels without cirrus (`rhot_B10` below `threshold`).
pub fn cirrus_mask(image: &Image, band: &str, threshold: f64) -> Result<Array2<bool>> {
    below(image, band, threshold)
}

/// Water pixels: SWIR reflectance below `threshold`.
pub fn non_water(image: &Image, band: &str, threshold: f64) -> Result<Array2<bool>> {
    below(image, band, threshold)
}

/// Set pixels of `data` to NaN wherever `valid` is false.
pub fn apply_mask(data: &mut Array2<f32>, valid: &Array2<bool>) {
    Zip::from(data).and(valid).for_each(|v, ok| {
        if !*ok {
            *v = f32::NAN;
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudMaskParams {
    /// Cloud probability (0-100) above which a pixel is cloud
    pub cloud_threshold: f64,
    /// NIR reflectance below which a pixel may be shadow
    pub nir_dark_threshold: f64,
    /// Maximum shadow projection distance (km)
    pub cloud_proj_distance: f64,
    /// Buffer around clouds and shadows (m)
    pub buffer: f64,
}

impl CloudMaskParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            cloud_threshold: settings.s2_cloud_proba_cloud_threshold,
            nir_dark_threshold: settings.s2_cloud_proba_nir_dark_threshold,
            cloud_proj_distance: settings.s2_cloud_proba_cloud_proj_distance,
            buffer: settings.s2_cloud_proba_buffer,
        }
    }
}

/// Cloud probability above `threshold`.
pub fn cloud_pixels(image: &Image, threshold: f64) -> Result<Array2<bool>> {
    let probability = image.band(CLOUD_PROBABILITY_BAND).map_err(|_| {
        Error::MissingDependency(format!(
            "{} has no cloud probability; join it before masking clouds",
            image.properties.product_id
        ))
    })?;
    Ok(probability.mapv(|p| (p as f64) > threshold))
}

/// Dark NIR pixels lying on the projection of a cloud away from the sun.
pub fn shadow_pixels(
    image: &Image,
    clouds: &Array2<bool>,
    params: &CloudMaskParams,
) -> Result<Array2<bool>> {
    let geometry = image.properties.geometry()?;
    let dark = below(image, "rhot_B8", params.nir_dark_threshold)?;
    let projected = project_clouds(
        clouds,
        geometry.saa + 180.0,
        params.cloud_proj_distance * 1000.0 / image.properties.pixel_size,
    );
    Ok(Zip::from(&projected)
        .and(&dark)
        .map_collect(|p, d| *p && *d))
}

/// Pixels within `max_pixels` of a cloud pixel along `azimuth` (degrees
/// clockwise from north).
///
/// The grid is swept once along a family of parallel digital lines in the
/// projection direction, carrying the number of steps since the last cloud,
/// so the cost is linear in the number of pixels.
fn project_clouds(clouds: &Array2<bool>, azimuth: f64, max_pixels: f64) -> Array2<bool> {
    let steps = max_pixels.max(0.0).round();
    let a = azimuth.to_radians();
    let (dx, dy) = (a.sin(), -a.cos());
    if dx.abs() >= dy.abs() {
        sweep_lines(clouds.view(), dx, dy, steps)
    } else {
        sweep_lines(clouds.t(), dy, dx, steps).reversed_axes()
    }
}

/// Sweep with columns as the major axis: `major` is the column component of
/// the unit direction and `minor` the row component (`|minor| <= |major|`).
fn sweep_lines(grid: ArrayView2<'_, bool>, major: f64, minor: f64, steps: f64) -> Array2<bool> {
    let (rows, cols) = grid.dim();
    let mut out = grid.to_owned();
    let reach = (steps * major.abs()).round() as usize;
    if reach == 0 || rows == 0 || cols == 0 {
        return out;
    }
    let slope = minor / major;
    let offsets: Vec<isize> = (0..cols)
        .map(|c| (slope * c as f64).round() as isize)
        .collect();
    let order: Vec<usize> = if major > 0.0 {
        (0..cols).collect()
    } else {
        (0..cols).rev().collect()
    };
    let lowest = offsets.iter().copied().min().unwrap_or(0);
    let highest = offsets.iter().copied().max().unwrap_or(0);

    // Line `b` holds the pixels (b + offsets[c], c); every pixel is on exactly one line.
    for b in -highest..(rows as isize - lowest) {
        let mut since: Option<usize> = None;
        for &c in &order {
            let r = b + offsets[c];
            if r < 0 || r >= rows as isize {
                continue;
            }
            let r = r as usize;
            if grid[[r, c]] {
                since = Some(0);
            } else if let Some(s) = since {
                let s = s + 1;
                since = Some(s);
                if s <= reach {
                    out[[r, c]] = true;
                }
            }
        }
    }
    out
}

/// Buffered cloud and shadow mask (`true` = contaminated).
pub fn cloud_shadow_mask(image: &Image, params: &CloudMaskParams) -> Result<Array2<bool>> {
    let clouds = cloud_pixels(image, params.cloud_threshold)?;
    let shadows = shadow_pixels(image, &clouds, params)?;
    let combined = Zip::from(&clouds)
        .and(&shadows)
        .map_collect(|c, s| *c || *s);
    let radius = (params.buffer * 2.0 / 20.0).round().max(0.0) as usize;
    debug!(
        "{}: {} cloud, {} shadow pixels, buffer radius {} px",
        image.properties.product_id,
        clouds.iter().filter(|v| **v).count(),
        shadows.iter().filter(|v| **v).count(),
        radius
    );
    Ok(dilate(&erode(&combined, 2), radius))
}

/// `true` where the pixel is free of cloud and shadow.
pub fn clear_sky_mask(image: &Image, params: &CloudMaskParams) -> Result<Array2<bool>> {
    Ok(cloud_shadow_mask(image, params)?.mapv(|v| !v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::{ImageProperties, ViewGeometry};
    use chrono::{TimeZone, Utc};
    use ndarray::array;

    fn image() -> Image {
        let time = Utc.with_ymd_and_hms(2023, 6, 15, 15, 58, 19).unwrap();
        let mut props = ImageProperties::new("S2A_TEST", time);
        // Sun in the south: shadows fall to the north (up).
        props.geometry = Some(ViewGeometry::new(30.0, 180.0, 5.0, 100.0));
        props.pixel_size = 10.0;
        Image::new(props)
    }

    #[test]
    fn negative_reflectance_becomes_nan() {
        let mut img = image();
        img.add_band("rhos_B2", array![[0.1, -0.01], [0.0, 0.2]]).unwrap();
        assert_eq!(mask_negative_reflectance(&mut img, "rhos_B2").unwrap(), 1);
        let band = img.band("rhos_B2").unwrap();
        assert!(band[[0, 1]].is_nan());
        assert_eq!(band[[1, 0]], 0.0);
    }

    #[test]
    fn threshold_masks_treat_nan_as_invalid() {
        let mut img = image();
        img.add_band("rhot_B11", array![[0.01, 0.2, f32::NAN]]).unwrap();
        assert_eq!(
            non_water(&img, "rhot_B11", 0.05).unwrap(),
            array![[true, false, false]]
        );
    }

    #[test]
    fn shadows_project_away_from_the_sun() {
        let mut img = image();
        let mut clouds = Array2::from_elem((6, 3), false);
        clouds[[5, 1]] = true;
        img.add_band("rhot_B8", Array2::from_elem((6, 3), 0.05)).unwrap();
        let params = CloudMaskParams {
            cloud_threshold: 50.0,
            nir_dark_threshold: 0.15,
            cloud_proj_distance: 0.03,
            buffer: 0.0,
        };
        let shadows = shadow_pixels(&img, &clouds, &params).unwrap();
        assert!(shadows[[4, 1]]);
        assert!(shadows[[2, 1]]);
        assert!(!shadows[[1, 1]]);
        assert!(!shadows[[4, 0]]);
    }

    /// Marks every pixel a cloud reaches stepping one pixel length at a time.
    fn march(clouds: &Array2<bool>, azimuth: f64, max_pixels: f64) -> Array2<bool> {
        let (rows, cols) = clouds.dim();
        let mut out = clouds.clone();
        let a = azimuth.to_radians();
        let (dx, dy) = (a.sin(), -a.cos());
        for ((r, c), cloud) in clouds.indexed_iter() {
            if !*cloud {
                continue;
            }
            for step in 1..=(max_pixels.round() as usize) {
                let y = (r as f64 + dy * step as f64).round();
                let x = (c as f64 + dx * step as f64).round();
                if y < 0.0 || x < 0.0 || y >= rows as f64 || x >= cols as f64 {
                    break;
                }
                out[[y as usize, x as usize]] = true;
            }
        }
        out
    }

    #[test]
    fn projection_matches_stepwise_march_on_axes_and_diagonals() {
        let mut clouds = Array2::from_elem((9, 11), false);
        for (r, c) in [(0, 0), (4, 5), (4, 6), (8, 10), (2, 9), (7, 1)] {
            clouds[[r, c]] = true;
        }
        for azimuth in [0.0, 45.0, 90.0, 135.0, 180.0, 225.0, 270.0, 315.0] {
            assert_eq!(
                project_clouds(&clouds, azimuth, 5.0),
                march(&clouds, azimuth, 5.0),
                "azimuth {azimuth}"
            );
        }
    }

    #[test]
    fn oblique_projection_follows_the_sun_direction() {
        let mut clouds = Array2::from_elem((40, 40), false);
        clouds[[30, 5]] = true;
        // 30 degrees east of north: 0.5 column per row up.
        let shadow = project_clouds(&clouds, 30.0, 20.0);
        assert_eq!(shadow.iter().filter(|v| **v).count(), 18);
        assert!(shadow[[29, 6]] || shadow[[29, 5]]);
        assert!(shadow[[13, 15]] || shadow[[13, 14]] || shadow[[13, 16]]);
        assert!(!shadow[[31, 5]]);
        assert!(shadow.indexed_iter().all(|((r, c), v)| !*v || (r <= 30 && c >= 5)));
    }

    #[test]
    fn full_scene_projection_is_a_single_sweep() {
        let (rows, cols) = (2000, 2000);
        let clouds = Array2::from_shape_fn((rows, cols), |(r, _)| r < rows / 2);
        let start = std::time::Instant::now();
        let shadow = project_clouds(&clouds, 330.0, 1000.0);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        assert!(shadow[[0, 0]]);
        assert!(!shadow[[rows - 1, cols - 1]]);
    }

    #[test]
    fn cloud_mask_needs_probability() {
        let mut img = image();
        img.add_band("rhot_B8", Array2::from_elem((2, 2), 0.05)).unwrap();
        let params = CloudMaskParams::from_settings(&Settings::default());
        assert!(matches!(
            cloud_shadow_mask(&img, &params),
            Err(Error::MissingDependency(_))
        ));
    }

    #[test]
    fn large_cloud_survives_erosion_and_is_buffered() {
        let mut img = image();
        let probability = Array2::from_shape_fn((12, 12), |(r, c)| {
            if (3..8).contains(&r) && (3..8).contains(&c) { 90.0 } else { 5.0 }
        });
        img.add_band(CLOUD_PROBABILITY_BAND, probability).unwrap();
        img.add_band("rhot_B8", Array2::from_elem((12, 12), 0.5)).unwrap();
        let params = CloudMaskParams {
            cloud_threshold: 50.0,
            nir_dark_threshold: 0.15,
            cloud_proj_distance: 0.0,
            buffer: 20.0,
        };
        let clear = clear_sky_mask(&img, &params).unwrap();
        assert!(!clear[[5, 5]]);
        assert!(!clear[[3, 5]]);
        assert!(clear[[0, 0]]);
        assert!(clear[[11, 11]]);
    }
}
