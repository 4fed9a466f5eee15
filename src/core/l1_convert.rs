//! Level-1C digital numbers to top-of-atmosphere reflectance.
//!
//! Sun and view angles are read from the scene properties
//! (`MEAN_SOLAR_*_ANGLE`, `MEAN_INCIDENCE_*_ANGLE_<band>`), every band is
//! rescaled with the product's quantification value and radiometric offset,
//! and all bands are resampled onto the grid of the reference band for the
//! requested resolution.
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::image::{Image, ViewGeometry};
use crate::core::processing::resize::resample_band;
use crate::core::sensor::{SENTINEL2_BANDS, band_by_name, band_by_scale};
use crate::error::{Error, Result};

pub const MEAN_SOLAR_ZENITH_ANGLE: &str = "MEAN_SOLAR_ZENITH_ANGLE";
pub const MEAN_SOLAR_AZIMUTH_ANGLE: &str = "MEAN_SOLAR_AZIMUTH_ANGLE";
pub const QUANTIFICATION_VALUE: &str = "QUANTIFICATION_VALUE";
pub const PRODUCT_ID: &str = "PRODUCT_ID";
pub const DEFAULT_QUANTIFICATION_VALUE: f64 = 10_000.0;

pub fn incidence_zenith_key(band: &str) -> String {
    format!("MEAN_INCIDENCE_ZENITH_ANGLE_{band}")
}

pub fn incidence_azimuth_key(band: &str) -> String {
    format!("MEAN_INCIDENCE_AZIMUTH_ANGLE_{band}")
}

pub fn radio_add_offset_key(band: &str) -> String {
    format!("RADIO_ADD_OFFSET_{band}")
}

/// Sun angles from the scene means, view angles averaged over the bands.
pub fn view_geometry(image: &Image) -> Result<ViewGeometry> {
    let props = &image.properties;
    let required = |key: &str| {
        props.extra_f64(key).ok_or_else(|| {
            Error::DataQuality(format!("{} is missing {}", props.product_id, key))
        })
    };
    let sza = required(MEAN_SOLAR_ZENITH_ANGLE)?;
    let saa = required(MEAN_SOLAR_AZIMUTH_ANGLE)?;

    let mean_over_bands = |key: fn(&str) -> String| -> Result<f64> {
        let angles: Vec<f64> = SENTINEL2_BANDS
            .iter()
            .filter_map(|b| props.extra_f64(&key(b.name)))
            .collect();
        if angles.is_empty() {
            return Err(Error::DataQuality(format!(
                "{} has no per-band incidence angles",
                props.product_id
            )));
        }
        Ok(angles.iter().sum::<f64>() / angles.len() as f64)
    };
    let vza = mean_over_bands(incidence_zenith_key)?;
    let vaa = mean_over_bands(incidence_azimuth_key)?;

    Ok(ViewGeometry::new(sza, saa, vza, vaa))
}

/// Product id up to the processing level (`S2A_MSI` for `S2A_MSIL1C_...`).
pub fn short_product_id(product_id: &str) -> &str {
    product_id.split("L1C").next().unwrap_or(product_id)
}

/// `(DN + RADIO_ADD_OFFSET) / QUANTIFICATION_VALUE` for every MSI band present.
pub fn dn_to_toa(image: &Image) -> Result<Image> {
    let props = &image.properties;
    let quantification = props
        .extra_f64(QUANTIFICATION_VALUE)
        .unwrap_or(DEFAULT_QUANTIFICATION_VALUE);
    if quantification <= 0.0 {
        return Err(Error::DataQuality(format!(
            "{} has a non-positive quantification value",
            props.product_id
        )));
    }

    let mut properties = props.clone();
    properties.geometry = Some(view_geometry(image)?);
    properties.extras.insert(
        PRODUCT_ID.to_string(),
        Value::String(short_product_id(&props.product_id).to_string()),
    );

    let mut out = Image::new(properties);
    for band in SENTINEL2_BANDS {
        let Ok(dn) = image.band(band.name) else {
            warn!("{}: band {} not present", props.product_id, band.name);
            continue;
        };
        let offset = props.extra_f64(&radio_add_offset_key(band.name)).unwrap_or(0.0);
        let toa = dn.mapv(|v| ((v as f64 + offset) / quantification) as f32);
        out.add_band_unchecked(band.name, toa);
    }
    // Auxiliary rasters (cloud probability) ride along unscaled.
    for band in image.bands() {
        if band_by_name(&band.name).is_none() {
            out.add_band_unchecked(band.name.clone(), band.data.clone());
        }
    }
    Ok(out)
}

/// Resample every band onto the reference band grid for `scale` metres.
pub fn resample_to_scale(image: &Image, scale: u32) -> Result<Image> {
    let reference = band_by_scale(scale);
    let (rows, cols) = image.band(reference)?.dim();
    let pixel_size = band_by_name(reference)
        .map(|b| b.resolution_m as f64)
        .unwrap_or(scale as f64);
    debug!(
        "Resampling {} to {} grid ({}x{}, {} m)",
        image.properties.product_id, reference, cols, rows, pixel_size
    );

    let mut properties = image.properties.clone();
    let scale_factor = pixel_size / properties.pixel_size;
    properties.geotransform[1] *= scale_factor;
    properties.geotransform[5] *= scale_factor;
    properties.pixel_size = pixel_size;

    let mut out = Image::new(properties);
    for band in image.bands() {
        out.add_band(band.name.clone(), resample_band(&band.data, rows, cols)?)?;
    }
    Ok(out)
}

/// Convert one L1C scene to TOA reflectance at `scale` metres.
pub fn l1_to_toa(image: &Image, scale: u32) -> Result<Image> {
    info!(
        "Converting {} to TOA reflectance at {} m",
        image.properties.product_id, scale
    );
    resample_to_scale(&dn_to_toa(image)?, scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageProperties;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;
    use serde_json::json;

    fn scene() -> Image {
        let time = Utc.with_ymd_and_hms(2023, 6, 15, 15, 58, 19).unwrap();
        let mut props = ImageProperties::new("S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB", time);
        props.pixel_size = 10.0;
        props.extras.insert(MEAN_SOLAR_ZENITH_ANGLE.into(), json!(25.0));
        props.extras.insert(MEAN_SOLAR_AZIMUTH_ANGLE.into(), json!(350.0));
        props.extras.insert(incidence_zenith_key("B2"), json!(4.0));
        props.extras.insert(incidence_zenith_key("B5"), json!(6.0));
        props.extras.insert(incidence_azimuth_key("B2"), json!(10.0));
        props.extras.insert(incidence_azimuth_key("B5"), json!(20.0));
        props.extras.insert(radio_add_offset_key("B5"), json!(-1000.0));
        let mut img = Image::new(props);
        img.add_band_unchecked("B2", Array2::from_elem((4, 4), 1200.0));
        img.add_band_unchecked("B5", Array2::from_elem((2, 2), 1800.0));
        img
    }

    #[test]
    fn geometry_from_scene_properties() {
        let g = view_geometry(&scene()).unwrap();
        assert_relative_eq!(g.sza, 25.0);
        assert_relative_eq!(g.vza, 5.0);
        assert_relative_eq!(g.vaa, 15.0);
        assert_relative_eq!(g.raa, 25.0);
    }

    #[test]
    fn product_id_is_cut_at_processing_level() {
        assert_eq!(short_product_id("S2B_MSIL1C_20230615T155819"), "S2B_MSI");
        assert_eq!(short_product_id("NOLEVEL"), "NOLEVEL");
    }

    #[test]
    fn converts_and_resamples_to_reference_grid() {
        let toa = l1_to_toa(&scene(), 10).unwrap();
        assert_eq!(toa.shape(), Some((4, 4)));
        assert_relative_eq!(toa.band("B2").unwrap()[[0, 0]], 0.12, epsilon = 1e-6);
        assert_relative_eq!(toa.band("B5").unwrap()[[3, 3]], 0.08, epsilon = 1e-5);
        assert_eq!(toa.properties.extra_str(PRODUCT_ID), Some("S2A_MSI"));
        assert!(toa.properties.geometry.is_some());

        let coarse = l1_to_toa(&scene(), 20).unwrap();
        assert_eq!(coarse.shape(), Some((2, 2)));
        assert_relative_eq!(coarse.properties.pixel_size, 20.0);
    }

    #[test]
    fn missing_sun_angles_is_an_error() {
        let mut img = scene();
        img.properties.extras.remove(MEAN_SOLAR_ZENITH_ANGLE);
        assert!(matches!(dn_to_toa(&img), Err(Error::DataQuality(_))));
    }
}
