//! Water-quality products from surface reflectance.
//!
//! Every product reads `rhos_*` bands directly (remote-sensing reflectance is
//! derived as `rhos/π` where a formula needs it), so products never depend on
//! each other and the request order does not change the result. Product bands
//! are masked with [`compute_water_mask`].
use std::f32::consts::PI;

use ndarray::{Array2, Zip};
use tracing::{debug, info, warn};

use crate::core::image::Image;
use crate::core::masks::{
    CloudMaskParams, apply_mask, cirrus_mask, clear_sky_mask, non_water, toa_mask,
};
use crate::core::sensor::band_by_name;
use crate::core::settings::Settings;
use crate::error::Result;
use crate::types::WaterProduct;

/// Nechad et al. (2016) single-band semi-analytical algorithm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nechad {
    pub output: &'static str,
    pub band: &'static str,
    pub a: f32,
    pub c: f32,
}

impl Nechad {
    pub fn evaluate(&self, rho: f32) -> f32 {
        self.a * rho / (1.0 - rho / self.c)
    }
}

const OC2: [f32; 5] = [0.1977, -1.8117, 1.9743, -2.5635, -0.7218];
const OC3: [f32; 5] = [0.2412, -2.0546, 1.1776, -0.5538, -0.4570];

const SPM_665: Nechad = Nechad { output: "SPM_Nechad2016_665", band: "B4", a: 342.10, c: 0.19563 };
const SPM_704: Nechad = Nechad { output: "SPM_Nechad2016_704", band: "B5", a: 444.36, c: 0.18753 };
const SPM_739: Nechad = Nechad { output: "SPM_Nechad2016_739", band: "B6", a: 1517.00, c: 0.19736 };
const TUR_665: Nechad = Nechad { output: "TUR_Nechad2016_665", band: "B4", a: 366.14, c: 0.19563 };
const TUR_704: Nechad = Nechad { output: "TUR_Nechad2016_704", band: "B5", a: 439.09, c: 0.18753 };
const TUR_739: Nechad = Nechad { output: "TUR_Nechad2016_739", band: "B6", a: 1590.66, c: 0.19736 };

pub fn nechad(product: WaterProduct) -> Option<Nechad> {
    match product {
        WaterProduct::SpmNechad2016 => Some(SPM_665),
        WaterProduct::SpmNechad2016_704 => Some(SPM_704),
        WaterProduct::SpmNechad2016_740 => Some(SPM_739),
        WaterProduct::TurNechad2016 => Some(TUR_665),
        WaterProduct::TurNechad2016_704 => Some(TUR_704),
        WaterProduct::TurNechad2016_740 => Some(TUR_739),
        WaterProduct::ChlOc2
        | WaterProduct::ChlOc3
        | WaterProduct::ChlReMishra
        | WaterProduct::Ndwi
        | WaterProduct::PsdbRed
        | WaterProduct::PsdbGreen
        | WaterProduct::Rrs => None,
    }
}

fn nechad_band(image: &Image, n: &Nechad) -> Result<Vec<(String, Array2<f32>)>> {
    let data = rhos(image, n.band)?.mapv(|r| n.evaluate(r));
    Ok(vec![(n.output.to_string(), data)])
}

/// `10^(a0 + a1·x + a2·x² + a3·x³ + a4·x⁴)` with `x = log10(ratio)`.
pub fn ocx(ratio: f32, coefficients: &[f32; 5]) -> f32 {
    let x = ratio.log10();
    let exponent = coefficients
        .iter()
        .rev()
        .fold(0.0f32, |acc, a| acc * x + a);
    10f32.powf(exponent)
}

fn rhos<'a>(image: &'a Image, band: &str) -> Result<&'a Array2<f32>> {
    image.band(&format!("rhos_{band}"))
}

fn normalized_difference(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    Zip::from(a).and(b).par_map_collect(|a, b| (a - b) / (a + b))
}

/// `ln(1000π·Rrs_a) / ln(1000π·Rrs_b)`; with `Rrs = rhos/π` this is `ln(1000·rhos)`.
fn stumpf_ratio(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    Zip::from(a).and(b).par_map_collect(|a, b| {
        let ra = 1000.0 * PI * (a / PI);
        let rb = 1000.0 * PI * (b / PI);
        ra.ln() / rb.ln()
    })
}

/// Output bands of one product, computed from `rhos_*` bands of `image`.
pub fn compute_product(image: &Image, product: WaterProduct) -> Result<Vec<(String, Array2<f32>)>> {
    let bands = match product {
        WaterProduct::SpmNechad2016 => nechad_band(image, &SPM_665)?,
        WaterProduct::SpmNechad2016_704 => nechad_band(image, &SPM_704)?,
        WaterProduct::SpmNechad2016_740 => nechad_band(image, &SPM_739)?,
        WaterProduct::TurNechad2016 => nechad_band(image, &TUR_665)?,
        WaterProduct::TurNechad2016_704 => nechad_band(image, &TUR_704)?,
        WaterProduct::TurNechad2016_740 => nechad_band(image, &TUR_739)?,
        WaterProduct::ChlOc2 => {
            let (b2, b3) = (rhos(image, "B2")?, rhos(image, "B3")?);
            let chl = Zip::from(b2).and(b3).par_map_collect(|a, b| ocx(a / b, &OC2));
            vec![("chl_oc2".to_string(), chl)]
        }
        WaterProduct::ChlOc3 => {
            let (b1, b2, b3) = (rhos(image, "B1")?, rhos(image, "B2")?, rhos(image, "B3")?);
            let chl = Zip::from(b1)
                .and(b2)
                .and(b3)
                .par_map_collect(|a, b, c| ocx(a.max(*b) / c, &OC3));
            vec![("chl_oc3".to_string(), chl)]
        }
        WaterProduct::ChlReMishra => {
            let ndci = normalized_difference(rhos(image, "B5")?, rhos(image, "B4")?);
            let chl = ndci.mapv(|n| 14.039 + 86.11 * n + 194.325 * n * n);
            vec![("chl_re_mishra".to_string(), chl)]
        }
        WaterProduct::Ndwi => {
            // Rrs scaling cancels in a normalized difference
            let ndwi = normalized_difference(rhos(image, "B3")?, rhos(image, "B8")?);
            vec![("ndwi".to_string(), ndwi)]
        }
        WaterProduct::PsdbRed => {
            let p = stumpf_ratio(rhos(image, "B2")?, rhos(image, "B4")?);
            vec![("pSDB_red".to_string(), p)]
        }
        WaterProduct::PsdbGreen => {
            let p = stumpf_ratio(rhos(image, "B2")?, rhos(image, "B3")?);
            vec![("pSDB_green".to_string(), p)]
        }
        WaterProduct::Rrs => image
            .select_prefix("rhos_")
            .filter_map(|b| {
                let name = b.name.trim_start_matches("rhos_");
                band_by_name(name).map(|_| (format!("Rrs_{name}"), b.data.mapv(|v| v / PI)))
            })
            .collect(),
    };
    Ok(bands)
}

/// `true` for water pixels that pass every L2W mask test.
///
/// Non-water pixels have `rhot_B11` at or above `l2w_mask_threshold`. Cirrus
/// is tested on `rhot_B10` when the scene has it. Bright pixels fail on any
/// `rhot_*` band. Cloud and shadow are added when `s2_cloud_proba` is on.
pub fn compute_water_mask(image: &Image, settings: &Settings) -> Result<Array2<bool>> {
    let mut mask = non_water(image, "rhot_B11", settings.l2w_mask_threshold)?;
    let mut and = |other: Array2<bool>| {
        Zip::from(&mut mask).and(&other).for_each(|m, o| *m &= *o);
    };

    if image.has_band("rhot_B10") {
        and(cirrus_mask(image, "rhot_B10", settings.l2w_mask_cirrus_threshold)?);
    } else {
        debug!("No rhot_B10, skipping cirrus mask");
    }
    let toa_bands: Vec<String> = image
        .select_prefix("rhot_")
        .map(|b| b.name.clone())
        .collect();
    for band in toa_bands {
        and(toa_mask(image, &band, settings.l2w_mask_high_toa_threshold)?);
    }
    if settings.s2_cloud_proba {
        and(clear_sky_mask(image, &CloudMaskParams::from_settings(settings))?);
    }
    Ok(mask)
}

/// Add every product in `settings.l2w_parameters` to `image`, masked to water.
/// Duplicate requests are computed once; existing bands are overwritten.
pub fn compute_water_bands(image: &mut Image, settings: &Settings) -> Result<()> {
    let mut products: Vec<WaterProduct> = Vec::with_capacity(settings.l2w_parameters.len());
    for p in &settings.l2w_parameters {
        if !products.contains(p) {
            products.push(*p);
        }
    }
    if products.is_empty() {
        return Ok(());
    }

    let mask = compute_water_mask(image, settings)?;
    let water = mask.iter().filter(|v| **v).count();
    if water == 0 {
        warn!(
            "{}: no pixels pass the water mask",
            image.properties.product_id
        );
    }

    let mut outputs = Vec::new();
    for product in &products {
        outputs.extend(compute_product(image, *product)?);
    }
    for (name, mut data) in outputs {
        apply_mask(&mut data, &mask);
        image.add_band(name, data)?;
    }
    info!(
        "{}: added {} ({} water pixels)",
        image.properties.product_id,
        products
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        water
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::ImageProperties;
    use crate::error::Error;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use ndarray::array;

    fn image() -> Image {
        let mut img = Image::new(ImageProperties::new("S2A_TEST", Utc::now()));
        for (band, rho) in [
            ("B1", 0.030),
            ("B2", 0.040),
            ("B3", 0.050),
            ("B4", 0.030),
            ("B5", 0.020),
            ("B6", 0.010),
            ("B8", 0.005),
        ] {
            img.add_band(format!("rhos_{band}"), Array2::from_elem((1, 2), rho))
                .unwrap();
            img.add_band(format!("rhot_{band}"), Array2::from_elem((1, 2), 0.1))
                .unwrap();
        }
        // second pixel is land
        img.add_band("rhot_B11", array![[0.01, 0.2]]).unwrap();
        img
    }

    #[test]
    fn nechad_spm_matches_formula() {
        let out = compute_product(&image(), WaterProduct::SpmNechad2016).unwrap();
        assert_eq!(out[0].0, "SPM_Nechad2016_665");
        let expected = 342.10 * 0.03 / (1.0 - 0.03 / 0.19563);
        assert_relative_eq!(out[0].1[[0, 0]], expected, epsilon = 1e-3);
    }

    #[test]
    fn every_product_has_a_formula() {
        let img = image();
        for product in WaterProduct::ALL {
            let out = compute_product(&img, *product).unwrap();
            assert!(!out.is_empty(), "{} produced no band", product.as_str());
            assert_eq!(nechad(*product).is_some(), product.as_str().contains("nechad"));
        }
    }

    #[test]
    fn oc2_uses_log10_band_ratio() {
        let chl = compute_product(&image(), WaterProduct::ChlOc2).unwrap();
        let x = (0.04f32 / 0.05).log10();
        let e = 0.1977 - 1.8117 * x + 1.9743 * x.powi(2) - 2.5635 * x.powi(3)
            - 0.7218 * x.powi(4);
        assert_relative_eq!(chl[0].1[[0, 0]], 10f32.powf(e), epsilon = 1e-4);
    }

    #[test]
    fn oc3_takes_max_blue() {
        let chl = compute_product(&image(), WaterProduct::ChlOc3).unwrap();
        assert_relative_eq!(chl[0].1[[0, 0]], ocx(0.04 / 0.05, &OC3), epsilon = 1e-5);
    }

    #[test]
    fn rrs_covers_every_rhos_band() {
        let rrs = compute_product(&image(), WaterProduct::Rrs).unwrap();
        assert_eq!(rrs.len(), 7);
        assert_eq!(rrs[1].0, "Rrs_B2");
        assert_relative_eq!(rrs[1].1[[0, 0]], 0.04 / PI, epsilon = 1e-7);
    }

    #[test]
    fn products_are_masked_to_water() {
        let mut img = image();
        let settings = Settings {
            l2w_parameters: vec![WaterProduct::Ndwi, WaterProduct::ChlReMishra],
            ..Settings::default()
        };
        compute_water_bands(&mut img, &settings).unwrap();
        let ndwi = img.band("ndwi").unwrap();
        assert_relative_eq!(ndwi[[0, 0]], (0.05 - 0.005) / (0.05 + 0.005), epsilon = 1e-5);
        assert!(ndwi[[0, 1]].is_nan());
        assert!(img.has_band("chl_re_mishra"));
    }

    #[test]
    fn request_order_and_duplicates_do_not_matter() {
        let products = [WaterProduct::PsdbRed, WaterProduct::Rrs, WaterProduct::PsdbGreen];
        let mut forward = image();
        compute_water_bands(
            &mut forward,
            &Settings {
                l2w_parameters: products.to_vec(),
                ..Settings::default()
            },
        )
        .unwrap();
        let mut reversed = image();
        let mut requested: Vec<_> = products.iter().rev().copied().collect();
        requested.push(WaterProduct::Rrs);
        compute_water_bands(
            &mut reversed,
            &Settings {
                l2w_parameters: requested,
                ..Settings::default()
            },
        )
        .unwrap();

        for band in ["pSDB_red", "pSDB_green", "Rrs_B4"] {
            let a = forward.band(band).unwrap();
            let b = reversed.band(band).unwrap();
            assert_relative_eq!(a[[0, 0]], b[[0, 0]]);
        }
        assert_eq!(forward.bands().len(), reversed.bands().len());
    }

    #[test]
    fn recomputing_overwrites_bands() {
        let mut img = image();
        let settings = Settings {
            l2w_parameters: vec![WaterProduct::TurNechad2016],
            ..Settings::default()
        };
        compute_water_bands(&mut img, &settings).unwrap();
        let count = img.bands().len();
        compute_water_bands(&mut img, &settings).unwrap();
        assert_eq!(img.bands().len(), count);
    }

    #[test]
    fn missing_input_band_is_reported() {
        let mut img = image();
        img.remove_band("rhos_B6");
        let err = compute_product(&img, WaterProduct::SpmNechad2016_740).unwrap_err();
        assert!(matches!(err, Error::MissingBand { .. }));
    }
}
