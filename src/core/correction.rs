//! ACOLITE atmospheric correction of Sentinel-2 scenes.
//!
//! [`Acolite`] runs the whole chain for a collection: L1 conversion, ancillary
//! resolution, dark spectrum fitting (or a fixed AOT), surface reflectance,
//! optional residual glint removal and water-quality products. Configuration
//! and missing LUTs are checked before the first scene is read.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::ImageCollection;
use crate::core::ancillary::{AncillaryProvider, EarthdataCredentials};
use crate::core::dsf::{
    self, AtmosphereModel, AtmosphericParameter, Geometry, LutProvider, dark_spectrum,
};
use crate::core::image::Image;
use crate::core::l1_convert::l1_to_toa;
use crate::core::masks::{CLOUD_PROBABILITY_BAND, mask_negative_reflectance};
use crate::core::sensor::{GLINT_REFERENCE_BANDS, GLINT_WIND, band_by_name, band_id};
use crate::core::settings::{Ancillary, Settings};
use crate::core::water_quality;
use crate::error::{Error, Result};
use crate::types::{GlintCorrectionMethod, Sensor};

/// Property key under which the applied correction is recorded on each image.
pub const CORRECTION_PROPERTY: &str = "correction";

/// Per-band atmospheric parameters of the selected model at the retrieved AOT.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphericCorrection {
    pub model: String,
    pub taua: f64,
    /// Keys are image band names (`"B2"`)
    pub romix: BTreeMap<String, f64>,
    pub dutott: BTreeMap<String, f64>,
    pub astot: BTreeMap<String, f64>,
    pub tg: BTreeMap<String, f64>,
    /// Sky glint of each band relative to the SWIR reference; empty when
    /// residual glint correction is off
    pub glint_ave: BTreeMap<String, f64>,
}

/// What was applied to one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCorrection {
    pub product_id: String,
    pub model: String,
    pub taua: f64,
    pub fixed_aot: bool,
    /// Selection criterion and its score; absent for a fixed AOT
    pub selection_parameter: Option<String>,
    pub selection_score: Option<f64>,
    pub taua_std: Option<f64>,
    pub taua_cv: Option<f64>,
    pub dark_spectrum: BTreeMap<String, f64>,
    pub ancillary: Ancillary,
    pub glint_corrected: bool,
}

/// Corrected images with the settings as they were applied.
#[derive(Debug, Clone)]
pub struct CorrectionResult {
    pub images: Vec<Image>,
    pub applied: Vec<AppliedCorrection>,
    /// Input settings with the ancillary values of the last corrected scene
    pub settings: Settings,
}

pub struct Acolite {
    luts: Arc<dyn LutProvider>,
    settings: Settings,
    ancillary: Option<Arc<dyn AncillaryProvider>>,
}

impl std::fmt::Debug for Acolite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acolite")
            .field("settings", &self.settings)
            .field("ancillary_provider", &self.ancillary.is_some())
            .finish()
    }
}

impl Acolite {
    pub fn new(luts: Arc<dyn LutProvider>, settings: Settings) -> Self {
        Self {
            luts,
            settings,
            ancillary: None,
        }
    }

    pub fn with_ancillary_provider(mut self, provider: Arc<dyn AncillaryProvider>) -> Self {
        self.ancillary = Some(provider);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Configuration checks that need no pixels: ancillary provider, LUTs
    /// for every sensor, and the fixed LUT name.
    pub fn preflight<I: IntoIterator<Item = Sensor>>(&self, sensors: I) -> Result<()> {
        if self.settings.ancillary_data && self.ancillary.is_none() {
            return Err(Error::MissingDependency(
                "ancillary_data is enabled but no ancillary provider is configured".into(),
            ));
        }
        let sensors: BTreeSet<Sensor> = sensors.into_iter().collect();
        for sensor in sensors {
            let models = self.luts.aerosol_models(sensor)?;
            if let Some((_, lut)) = self.settings.fixed_aot() {
                if !models.iter().any(|m| m.name() == lut) {
                    return Err(unknown_lut(lut, &models));
                }
            }
        }
        Ok(())
    }

    /// Correct every scene of `collection`.
    pub fn correct(&self, collection: &ImageCollection) -> Result<CorrectionResult> {
        self.preflight(
            collection
                .scenes()
                .iter()
                .map(|s| Sensor::from_product_id(&s.product_id)),
        )?;
        let collection = if self.settings.s2_cloud_proba {
            collection.with_cloud_probability()
        } else {
            collection.clone()
        };
        let target_res = self.settings.s2_target_res;
        self.correct_each((0..collection.len()).map(|index| {
            collection
                .materialize(index)
                .and_then(|l1| l1_to_toa(&l1, target_res))
        }))
    }

    /// Correct L1C images already in memory (digital numbers).
    pub fn correct_images(&self, images: Vec<Image>) -> Result<CorrectionResult> {
        self.preflight(
            images
                .iter()
                .map(|i| Sensor::from_product_id(&i.properties.product_id)),
        )?;
        let target_res = self.settings.s2_target_res;
        self.correct_each(images.into_iter().map(|l1| l1_to_toa(&l1, target_res)))
    }

    /// TOA reflectance images to surface reflectance, then water products.
    pub fn l1_to_l2(&self, images: Vec<Image>) -> Result<CorrectionResult> {
        self.correct_each(images.into_iter().map(Ok))
    }

    /// Pulls one TOA image at a time, so only the current scene's TOA stack
    /// is alive while it is corrected.
    fn correct_each<I>(&self, toa: I) -> Result<CorrectionResult>
    where
        I: IntoIterator<Item = Result<Image>>,
    {
        let mut corrected = Vec::new();
        let mut applied = Vec::new();
        let mut last_ancillary = None;

        for image in toa {
            let (mut l2r, record) = self.correct_image(&image?)?;
            if !self.settings.l2w_parameters.is_empty() {
                water_quality::compute_water_bands(&mut l2r, &self.settings)?;
            }
            last_ancillary = Some(record.ancillary);
            applied.push(record);
            corrected.push(l2r);
        }

        let ancillary =
            last_ancillary.unwrap_or_else(|| self.settings.resolve_ancillary(None));
        Ok(CorrectionResult {
            images: corrected,
            applied,
            settings: self.settings.with_ancillary(&ancillary),
        })
    }

    /// Ancillary values for one scene.
    pub fn ancillary_for(&self, image: &Image) -> Result<Ancillary> {
        if !self.settings.ancillary_data {
            return Ok(self.settings.resolve_ancillary(None));
        }
        let provider = self.ancillary.as_ref().ok_or_else(|| {
            Error::MissingDependency(
                "ancillary_data is enabled but no ancillary provider is configured".into(),
            )
        })?;
        let props = &image.properties;
        let footprint = props.footprint.ok_or_else(|| {
            Error::DataQuality(format!(
                "{} has no footprint to locate ancillary data",
                props.product_id
            ))
        })?;
        let lon = (footprint.west + footprint.east) / 2.0;
        let lat = (footprint.south + footprint.north) / 2.0;
        let credentials = EarthdataCredentials::resolve(&self.settings);
        if credentials.is_none() {
            debug!("No Earthdata credentials configured");
        }
        let retrieved = provider.ancillary(props.time_start, lon, lat, credentials.as_ref())?;
        Ok(self.settings.resolve_ancillary(Some(&retrieved)))
    }

    /// Correct one TOA image. The result holds `rhot_*` and `rhos_*` bands.
    pub fn correct_image(&self, toa: &Image) -> Result<(Image, AppliedCorrection)> {
        let props = &toa.properties;
        let sensor = Sensor::from_product_id(&props.product_id);
        let view = props.geometry()?;
        let ancillary = self.ancillary_for(toa)?;
        let geometry = Geometry::from_view(&view, ancillary.pressure);
        info!(
            "Correcting {} ({}): sza={:.2} vza={:.2} raa={:.2} pressure={:.2}",
            props.product_id, sensor, view.sza, view.vza, view.raa, ancillary.pressure
        );

        let rhot = rhot_image(toa);
        let models = self.luts.aerosol_models(sensor)?;
        let mut tg = BTreeMap::new();
        for band in msi_bands(&rhot) {
            let t = self
                .luts
                .gas_transmittance(sensor, band_id(&band), &view, &ancillary)?;
            tg.insert(band, t);
        }

        let (model, taua, mut record) = match self.settings.fixed_aot() {
            Some((aot, lut)) => {
                let model = models
                    .iter()
                    .find(|m| m.name() == lut)
                    .cloned()
                    .ok_or_else(|| unknown_lut(lut, &models))?;
                info!("Using fixed AOT {:.3} with {}", aot, lut);
                let record = AppliedCorrection {
                    product_id: props.product_id.clone(),
                    model: lut.to_string(),
                    taua: aot,
                    fixed_aot: true,
                    selection_parameter: None,
                    selection_score: None,
                    taua_std: None,
                    taua_cv: None,
                    dark_spectrum: BTreeMap::new(),
                    ancillary,
                    glint_corrected: false,
                };
                (model, aot, record)
            }
            None => {
                let dark = dark_spectrum::extract(&rhot, &self.settings)?;
                let fit = dsf::fit_dark_spectrum(&models, &dark, &tg, &geometry, &self.settings)?;
                let record = AppliedCorrection {
                    product_id: props.product_id.clone(),
                    model: fit.fit.model.clone(),
                    taua: fit.fit.taua,
                    fixed_aot: false,
                    selection_parameter: Some(
                        fit.selection.criterion.parameter_name().to_string(),
                    ),
                    selection_score: Some(fit.selection.score),
                    taua_std: Some(fit.fit.taua_std),
                    taua_cv: Some(fit.fit.taua_cv),
                    dark_spectrum: dark.iter().map(|(b, v)| (b.to_string(), v)).collect(),
                    ancillary,
                    glint_corrected: false,
                };
                (fit.model, fit.fit.taua, record)
            }
        };

        let mut ac = atmospheric_parameters(model.as_ref(), &rhot, &geometry, taua, tg)?;
        let glint = self.settings.dsf_residual_glint_correction
            && self.settings.dsf_residual_glint_correction_method
                == GlintCorrectionMethod::Alternative;
        if glint {
            let sky = self.luts.sky_glint(sensor, model.name())?;
            ac.glint_ave = glint_ratios(sky.as_ref(), &rhot, &geometry, taua)?;
        }

        let mut l2r = compute_rhos(&rhot, &ac, &self.settings)?;
        if glint {
            deglint_alternative(
                &mut l2r,
                &ac.glint_ave,
                self.settings.glint_mask_rhos_threshold,
            )?;
            record.glint_corrected = true;
        }
        l2r.properties.extras.insert(
            CORRECTION_PROPERTY.to_string(),
            serde_json::to_value(&record)?,
        );
        Ok((l2r, record))
    }
}

fn unknown_lut(lut: &str, models: &[Arc<dyn AtmosphereModel>]) -> Error {
    let available: Vec<&str> = models.iter().map(|m| m.name()).collect();
    Error::InvalidSetting {
        key: "dsf_fixed_lut".to_string(),
        reason: format!(
            "LUT {:?} not found; available LUTs: {}",
            lut,
            available.join(", ")
        ),
    }
}

/// MSI bands of `image` renamed to `rhot_*`, with auxiliary bands carried over.
fn rhot_image(toa: &Image) -> Image {
    let mut out = Image::new(toa.properties.clone());
    for band in toa.bands() {
        if band_by_name(&band.name).is_some() {
            out.add_band_unchecked(format!("rhot_{}", band.name), band.data.clone());
        } else {
            out.add_band_unchecked(band.name.clone(), band.data.clone());
        }
    }
    out
}

/// MSI band names (`"B2"`) present as `rhot_*` bands, in image order.
fn msi_bands(rhot: &Image) -> Vec<String> {
    rhot.select_prefix("rhot_")
        .map(|b| b.name.trim_start_matches("rhot_").to_string())
        .collect()
}

/// Evaluate `model` at `taua` for every band of `rhot`.
pub fn atmospheric_parameters(
    model: &dyn AtmosphereModel,
    rhot: &Image,
    geometry: &Geometry,
    taua: f64,
    tg: BTreeMap<String, f64>,
) -> Result<AtmosphericCorrection> {
    let mut ac = AtmosphericCorrection {
        model: model.name().to_string(),
        taua,
        romix: BTreeMap::new(),
        dutott: BTreeMap::new(),
        astot: BTreeMap::new(),
        tg,
        glint_ave: BTreeMap::new(),
    };
    for band in msi_bands(rhot) {
        let id = band_id(&band);
        for parameter in AtmosphericParameter::ALL {
            let value = model.parameter(parameter, id, geometry, taua)?;
            let table = match parameter {
                AtmosphericParameter::Romix => &mut ac.romix,
                AtmosphericParameter::Dutott => &mut ac.dutott,
                AtmosphericParameter::Astot => &mut ac.astot,
            };
            table.insert(band.clone(), value);
        }
    }
    Ok(ac)
}

/// Sky glint of every band divided by the mean of the SWIR reference bands.
fn glint_ratios(
    sky: &dyn dsf::SkyGlintModel,
    rhot: &Image,
    geometry: &Geometry,
    taua: f64,
) -> Result<BTreeMap<String, f64>> {
    let mut glint = BTreeMap::new();
    for band in msi_bands(rhot) {
        glint.insert(
            band.clone(),
            sky.sky_glint(band_id(&band), geometry, GLINT_WIND, taua)?,
        );
    }
    let [b11, b12] = GLINT_REFERENCE_BANDS;
    let reference = match (glint.get(b11), glint.get(b12)) {
        (Some(a), Some(b)) => (a + b) / 2.0,
        _ => {
            return Err(Error::missing_band(format!("rhot_{b11}/rhot_{b12}")));
        }
    };
    Ok(glint
        .into_iter()
        .map(|(band, g)| (band, g / reference))
        .collect())
}

/// Surface reflectance from TOA reflectance:
/// `rhos = x / (dutott + astot·x)` with `x = rhot/tg - romix`.
///
/// Returns an image with `rhot_*` and `rhos_*` bands for every corrected band
/// and the cloud probability band when present. Negative `rhos` is masked
/// (`l2r_mask_negative_rhos`) or rejected (`strict_validation`).
pub fn compute_rhos(
    rhot: &Image,
    ac: &AtmosphericCorrection,
    settings: &Settings,
) -> Result<Image> {
    let mut out = Image::new(rhot.properties.clone());
    for band in msi_bands(rhot) {
        let name = format!("rhot_{band}");
        let toa = rhot.band(&name)?;
        let lookup = |table: &BTreeMap<String, f64>| {
            table.get(&band).copied().ok_or_else(|| {
                Error::Processing(format!("no atmospheric parameters for {band}"))
            })
        };
        let romix = lookup(&ac.romix)?;
        let dutott = lookup(&ac.dutott)?;
        let astot = lookup(&ac.astot)?;
        let tg = ac.tg.get(&band).copied().unwrap_or(1.0);

        let mut rhos = toa.clone();
        rhos.par_mapv_inplace(|v| {
            let x = v as f64 / tg - romix;
            (x / (dutott + astot * x)) as f32
        });
        out.add_band(name, toa.clone())?;

        let rhos_name = format!("rhos_{band}");
        out.add_band(rhos_name.as_str(), rhos)?;
        if settings.strict_validation {
            let negative = out.band(&rhos_name)?.iter().filter(|v| **v < 0.0).count();
            if negative > 0 {
                return Err(Error::DataQuality(format!(
                    "{}: {} negative surface reflectance pixels in {}",
                    rhot.properties.product_id, negative, rhos_name
                )));
            }
        } else if settings.l2r_mask_negative_rhos {
            let masked = mask_negative_reflectance(&mut out, &rhos_name)?;
            if masked > 0 {
                debug!("{}: masked {} negative pixels", rhos_name, masked);
            }
        }
    }
    if let Ok(probability) = rhot.band(CLOUD_PROBABILITY_BAND) {
        out.add_band(CLOUD_PROBABILITY_BAND, probability.clone())?;
    }
    Ok(out)
}

/// Remove residual sun glint using the SWIR bands as reference.
///
/// `gc_ref = mean(rhos_B11, rhos_B12)`. Where `0 < gc_ref < glint_max` each
/// band loses `gc_ref · glint_ave[b] / mean(glint_ave[B11], glint_ave[B12])`;
/// other pixels are unchanged. Adds `glint_mean` (`gc_ref`).
pub fn deglint_alternative(
    image: &mut Image,
    glint_ave: &BTreeMap<String, f64>,
    glint_max: f64,
) -> Result<()> {
    let [b11, b12] = GLINT_REFERENCE_BANDS;
    let gc_ref = {
        let r11 = image.band(&format!("rhos_{b11}"))?;
        let r12 = image.band(&format!("rhos_{b12}"))?;
        Zip::from(r11).and(r12).map_collect(|a, b| (a + b) / 2.0)
    };
    let gc_sur_mean = match (glint_ave.get(b11), glint_ave.get(b12)) {
        (Some(a), Some(b)) => (a + b) / 2.0,
        _ => {
            return Err(Error::Processing(
                "glint ratios lack the SWIR reference bands".into(),
            ));
        }
    };
    let in_glint = gc_ref.mapv(|g| g > 0.0 && (g as f64) < glint_max);

    let bands: Vec<String> = image
        .select_prefix("rhos_")
        .map(|b| b.name.trim_start_matches("rhos_").to_string())
        .collect();
    for band in bands {
        let Some(ratio) = glint_ave.get(&band).map(|g| g / gc_sur_mean) else {
            continue;
        };
        if !ratio.is_finite() {
            warn!("Skipping glint correction of {}: ratio {}", band, ratio);
            continue;
        }
        let data = image.band_mut(&format!("rhos_{band}"))?;
        Zip::from(data)
            .and(&gc_ref)
            .and(&in_glint)
            .for_each(|v, g, inside| {
                if *inside {
                    let corrected = *v - (*g as f64 * ratio) as f32;
                    *v = if corrected < 0.0 { f32::NAN } else { corrected };
                }
            });
    }
    image.add_band("glint_mean", gc_ref)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dsf::SkyGlintModel;
    use crate::core::dsf::testing::{FlatGlint, LinearModel};
    use crate::core::image::{ImageProperties, ViewGeometry};
    use crate::types::WaterProduct;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use ndarray::{Array2, array};

    const BANDS: [&str; 4] = ["B2", "B3", "B11", "B12"];

    /// Provider with two linear models; MOD2 fits the scene exactly at tau 0.2.
    struct TestLuts {
        glint: Vec<(String, f64)>,
    }

    fn model(name: &str, offset: f64) -> LinearModel {
        LinearModel::new(
            name,
            &[
                ("2", 0.01 + offset, 0.1),
                ("3", 0.008, 0.06),
                ("11", 0.0, 0.01),
                ("12", 0.0, 0.01),
            ],
        )
    }

    impl LutProvider for TestLuts {
        fn aerosol_models(&self, _sensor: Sensor) -> Result<Vec<Arc<dyn AtmosphereModel>>> {
            Ok(vec![
                Arc::new(model("ACOLITE-LUT-202110-MOD1", 0.004)),
                Arc::new(model("ACOLITE-LUT-202110-MOD2", 0.0)),
            ])
        }

        fn sky_glint(&self, _sensor: Sensor, _model: &str) -> Result<Arc<dyn SkyGlintModel>> {
            Ok(Arc::new(FlatGlint(self.glint.clone())))
        }

        fn gas_transmittance(
            &self,
            _sensor: Sensor,
            _band: &str,
            _view: &ViewGeometry,
            _ancillary: &Ancillary,
        ) -> Result<f64> {
            Ok(1.0)
        }
    }

    fn luts() -> Arc<dyn LutProvider> {
        Arc::new(TestLuts {
            glint: vec![
                ("2".into(), 2.0),
                ("3".into(), 1.5),
                ("11".into(), 1.0),
                ("12".into(), 1.0),
            ],
        })
    }

    fn toa_image() -> Image {
        let time = Utc.with_ymd_and_hms(2023, 6, 15, 15, 58, 19).unwrap();
        let mut props = ImageProperties::new("S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB", time);
        props.geometry = Some(ViewGeometry::new(30.0, 150.0, 5.0, 100.0));
        let mut img = Image::new(props);
        // Darkest pixels match MOD2 at tau 0.2: B2 0.03, B3 0.02.
        img.add_band("B2", array![[0.03, 0.08], [0.10, 0.12]]).unwrap();
        img.add_band("B3", array![[0.02, 0.07], [0.09, 0.11]]).unwrap();
        img.add_band("B11", array![[0.01, 0.03], [0.02, 0.2]]).unwrap();
        img.add_band("B12", array![[0.01, 0.01], [0.02, 0.2]]).unwrap();
        img
    }

    #[test]
    fn dark_spectrum_fit_selects_matching_model() {
        let acolite = Acolite::new(luts(), Settings::default());
        let (l2r, record) = acolite.correct_image(&toa_image()).unwrap();
        assert_eq!(record.model, "ACOLITE-LUT-202110-MOD2");
        assert_relative_eq!(record.taua, 0.2, epsilon = 1e-6);
        assert!(!record.fixed_aot);
        assert_eq!(record.selection_parameter.as_deref(), Some("rmsd"));

        for band in BANDS {
            assert!(l2r.has_band(&format!("rhot_{band}")));
            assert!(l2r.has_band(&format!("rhos_{band}")));
        }
        // romix(0.2) = 0.03 for B2, dutott = 1, astot = 0
        assert_relative_eq!(l2r.band("rhos_B2").unwrap()[[0, 1]], 0.05, epsilon = 1e-6);
        assert!(l2r.properties.extras.contains_key(CORRECTION_PROPERTY));
    }

    #[test]
    fn fixed_aot_bypasses_the_fit() {
        let settings = Settings {
            dsf_fixed_aot: Some(0.1),
            dsf_fixed_lut: Some("ACOLITE-LUT-202110-MOD1".into()),
            ..Settings::default()
        };
        let (l2r, record) = Acolite::new(luts(), settings)
            .correct_image(&toa_image())
            .unwrap();
        assert!(record.fixed_aot);
        assert_eq!(record.model, "ACOLITE-LUT-202110-MOD1");
        assert!(record.dark_spectrum.is_empty());
        // romix(0.1) = 0.024 for MOD1 B2
        assert_relative_eq!(l2r.band("rhos_B2").unwrap()[[1, 0]], 0.076, epsilon = 1e-6);
    }

    #[test]
    fn unknown_fixed_lut_lists_available() {
        let settings = Settings {
            dsf_fixed_aot: Some(0.1),
            dsf_fixed_lut: Some("ACOLITE-LUT-202110-MOD9".into()),
            ..Settings::default()
        };
        let err = Acolite::new(luts(), settings)
            .preflight([Sensor::S2A])
            .unwrap_err();
        assert!(err.is_configuration());
        let msg = err.to_string();
        assert!(msg.contains("MOD9"));
        assert!(msg.contains("ACOLITE-LUT-202110-MOD1"));
        assert!(msg.contains("ACOLITE-LUT-202110-MOD2"));
    }

    #[test]
    fn ancillary_without_provider_fails_fast() {
        let settings = Settings {
            ancillary_data: true,
            ..Settings::default()
        };
        let err = Acolite::new(luts(), settings)
            .correct_images(vec![toa_image()])
            .unwrap_err();
        assert!(matches!(err, Error::MissingDependency(_)));
    }

    #[test]
    fn negative_reflectance_is_masked_or_rejected() {
        // romix(0.5) = 0.064 for MOD1 B2, above the darkest pixel
        let fixed = Settings {
            dsf_fixed_aot: Some(0.5),
            dsf_fixed_lut: Some("ACOLITE-LUT-202110-MOD1".into()),
            ..Settings::default()
        };
        let (l2r, _) = Acolite::new(luts(), fixed.clone())
            .correct_image(&toa_image())
            .unwrap();
        assert!(l2r.band("rhos_B2").unwrap()[[0, 0]].is_nan());
        assert!(l2r.band("rhos_B2").unwrap()[[1, 1]] > 0.0);

        let strict = Settings {
            strict_validation: true,
            ..fixed
        };
        let err = Acolite::new(luts(), strict)
            .correct_image(&toa_image())
            .unwrap_err();
        assert!(matches!(err, Error::DataQuality(_)));
    }

    #[test]
    fn result_settings_carry_applied_ancillary() {
        let settings = Settings {
            uoz: Some(0.25),
            ..Settings::default()
        };
        let acolite = Acolite::new(luts(), settings);
        let result = acolite.l1_to_l2(vec![toa_image()]).unwrap();
        assert_eq!(result.settings.uoz, Some(0.25));
        assert_eq!(result.settings.uwv, Some(1.5));
        assert_eq!(result.settings.pressure, Some(1013.25));
        assert_eq!(result.applied.len(), 1);
    }

    #[test]
    fn water_products_are_appended() {
        let settings = Settings {
            l2w_parameters: vec![WaterProduct::ChlOc2, WaterProduct::Rrs],
            l2w_mask_high_toa_threshold: 1.0,
            ..Settings::default()
        };
        let result = Acolite::new(luts(), settings)
            .l1_to_l2(vec![toa_image()])
            .unwrap();
        let img = &result.images[0];
        assert!(img.has_band("chl_oc2"));
        assert!(img.has_band("Rrs_B2"));
    }

    #[test]
    fn deglint_only_touches_glinted_pixels() {
        let time = Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap();
        let mut img = Image::new(ImageProperties::new("S2A_X", time));
        img.add_band("rhos_B2", array![[0.05, 0.05, 0.05]]).unwrap();
        img.add_band("rhos_B11", array![[0.02, 0.2, 0.0]]).unwrap();
        img.add_band("rhos_B12", array![[0.02, 0.2, 0.0]]).unwrap();
        let glint_ave: BTreeMap<String, f64> = [("B2", 2.0), ("B11", 1.0), ("B12", 1.0)]
            .into_iter()
            .map(|(b, v)| (b.to_string(), v))
            .collect();

        deglint_alternative(&mut img, &glint_ave, 0.05).unwrap();
        let b2 = img.band("rhos_B2").unwrap();
        assert_relative_eq!(b2[[0, 0]], 0.01, epsilon = 1e-6);
        assert_relative_eq!(b2[[0, 1]], 0.05);
        assert_relative_eq!(b2[[0, 2]], 0.05);
        assert_eq!(img.band("rhos_B11").unwrap()[[0, 0]], 0.0);
        assert_eq!(img.band("glint_mean").unwrap().dim(), (1, 3));
    }

    #[test]
    fn glint_correction_runs_end_to_end() {
        let settings = Settings {
            dsf_residual_glint_correction: true,
            ..Settings::default()
        };
        let (l2r, record) = Acolite::new(luts(), settings)
            .correct_image(&toa_image())
            .unwrap();
        assert!(record.glint_corrected);
        assert!(l2r.has_band("glint_mean"));
    }

    #[test]
    fn probability_band_is_carried() {
        let mut img = toa_image();
        img.add_band(CLOUD_PROBABILITY_BAND, Array2::from_elem((2, 2), 10.0))
            .unwrap();
        let (l2r, _) = Acolite::new(luts(), Settings::default())
            .correct_image(&img)
            .unwrap();
        assert!(l2r.has_band(CLOUD_PROBABILITY_BAND));
    }
}
