use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{
    AerosolCorrection, GlintCorrectionMethod, ModelSelection, SpectrumOption, WaterProduct,
};

/// Processing settings for one correction run.
///
/// Every field has a built-in default; user overrides are merged on top with
/// [`Settings::from_overrides`] or loaded from a file with [`Settings::from_file`].
/// Keys follow ACOLITE's settings names so existing settings files can be reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub aerosol_correction: AerosolCorrection,
    pub dsf_spectrum_option: SpectrumOption,
    pub dsf_percentile: f64,
    pub dsf_intercept_pixels: usize,
    pub dsf_model_selection: ModelSelection,
    /// Number of darkest bands averaged into the model AOT
    pub dsf_nbands: usize,
    /// Number of darkest bands used to score `min_drmsd`
    pub dsf_nbands_fit: usize,
    pub dsf_fixed_aot: Option<f64>,
    pub dsf_fixed_lut: Option<String>,
    pub dsf_residual_glint_correction: bool,
    pub dsf_residual_glint_correction_method: GlintCorrectionMethod,
    pub glint_mask_rhos_threshold: f64,

    pub ancillary_data: bool,
    pub uoz_default: f64,
    pub uwv_default: f64,
    pub wind_default: f64,
    pub pressure_default: f64,
    /// Applied ozone column (cm-atm). Filled in when a scene is corrected.
    pub uoz: Option<f64>,
    /// Applied water vapour column (g/cm2)
    pub uwv: Option<f64>,
    pub wind: Option<f64>,
    /// Applied surface pressure (hPa)
    pub pressure: Option<f64>,
    #[serde(rename = "EARTHDATA_u")]
    pub earthdata_u: Option<String>,
    #[serde(rename = "EARTHDATA_p")]
    pub earthdata_p: Option<String>,

    /// Output pixel size in metres (10, 20 or 60)
    pub s2_target_res: u32,
    pub l2r_mask_negative_rhos: bool,
    /// Fail instead of masking when corrected reflectance goes negative
    pub strict_validation: bool,

    pub l2w_parameters: Vec<WaterProduct>,
    pub l2w_mask_threshold: f64,
    pub l2w_mask_cirrus_threshold: f64,
    pub l2w_mask_high_toa_threshold: f64,

    pub s2_cloud_proba: bool,
    #[serde(rename = "s2_cloud_proba__cloud_threshold")]
    pub s2_cloud_proba_cloud_threshold: f64,
    #[serde(rename = "s2_cloud_proba__nir_dark_threshold")]
    pub s2_cloud_proba_nir_dark_threshold: f64,
    /// Maximum cloud shadow projection distance (km)
    #[serde(rename = "s2_cloud_proba__cloud_proj_distance")]
    pub s2_cloud_proba_cloud_proj_distance: f64,
    /// Buffer around clouds and shadows (m)
    #[serde(rename = "s2_cloud_proba__buffer")]
    pub s2_cloud_proba_buffer: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aerosol_correction: AerosolCorrection::DarkSpectrum,
            dsf_spectrum_option: SpectrumOption::Darkest,
            dsf_percentile: 5.0,
            dsf_intercept_pixels: 100,
            dsf_model_selection: ModelSelection::MinDrmsd,
            dsf_nbands: 2,
            dsf_nbands_fit: 2,
            dsf_fixed_aot: None,
            dsf_fixed_lut: None,
            dsf_residual_glint_correction: false,
            dsf_residual_glint_correction_method: GlintCorrectionMethod::Alternative,
            glint_mask_rhos_threshold: 0.05,
            ancillary_data: false,
            uoz_default: 0.3,
            uwv_default: 1.5,
            wind_default: 2.0,
            pressure_default: 1013.25,
            uoz: None,
            uwv: None,
            wind: None,
            pressure: None,
            earthdata_u: None,
            earthdata_p: None,
            s2_target_res: 10,
            l2r_mask_negative_rhos: true,
            strict_validation: false,
            l2w_parameters: Vec::new(),
            l2w_mask_threshold: 0.05,
            l2w_mask_cirrus_threshold: 0.005,
            l2w_mask_high_toa_threshold: 0.3,
            s2_cloud_proba: false,
            s2_cloud_proba_cloud_threshold: 50.0,
            s2_cloud_proba_nir_dark_threshold: 0.15,
            s2_cloud_proba_cloud_proj_distance: 10.0,
            s2_cloud_proba_buffer: 50.0,
        }
    }
}

/// Ancillary atmosphere actually applied to a scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ancillary {
    pub uoz: f64,
    pub uwv: f64,
    pub wind: f64,
    pub pressure: f64,
}

impl Settings {
    /// Merge `overrides` over the defaults. User values win; unknown keys and
    /// unknown discriminator values are configuration errors.
    pub fn from_overrides(overrides: Map<String, Value>) -> Result<Self> {
        let mut merged = match serde_json::to_value(Settings::default())? {
            Value::Object(map) => map,
            _ => unreachable!("Settings always serializes to an object"),
        };

        for (key, value) in overrides {
            if !merged.contains_key(&key) {
                return Err(Error::UnknownSetting { key });
            }
            let value = if key == WaterProduct::KEY {
                normalize_product_list(value)
            } else {
                value
            };
            merged.insert(key, value);
        }

        validate_discriminators(&merged)?;

        let settings: Settings =
            serde_json::from_value(Value::Object(merged)).map_err(|e| Error::InvalidSetting {
                key: "settings".to_string(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings.deduplicated())
    }

    /// Load settings from a JSON object file or an ACOLITE `key=value` settings file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_overrides(read_overrides(path)?)
    }

    /// Range checks on numeric settings.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: String| {
            Err(Error::InvalidSetting {
                key: key.to_string(),
                reason,
            })
        };
        if !(0.0..=100.0).contains(&self.dsf_percentile) {
            return invalid(
                "dsf_percentile",
                format!("{} is outside 0..=100", self.dsf_percentile),
            );
        }
        if self.dsf_intercept_pixels < 2 {
            return invalid(
                "dsf_intercept_pixels",
                "at least two pixels are needed for a linear fit".to_string(),
            );
        }
        if self.dsf_nbands == 0 {
            return invalid("dsf_nbands", "must be at least 1".to_string());
        }
        if self.dsf_nbands_fit == 0 {
            return invalid("dsf_nbands_fit", "must be at least 1".to_string());
        }
        if self.s2_target_res == 0 {
            return invalid("s2_target_res", "must be positive".to_string());
        }
        if self.dsf_fixed_aot.is_some() != self.dsf_fixed_lut.is_some() {
            debug!("Only one of dsf_fixed_aot/dsf_fixed_lut is set; dark spectrum fitting will be used");
        }
        if let Some(aot) = self.dsf_fixed_aot {
            if !aot.is_finite() || aot < 0.0 {
                return invalid("dsf_fixed_aot", format!("{aot} is not a valid AOT"));
            }
        }
        Ok(())
    }

    /// True when both a fixed AOT and a fixed LUT are configured.
    pub fn fixed_aot(&self) -> Option<(f64, &str)> {
        match (self.dsf_fixed_aot, self.dsf_fixed_lut.as_deref()) {
            (Some(aot), Some(lut)) => Some((aot, lut)),
            _ => None,
        }
    }

    /// Ancillary values for a scene: explicit settings first, then retrieved
    /// ancillary data, then the `*_default` values.
    pub fn resolve_ancillary(&self, retrieved: Option<&Ancillary>) -> Ancillary {
        Ancillary {
            uoz: self
                .uoz
                .or(retrieved.map(|a| a.uoz))
                .unwrap_or(self.uoz_default),
            uwv: self
                .uwv
                .or(retrieved.map(|a| a.uwv))
                .unwrap_or(self.uwv_default),
            wind: self
                .wind
                .or(retrieved.map(|a| a.wind))
                .unwrap_or(self.wind_default),
            pressure: self
                .pressure
                .or(retrieved.map(|a| a.pressure))
                .unwrap_or(self.pressure_default),
        }
    }

    /// Copy of these settings with the applied ancillary values recorded.
    pub fn with_ancillary(&self, ancillary: &Ancillary) -> Self {
        let mut resolved = self.clone();
        resolved.uoz = Some(ancillary.uoz);
        resolved.uwv = Some(ancillary.uwv);
        resolved.wind = Some(ancillary.wind);
        resolved.pressure = Some(ancillary.pressure);
        resolved
    }

    fn deduplicated(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.l2w_parameters.len());
        self.l2w_parameters.retain(|p| {
            if seen.contains(p) {
                false
            } else {
                seen.push(*p);
                true
            }
        });
        self
    }
}

fn normalize_product_list(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim().is_empty() => Value::Array(Vec::new()),
        Value::String(s) => Value::Array(vec![Value::String(s)]),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    }
}

fn option_str<'a>(map: &'a Map<String, Value>, key: &'static str) -> Result<Option<&'a str>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(Error::InvalidOption {
            key,
            value: other.to_string(),
            allowed: String::new(),
        }),
    }
}

/// Check every enum-valued key so a bad value is reported with its allowed set
/// instead of a generic deserialization message.
fn validate_discriminators(map: &Map<String, Value>) -> Result<()> {
    if let Some(v) = option_str(map, AerosolCorrection::KEY)? {
        v.parse::<AerosolCorrection>()?;
    }
    if let Some(v) = option_str(map, SpectrumOption::KEY)? {
        v.parse::<SpectrumOption>()?;
    }
    if let Some(v) = option_str(map, ModelSelection::KEY)? {
        v.parse::<ModelSelection>()?;
    }
    if let Some(v) = option_str(map, GlintCorrectionMethod::KEY)? {
        v.parse::<GlintCorrectionMethod>()?;
    }
    if let Some(Value::Array(products)) = map.get(WaterProduct::KEY) {
        for product in products {
            match product {
                Value::String(s) => {
                    s.parse::<WaterProduct>()?;
                }
                other => {
                    return Err(Error::UnsupportedProduct {
                        product: other.to_string(),
                        supported: WaterProduct::supported(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Raw overrides from a settings file, before merging with the defaults.
pub fn read_overrides<P: AsRef<Path>>(path: P) -> Result<Map<String, Value>> {
    let path = path.as_ref();
    info!("Loading settings from {:?}", path);
    let text = fs::read_to_string(path)?;
    if !text.trim_start().starts_with('{') {
        return Ok(parse_settings_text(&text));
    }
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidSetting {
            key: path.display().to_string(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

/// Parse ACOLITE's plain-text settings format into a JSON map.
///
/// Lines are `key=value`; `;` and `#` start comments. `True`/`False`/`None`
/// become booleans and null, numbers become numbers and comma-separated values
/// become lists.
pub fn parse_settings_text(text: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for raw in text.lines() {
        let line = raw
            .split(|c| c == ';' || c == '#')
            .next()
            .unwrap_or("")
            .trim();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let parsed = if value.contains(',') {
            Value::Array(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(parse_scalar)
                    .collect(),
            )
        } else {
            parse_scalar(value)
        };
        map.insert(key.to_string(), parsed);
    }
    map
}

fn parse_scalar(value: &str) -> Value {
    match value {
        "True" | "true" => Value::Bool(true),
        "False" | "false" => Value::Bool(false),
        "None" | "none" | "" => Value::Null,
        _ => {
            if let Ok(i) = value.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = value.parse::<f64>() {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(value.to_string()))
            } else {
                Value::String(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn overrides(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn user_values_take_precedence_over_defaults() {
        let settings = Settings::from_overrides(overrides(json!({
            "dsf_spectrum_option": "percentile",
            "dsf_percentile": 10,
            "s2_target_res": 20,
        })))
        .unwrap();
        assert_eq!(settings.dsf_spectrum_option, SpectrumOption::Percentile);
        assert_eq!(settings.dsf_percentile, 10.0);
        assert_eq!(settings.s2_target_res, 20);
        assert_eq!(settings.dsf_model_selection, ModelSelection::MinDrmsd);
        assert_eq!(settings.pressure_default, 1013.25);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = Settings::from_overrides(overrides(json!({ "dsf_magic": 1 }))).unwrap_err();
        assert!(matches!(err, Error::UnknownSetting { ref key } if key == "dsf_magic"));
    }

    #[test]
    fn unknown_discriminator_does_not_default() {
        let err = Settings::from_overrides(overrides(json!({ "dsf_spectrum_option": "median" })))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOption { key: "dsf_spectrum_option", .. }));
        assert!(err.to_string().contains("darkest, percentile, intercept"));

        let err = Settings::from_overrides(overrides(json!({ "dsf_model_selection": "max_r2" })))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOption { key: "dsf_model_selection", .. }));
    }

    #[test]
    fn unsupported_product_is_rejected() {
        let err = Settings::from_overrides(overrides(json!({
            "l2w_parameters": ["chl_oc2", "cdom_magic"]
        })))
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedProduct { ref product, .. } if product == "cdom_magic"));
    }

    #[test]
    fn repeated_products_collapse() {
        let settings = Settings::from_overrides(overrides(json!({
            "l2w_parameters": ["chl_oc2", "spm_nechad2016", "chl_oc2"]
        })))
        .unwrap();
        assert_eq!(
            settings.l2w_parameters,
            vec![WaterProduct::ChlOc2, WaterProduct::SpmNechad2016]
        );
    }

    #[test]
    fn percentile_out_of_range_is_invalid() {
        let err =
            Settings::from_overrides(overrides(json!({ "dsf_percentile": 150 }))).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { ref key, .. } if key == "dsf_percentile"));
    }

    #[test]
    fn parses_acolite_text_settings() {
        let text = "\
; ACOLITE settings
aerosol_correction=dark_spectrum
dsf_spectrum_option=intercept # fit
dsf_intercept_pixels=200
dsf_residual_glint_correction=True
dsf_fixed_lut=None
l2w_parameters=chl_oc3
";
        let map = parse_settings_text(text);
        let settings = Settings::from_overrides(map).unwrap();
        assert_eq!(settings.dsf_spectrum_option, SpectrumOption::Intercept);
        assert_eq!(settings.dsf_intercept_pixels, 200);
        assert!(settings.dsf_residual_glint_correction);
        assert_eq!(settings.dsf_fixed_lut, None);
        assert_eq!(settings.l2w_parameters, vec![WaterProduct::ChlOc3]);
    }

    #[test]
    fn text_lists_become_arrays() {
        let map = parse_settings_text("l2w_parameters=chl_oc2, tur_nechad2016\n");
        assert_eq!(map["l2w_parameters"], json!(["chl_oc2", "tur_nechad2016"]));
    }

    #[test]
    fn loads_json_settings_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{ "dsf_model_selection": "min_dtau", "uoz_default": 0.35 }}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.dsf_model_selection, ModelSelection::MinDtau);
        assert_eq!(settings.uoz_default, 0.35);
    }

    #[test]
    fn ancillary_resolution_order() {
        let mut settings = Settings::default();
        let retrieved = Ancillary {
            uoz: 0.28,
            uwv: 2.1,
            wind: 4.0,
            pressure: 1008.0,
        };
        let defaults = settings.resolve_ancillary(None);
        assert_eq!(defaults.uoz, 0.3);
        assert_eq!(defaults.pressure, 1013.25);

        settings.pressure = Some(1000.0);
        let applied = settings.resolve_ancillary(Some(&retrieved));
        assert_eq!(applied.uoz, 0.28);
        assert_eq!(applied.pressure, 1000.0);

        let resolved = settings.with_ancillary(&applied);
        assert_eq!(resolved.uwv, Some(2.1));
    }
}
