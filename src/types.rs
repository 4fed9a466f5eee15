//! Shared enums used across the crate.
//! Each settings discriminator (`AerosolCorrection`, `SpectrumOption`, `ModelSelection`,
//! `GlintCorrectionMethod`, `WaterProduct`) is a closed enum. Parsing an unknown name
//! fails with `Error::InvalidOption`, which names the key and lists the accepted values.
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn allowed_list(names: &[&str]) -> String {
    names.join(", ")
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AerosolCorrection {
    DarkSpectrum,
}

impl AerosolCorrection {
    pub const KEY: &'static str = "aerosol_correction";
    pub const NAMES: &'static [&'static str] = &["dark_spectrum"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AerosolCorrection::DarkSpectrum => "dark_spectrum",
        }
    }
}

impl FromStr for AerosolCorrection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dark_spectrum" => Ok(AerosolCorrection::DarkSpectrum),
            other => Err(Error::InvalidOption {
                key: Self::KEY,
                value: other.to_string(),
                allowed: allowed_list(Self::NAMES),
            }),
        }
    }
}

impl std::fmt::Display for AerosolCorrection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the dark spectrum is extracted from a scene.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumOption {
    /// Per-band minimum of the valid pixels
    Darkest,
    /// Per-band `dsf_percentile`-th percentile
    Percentile,
    /// Intercept of a linear fit over the `dsf_intercept_pixels` darkest pixels
    Intercept,
}

impl SpectrumOption {
    pub const KEY: &'static str = "dsf_spectrum_option";
    pub const NAMES: &'static [&'static str] = &["darkest", "percentile", "intercept"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpectrumOption::Darkest => "darkest",
            SpectrumOption::Percentile => "percentile",
            SpectrumOption::Intercept => "intercept",
        }
    }
}

impl FromStr for SpectrumOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "darkest" => Ok(SpectrumOption::Darkest),
            "percentile" => Ok(SpectrumOption::Percentile),
            "intercept" => Ok(SpectrumOption::Intercept),
            other => Err(Error::InvalidOption {
                key: Self::KEY,
                value: other.to_string(),
                allowed: allowed_list(Self::NAMES),
            }),
        }
    }
}

impl std::fmt::Display for SpectrumOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Criterion used to pick the best aerosol model.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    #[value(name = "min_drmsd")]
    MinDrmsd,
    #[value(name = "min_dtau")]
    MinDtau,
    #[value(name = "taua_cv")]
    TauaCv,
}

impl ModelSelection {
    pub const KEY: &'static str = "dsf_model_selection";
    pub const NAMES: &'static [&'static str] = &["min_drmsd", "min_dtau", "taua_cv"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSelection::MinDrmsd => "min_drmsd",
            ModelSelection::MinDtau => "min_dtau",
            ModelSelection::TauaCv => "taua_cv",
        }
    }

    /// Name of the score the criterion minimizes, as reported in logs and results.
    pub fn parameter_name(&self) -> &'static str {
        match self {
            ModelSelection::MinDrmsd => "rmsd",
            ModelSelection::MinDtau => "dtau",
            ModelSelection::TauaCv => "taua_cv",
        }
    }
}

impl FromStr for ModelSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min_drmsd" => Ok(ModelSelection::MinDrmsd),
            "min_dtau" => Ok(ModelSelection::MinDtau),
            "taua_cv" => Ok(ModelSelection::TauaCv),
            other => Err(Error::InvalidOption {
                key: Self::KEY,
                value: other.to_string(),
                allowed: allowed_list(Self::NAMES),
            }),
        }
    }
}

impl std::fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlintCorrectionMethod {
    Alternative,
}

impl GlintCorrectionMethod {
    pub const KEY: &'static str = "dsf_residual_glint_correction_method";
    pub const NAMES: &'static [&'static str] = &["alternative"];
}

impl FromStr for GlintCorrectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alternative" => Ok(GlintCorrectionMethod::Alternative),
            other => Err(Error::InvalidOption {
                key: Self::KEY,
                value: other.to_string(),
                allowed: allowed_list(Self::NAMES),
            }),
        }
    }
}

/// Water-quality and bathymetry products that can be requested in `l2w_parameters`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum WaterProduct {
    #[serde(rename = "spm_nechad2016")]
    SpmNechad2016,
    #[serde(rename = "spm_nechad2016_704")]
    SpmNechad2016_704,
    #[serde(rename = "spm_nechad2016_740")]
    SpmNechad2016_740,
    #[serde(rename = "tur_nechad2016")]
    TurNechad2016,
    #[serde(rename = "tur_nechad2016_704")]
    TurNechad2016_704,
    #[serde(rename = "tur_nechad2016_740")]
    TurNechad2016_740,
    #[serde(rename = "chl_oc2")]
    ChlOc2,
    #[serde(rename = "chl_oc3")]
    ChlOc3,
    #[serde(rename = "chl_re_mishra")]
    ChlReMishra,
    #[serde(rename = "ndwi")]
    Ndwi,
    #[serde(rename = "pSDB_red")]
    PsdbRed,
    #[serde(rename = "pSDB_green")]
    PsdbGreen,
    #[serde(rename = "Rrs_*")]
    Rrs,
}

impl WaterProduct {
    pub const KEY: &'static str = "l2w_parameters";

    pub const ALL: &'static [WaterProduct] = &[
        WaterProduct::SpmNechad2016,
        WaterProduct::SpmNechad2016_704,
        WaterProduct::SpmNechad2016_740,
        WaterProduct::TurNechad2016,
        WaterProduct::TurNechad2016_704,
        WaterProduct::TurNechad2016_740,
        WaterProduct::ChlOc2,
        WaterProduct::ChlOc3,
        WaterProduct::ChlReMishra,
        WaterProduct::Ndwi,
        WaterProduct::PsdbRed,
        WaterProduct::PsdbGreen,
        WaterProduct::Rrs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WaterProduct::SpmNechad2016 => "spm_nechad2016",
            WaterProduct::SpmNechad2016_704 => "spm_nechad2016_704",
            WaterProduct::SpmNechad2016_740 => "spm_nechad2016_740",
            WaterProduct::TurNechad2016 => "tur_nechad2016",
            WaterProduct::TurNechad2016_704 => "tur_nechad2016_704",
            WaterProduct::TurNechad2016_740 => "tur_nechad2016_740",
            WaterProduct::ChlOc2 => "chl_oc2",
            WaterProduct::ChlOc3 => "chl_oc3",
            WaterProduct::ChlReMishra => "chl_re_mishra",
            WaterProduct::Ndwi => "ndwi",
            WaterProduct::PsdbRed => "pSDB_red",
            WaterProduct::PsdbGreen => "pSDB_green",
            WaterProduct::Rrs => "Rrs_*",
        }
    }

    pub fn supported() -> String {
        WaterProduct::ALL
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for WaterProduct {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        WaterProduct::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnsupportedProduct {
                product: s.to_string(),
                supported: WaterProduct::supported(),
            })
    }
}

impl std::fmt::Display for WaterProduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel-2 platform, used to pick the matching LUT set.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Sensor {
    S2A,
    S2B,
}

impl Sensor {
    /// Platform from a product id. Anything that is not S2A is treated as S2B.
    pub fn from_product_id(product_id: &str) -> Self {
        if product_id.contains("S2A") {
            Sensor::S2A
        } else {
            Sensor::S2B
        }
    }

    pub fn lut_name(&self) -> &'static str {
        match self {
            Sensor::S2A => "S2A_MSI",
            Sensor::S2B => "S2B_MSI",
        }
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lut_name())
    }
}
