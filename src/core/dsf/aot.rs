//! Per-model aerosol optical thickness from the dark spectrum.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::dsf::dark_spectrum::DarkSpectrum;
use crate::core::dsf::lut::{AtmosphereModel, Geometry, interp};
use crate::core::sensor::{AOT_SKIP_BANDS, band_id};
use crate::error::Result;

/// AOT retrieved for one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandAot {
    pub band: String,
    /// Gas-corrected dark reflectance
    pub rhot: f64,
    pub taua: f64,
}

/// Result of inverting the dark spectrum through one aerosol model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAot {
    pub model: String,
    /// Bands ranked by ascending AOT; bands with no AOT come last.
    pub bands: Vec<BandAot>,
    pub taua: f64,
    pub taua_std: f64,
    pub taua_cv: f64,
}

fn nan_last(a: f64, b: f64) -> Ordering {
    a.is_nan().cmp(&b.is_nan()).then(a.total_cmp(&b))
}

/// Invert the gas-corrected dark spectrum through `model` and average the
/// `nbands` lowest band AOTs.
///
/// `gas_transmittance` maps band names (`"B2"`) to two-way gas transmittance;
/// bands missing from it are taken as unattenuated.
pub fn estimate_model_aot(
    model: &dyn AtmosphereModel,
    dark: &DarkSpectrum,
    gas_transmittance: &BTreeMap<String, f64>,
    geometry: &Geometry,
    nbands: usize,
) -> Result<ModelAot> {
    let tau = model.tau_grid();
    let mut bands = Vec::with_capacity(dark.len());
    for (band, pdark) in dark.iter() {
        if AOT_SKIP_BANDS.contains(&band) {
            continue;
        }
        let tg = gas_transmittance.get(band).copied().unwrap_or(1.0);
        let rhot = pdark / tg;
        let romix = model.romix_curve(band_id(band), geometry)?;
        bands.push(BandAot {
            band: band.to_string(),
            rhot,
            taua: interp(rhot, &romix, tau),
        });
    }
    bands.sort_by(|a, b| nan_last(a.taua, b.taua));

    let lowest: Vec<f64> = bands
        .iter()
        .take(nbands)
        .map(|b| b.taua)
        .filter(|t| !t.is_nan())
        .collect();
    let (taua, taua_std) = mean_std(&lowest);

    Ok(ModelAot {
        model: model.name().to_string(),
        bands,
        taua,
        taua_std,
        taua_cv: taua_std / taua,
    })
}

/// Mean and population standard deviation; NaN for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
