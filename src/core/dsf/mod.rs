//! Dark Spectrum Fitting: dark spectrum extraction, per-model AOT inversion
//! and model selection.
pub mod aot;
pub mod dark_spectrum;
pub mod lut;
pub mod selection;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

pub use aot::{BandAot, ModelAot, estimate_model_aot};
pub use dark_spectrum::{DarkSpectrum, band_dark_value};
pub use lut::{
    AtmosphereModel, AtmosphericParameter, Geometry, LutDirectory, LutProvider, RegularGrid,
    SkyGlintModel,
};
pub use selection::{Selection, best_index, select_model};

use crate::core::settings::Settings;
use crate::error::Result;

/// Winning model of a dark spectrum fit together with every candidate fit.
pub struct DsfFit {
    pub model: Arc<dyn AtmosphereModel>,
    pub fit: ModelAot,
    pub selection: Selection,
    pub candidates: Vec<ModelAot>,
}

/// Fit `dark` against every candidate model and select the best one.
pub fn fit_dark_spectrum(
    models: &[Arc<dyn AtmosphereModel>],
    dark: &DarkSpectrum,
    gas_transmittance: &BTreeMap<String, f64>,
    geometry: &Geometry,
    settings: &Settings,
) -> Result<DsfFit> {
    let candidates = models
        .iter()
        .map(|m| {
            estimate_model_aot(
                m.as_ref(),
                dark,
                gas_transmittance,
                geometry,
                settings.dsf_nbands,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    for fit in &candidates {
        debug!(
            "{}: taua={:.4} std={:.4} cv={:.4}",
            fit.model, fit.taua, fit.taua_std, fit.taua_cv
        );
    }

    let refs: Vec<&dyn AtmosphereModel> = models.iter().map(|m| m.as_ref()).collect();
    let selection = select_model(
        &refs,
        &candidates,
        geometry,
        settings.dsf_model_selection,
        settings.dsf_nbands_fit,
    )?;
    info!(
        "Selected {} with taua {:.4} ({} = {:.6})",
        selection.model,
        candidates[selection.index].taua,
        selection.criterion.parameter_name(),
        selection.score
    );

    Ok(DsfFit {
        model: Arc::clone(&models[selection.index]),
        fit: candidates[selection.index].clone(),
        selection,
        candidates,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::lut::{AtmosphereModel, AtmosphericParameter, Geometry, SkyGlintModel};
    use crate::error::{Error, Result};

    /// Model with `romix = a + b·tau` per band and constant transmittance and albedo.
    pub struct LinearModel {
        pub name: String,
        pub romix: Vec<(String, f64, f64)>,
        pub dutott: f64,
        pub astot: f64,
        tau: Vec<f64>,
    }

    impl LinearModel {
        pub fn new(name: &str, romix: &[(&str, f64, f64)]) -> Self {
            Self {
                name: name.to_string(),
                romix: romix
                    .iter()
                    .map(|(b, a, s)| (b.to_string(), *a, *s))
                    .collect(),
                dutott: 1.0,
                astot: 0.0,
                tau: (0..=10).map(|i| i as f64 / 10.0).collect(),
            }
        }
    }

    impl AtmosphereModel for LinearModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn tau_grid(&self) -> &[f64] {
            &self.tau
        }

        fn parameter(
            &self,
            parameter: AtmosphericParameter,
            band: &str,
            _geometry: &Geometry,
            tau: f64,
        ) -> Result<f64> {
            let (_, a, b) = self
                .romix
                .iter()
                .find(|(name, _, _)| name == band)
                .ok_or_else(|| Error::MissingDependency(format!("no band {band}")))?;
            Ok(match parameter {
                AtmosphericParameter::Romix => a + b * tau,
                AtmosphericParameter::Dutott => self.dutott,
                AtmosphericParameter::Astot => self.astot,
            })
        }
    }

    /// Sky glint proportional to a per-band factor.
    pub struct FlatGlint(pub Vec<(String, f64)>);

    impl SkyGlintModel for FlatGlint {
        fn sky_glint(&self, band: &str, _g: &Geometry, _wind: f64, _tau: f64) -> Result<f64> {
            Ok(self
                .0
                .iter()
                .find(|(b, _)| b == band)
                .map(|(_, v)| *v)
                .unwrap_or(f64::NAN))
        }
    }
}
