//! Aerosol model selection.
//!
//! Every candidate is scored with the configured criterion and the lowest
//! score wins. Candidates are scanned in provider order and replace the
//! current best only on a strictly lower score, so ties go to the earliest
//! model. NaN scores never win.
use crate::core::dsf::aot::ModelAot;
use crate::core::dsf::lut::{AtmosphereModel, AtmosphericParameter, Geometry};
use crate::core::sensor::band_id;
use crate::error::{Error, Result};
use crate::types::ModelSelection;

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Index of the winning model in provider order
    pub index: usize,
    pub model: String,
    pub criterion: ModelSelection,
    pub score: f64,
}

/// Score of one model fit under `criterion`. Lower is better.
pub fn score(
    fit: &ModelAot,
    model: &dyn AtmosphereModel,
    geometry: &Geometry,
    criterion: ModelSelection,
    nbands_fit: usize,
) -> Result<f64> {
    match criterion {
        ModelSelection::MinDrmsd => {
            if fit.taua.is_nan() {
                return Ok(f64::NAN);
            }
            let fitted: Vec<_> = fit.bands.iter().take(nbands_fit).collect();
            if fitted.is_empty() {
                return Ok(f64::NAN);
            }
            let mut sum = 0.0;
            for band in &fitted {
                let modelled = model.parameter(
                    AtmosphericParameter::Romix,
                    band_id(&band.band),
                    geometry,
                    fit.taua,
                )?;
                sum += (band.rhot - modelled).powi(2);
            }
            Ok((sum / fitted.len() as f64).sqrt())
        }
        ModelSelection::MinDtau => {
            if fit.bands.len() < 2 {
                return Ok(f64::INFINITY);
            }
            Ok((fit.bands[0].taua - fit.bands[1].taua).abs())
        }
        ModelSelection::TauaCv => Ok(fit.taua_cv),
    }
}

/// Index of the lowest score; `None` when no score is finite.
pub fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in scores.iter().enumerate() {
        if !s.is_finite() {
            continue;
        }
        match best {
            Some((_, current)) if *s >= current => {}
            _ => best = Some((i, *s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Score every fit and pick the winner.
pub fn select_model(
    models: &[&dyn AtmosphereModel],
    fits: &[ModelAot],
    geometry: &Geometry,
    criterion: ModelSelection,
    nbands_fit: usize,
) -> Result<Selection> {
    let scores = models
        .iter()
        .zip(fits)
        .map(|(model, fit)| score(fit, *model, geometry, criterion, nbands_fit))
        .collect::<Result<Vec<f64>>>()?;

    let index = best_index(&scores).ok_or_else(|| {
        Error::DataQuality(format!(
            "no aerosol model produced a finite {} score",
            criterion.parameter_name()
        ))
    })?;

    Ok(Selection {
        index,
        model: fits[index].model.clone(),
        criterion,
        score: scores[index],
    })
}
