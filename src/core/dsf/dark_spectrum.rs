//! Dark spectrum extraction.
//!
//! Only finite pixels with a value above zero take part; masked (NaN) and
//! non-positive pixels are skipped. A band with no usable pixels, or with a
//! non-finite estimate, is a data-quality error rather than a silent zero.
use ndarray::ArrayView2;
use tracing::debug;

use crate::core::image::Image;
use crate::core::settings::Settings;
use crate::error::{Error, Result};
use crate::types::SpectrumOption;

/// Per-band dark reflectance, keyed by band name (`"B2"`), in image band order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DarkSpectrum {
    values: Vec<(String, f64)>,
}

impl DarkSpectrum {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(b, v)| (b.into(), v)).collect(),
        }
    }

    pub fn get(&self, band: &str) -> Option<f64> {
        self.values.iter().find(|(b, _)| b == band).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(b, v)| (b.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Dark spectrum of every `rhot_*` band of `image`.
pub fn extract(image: &Image, settings: &Settings) -> Result<DarkSpectrum> {
    let mut values = Vec::new();
    for band in image.select_prefix("rhot_") {
        let name = band.name.trim_start_matches("rhot_");
        let value = band_dark_value(
            name,
            band.data.view(),
            settings.dsf_spectrum_option,
            settings.dsf_percentile,
            settings.dsf_intercept_pixels,
        )?;
        debug!("dark spectrum {} = {:.6}", name, value);
        values.push((name.to_string(), value));
    }
    if values.is_empty() {
        return Err(Error::DataQuality(format!(
            "{} has no rhot_* bands to extract a dark spectrum from",
            image.properties.product_id
        )));
    }
    Ok(DarkSpectrum { values })
}

/// Dark value of one band with the given extraction strategy.
pub fn band_dark_value(
    band: &str,
    data: ArrayView2<f32>,
    option: SpectrumOption,
    percentile: f64,
    intercept_pixels: usize,
) -> Result<f64> {
    let mut valid: Vec<f64> = data
        .iter()
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| *v as f64)
        .collect();
    if valid.is_empty() {
        return Err(Error::DataQuality(format!(
            "band {band} has no valid pixels for the dark spectrum"
        )));
    }
    valid.sort_by(f64::total_cmp);

    let value = match option {
        SpectrumOption::Darkest => valid[0],
        SpectrumOption::Percentile => percentile_sorted(&valid, percentile),
        SpectrumOption::Intercept => {
            let k = intercept_pixels.min(valid.len());
            regression_intercept(&valid[..k])
        }
    };

    if !value.is_finite() {
        return Err(Error::DataQuality(format!(
            "band {band} dark spectrum estimate is not finite ({option})"
        )));
    }
    Ok(value)
}

/// Percentile of ascending `sorted`, linear interpolation between closest ranks.
pub fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = percentile.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Intercept of a least-squares line through `(rank, value)`.
fn regression_intercept(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 1 {
        return values[0];
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    mean_y - slope * mean_x
}
