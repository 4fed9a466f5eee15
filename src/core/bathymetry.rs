//! Satellite-derived bathymetry: multi-scene quality mosaic and the Stumpf
//! log-ratio depth model.
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::image::Image;
use crate::error::{Error, Result};

/// Band written by [`StumpfModel::apply`].
pub const DEPTH_BAND: &str = "SDB_depth";

/// Per-pixel mosaic taking every band from the image with the highest finite
/// value of `band`. Pixels where no image is finite stay NaN. All images must
/// share the shape and band set of the first one.
pub fn quality_mosaic(images: &[Image], band: &str) -> Result<Image> {
    let first = images
        .first()
        .ok_or_else(|| Error::Processing("quality mosaic of an empty collection".into()))?;
    let (rows, cols) = first.band(band)?.dim();
    for image in images {
        if image.band(band)?.dim() != (rows, cols) {
            return Err(Error::Processing(format!(
                "{} does not match the mosaic grid {}x{}",
                image.properties.product_id, rows, cols
            )));
        }
    }

    let mut best: Array2<Option<usize>> = Array2::from_elem((rows, cols), None);
    let mut score = Array2::from_elem((rows, cols), f32::NEG_INFINITY);
    for (i, image) in images.iter().enumerate() {
        Zip::from(&mut best)
            .and(&mut score)
            .and(image.band(band)?)
            .for_each(|b, s, q| {
                if q.is_finite() && *q > *s {
                    *s = *q;
                    *b = Some(i);
                }
            });
    }

    let mut mosaic = Image::new(first.properties.clone());
    for name in first.band_names() {
        let sources = images
            .iter()
            .map(|img| img.band(name))
            .collect::<Result<Vec<_>>>()?;
        let data = Array2::from_shape_fn((rows, cols), |(r, c)| match best[[r, c]] {
            Some(i) => sources[i][[r, c]],
            None => f32::NAN,
        });
        mosaic.add_band(name, data)?;
    }
    info!("Quality mosaic of {} images on {}", images.len(), band);
    Ok(mosaic)
}

/// Linear depth model `depth = m1·pSDB - m0` (Stumpf et al., 2003).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StumpfModel {
    pub m0: f64,
    pub m1: f64,
}

impl StumpfModel {
    /// Least-squares fit on `(pSDB, depth)` control points.
    pub fn calibrate(points: &[(f64, f64)]) -> Result<Self> {
        let valid: Vec<(f64, f64)> = points
            .iter()
            .copied()
            .filter(|(p, d)| p.is_finite() && d.is_finite())
            .collect();
        if valid.len() < 2 {
            return Err(Error::DataQuality(format!(
                "Stumpf calibration needs at least 2 finite control points, got {}",
                valid.len()
            )));
        }
        let n = valid.len() as f64;
        let mean_p = valid.iter().map(|(p, _)| p).sum::<f64>() / n;
        let mean_d = valid.iter().map(|(_, d)| d).sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (p, d) in &valid {
            sxy += (p - mean_p) * (d - mean_d);
            sxx += (p - mean_p).powi(2);
        }
        if sxx <= f64::EPSILON {
            return Err(Error::DataQuality(
                "Stumpf calibration is degenerate: all pSDB values are equal".into(),
            ));
        }
        let m1 = sxy / sxx;
        let m0 = m1 * mean_p - mean_d;
        info!("Stumpf model m0={:.4} m1={:.4} from {} points", m0, m1, valid.len());
        Ok(Self { m0, m1 })
    }

    pub fn depth(&self, psdb: f32) -> f32 {
        (self.m1 * psdb as f64 - self.m0) as f32
    }

    /// Add [`DEPTH_BAND`] computed from the pseudo-SDB `band`.
    pub fn apply(&self, image: &mut Image, band: &str) -> Result<()> {
        let depth = image.band(band)?.mapv(|p| self.depth(p));
        image.add_band(DEPTH_BAND, depth)
    }
}
