//! In-memory raster image: ordered named `f32` bands plus scene properties.
//! Masked pixels are stored as NaN.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Lon/lat bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Footprint {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    pub fn intersects(&self, other: &Footprint) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }
}

impl From<[f64; 4]> for Footprint {
    fn from(b: [f64; 4]) -> Self {
        Footprint::new(b[0], b[1], b[2], b[3])
    }
}

/// Sun and view angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewGeometry {
    pub sza: f64,
    pub saa: f64,
    pub vza: f64,
    pub vaa: f64,
    /// Relative azimuth, folded into 0..=180
    pub raa: f64,
}

impl ViewGeometry {
    pub fn new(sza: f64, saa: f64, vza: f64, vaa: f64) -> Self {
        Self {
            sza,
            saa,
            vza,
            vaa,
            raa: relative_azimuth(saa, vaa),
        }
    }

    /// Two-way airmass `1/cos(sza) + 1/cos(vza)`.
    pub fn airmass(&self) -> f64 {
        1.0 / self.sza.to_radians().cos() + 1.0 / self.vza.to_radians().cos()
    }
}

pub fn relative_azimuth(saa: f64, vaa: f64) -> f64 {
    let raa = (saa - vaa).abs();
    if raa > 180.0 { (raa - 360.0).abs() } else { raa }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProperties {
    pub product_id: String,
    pub time_start: DateTime<Utc>,
    pub footprint: Option<Footprint>,
    /// Pixel size in metres
    pub pixel_size: f64,
    /// GDAL-order affine geotransform
    pub geotransform: [f64; 6],
    pub projection: String,
    pub geometry: Option<ViewGeometry>,
    pub cloudy_pixel_percentage: Option<f64>,
    /// Free-form properties (tile id, processing records, ...)
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

impl ImageProperties {
    pub fn new(product_id: impl Into<String>, time_start: DateTime<Utc>) -> Self {
        Self {
            product_id: product_id.into(),
            time_start,
            footprint: None,
            pixel_size: 10.0,
            geotransform: [0.0, 10.0, 0.0, 0.0, 0.0, -10.0],
            projection: String::new(),
            geometry: None,
            cloudy_pixel_percentage: None,
            extras: BTreeMap::new(),
        }
    }

    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extras.get(key).and_then(Value::as_f64)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(Value::as_str)
    }

    pub fn geometry(&self) -> Result<ViewGeometry> {
        self.geometry.ok_or_else(|| {
            Error::DataQuality(format!(
                "{} has no sun/view geometry; convert it from L1 first",
                self.product_id
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: Array2<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub properties: ImageProperties,
    bands: Vec<Band>,
}

impl Image {
    pub fn new(properties: ImageProperties) -> Self {
        Self {
            properties,
            bands: Vec::new(),
        }
    }

    /// `(rows, cols)` of the bands, `None` while the image is empty.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.first().map(|b| b.data.dim())
    }

    /// Add a band, replacing any band with the same name in place.
    pub fn add_band(&mut self, name: impl Into<String>, data: Array2<f32>) -> Result<()> {
        let name = name.into();
        if let Some(shape) = self.shape() {
            if shape != data.dim() {
                return Err(Error::Processing(format!(
                    "band {} has shape {:?}, image is {:?}",
                    name,
                    data.dim(),
                    shape
                )));
            }
        }
        self.add_band_unchecked(name, data);
        Ok(())
    }

    /// Add a band without the shape check. L1 scenes hold bands at their
    /// native resolutions until they are resampled.
    pub fn add_band_unchecked(&mut self, name: impl Into<String>, data: Array2<f32>) {
        let name = name.into();
        match self.bands.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.data = data,
            None => self.bands.push(Band { name, data }),
        }
    }

    pub fn band(&self, name: &str) -> Result<&Array2<f32>> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.data)
            .ok_or_else(|| Error::missing_band(name))
    }

    pub fn band_mut(&mut self, name: &str) -> Result<&mut Array2<f32>> {
        self.bands
            .iter_mut()
            .find(|b| b.name == name)
            .map(|b| &mut b.data)
            .ok_or_else(|| Error::missing_band(name))
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    pub fn remove_band(&mut self, name: &str) -> Option<Array2<f32>> {
        let idx = self.bands.iter().position(|b| b.name == name)?;
        Some(self.bands.remove(idx).data)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    /// Bands whose name starts with `prefix`, in image order.
    pub fn select_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Band> + 'a {
        self.bands.iter().filter(move |b| b.name.starts_with(prefix))
    }

    /// New image with only the named bands, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Image> {
        let mut out = Image::new(self.properties.clone());
        for name in names {
            out.add_band(*name, self.band(name)?.clone())?;
        }
        Ok(out)
    }
}
