//! Sentinel-2 L1C SAFE reader.
//!
//! Product metadata comes from `MTD_MSIL1C.xml` (quantification value,
//! radiometric offsets, product URI) and the granule's `MTD_TL.xml` (mean sun
//! and per-band incidence angles). Band rasters are JPEG2000 files under
//! `GRANULE/<id>/IMG_DATA`, read through GDAL.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::image::{Image, ImageProperties};
use crate::core::l1_convert::{
    MEAN_SOLAR_AZIMUTH_ANGLE, MEAN_SOLAR_ZENITH_ANGLE, QUANTIFICATION_VALUE,
    incidence_azimuth_key, incidence_zenith_key, radio_add_offset_key,
};
use crate::core::sensor::SENTINEL2_BANDS;
use crate::io::gdal::{GdalError, GdalRaster};

/// Errors encountered when reading Sentinel-2 products
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Raster error: {0}")]
    Raster(#[from] GdalError),
    #[error("Missing `{0}` in Sentinel-2 product")]
    MissingField(&'static str),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Metadata gathered from the product and tile XML files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct L1cMetadata {
    pub product_uri: Option<String>,
    pub spacecraft: Option<String>,
    pub product_start_time: Option<String>,
    pub quantification_value: Option<f64>,
    /// Offset per band name (`"B2"`), present from processing baseline 04.00
    pub radio_add_offset: BTreeMap<String, f64>,
    pub cloud_coverage: Option<f64>,
    pub tile_id: Option<String>,
    pub epsg: Option<String>,
    pub sun_zenith: Option<f64>,
    pub sun_azimuth: Option<f64>,
    /// Mean incidence `(zenith, azimuth)` per band name
    pub incidence: BTreeMap<String, (f64, f64)>,
}

impl L1cMetadata {
    /// Product id without the `.SAFE` suffix.
    pub fn product_id(&self) -> Option<String> {
        self.product_uri
            .as_deref()
            .map(|uri| uri.trim_end_matches(".SAFE").to_string())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.product_start_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Copy angles and radiometry into image properties under the keys the
    /// L1 converter reads.
    pub fn apply_to(&self, props: &mut ImageProperties) {
        let mut set = |key: String, value: f64| {
            props.extras.insert(key, Value::from(value));
        };
        if let Some(v) = self.sun_zenith {
            set(MEAN_SOLAR_ZENITH_ANGLE.to_string(), v);
        }
        if let Some(v) = self.sun_azimuth {
            set(MEAN_SOLAR_AZIMUTH_ANGLE.to_string(), v);
        }
        if let Some(v) = self.quantification_value {
            set(QUANTIFICATION_VALUE.to_string(), v);
        }
        for (band, offset) in &self.radio_add_offset {
            set(radio_add_offset_key(band), *offset);
        }
        for (band, (zenith, azimuth)) in &self.incidence {
            set(incidence_zenith_key(band), *zenith);
            set(incidence_azimuth_key(band), *azimuth);
        }
        if let Some(tile) = &self.tile_id {
            props
                .extras
                .insert("TILE_ID".to_string(), Value::String(tile.clone()));
        }
        if props.cloudy_pixel_percentage.is_none() {
            props.cloudy_pixel_percentage = self.cloud_coverage;
        }
    }
}

/// Band name for a `band_id`/`bandId` index attribute (0 = B1, 8 = B8A).
fn band_for_index(idx: &str) -> Option<&'static str> {
    idx.parse::<usize>()
        .ok()
        .and_then(|i| SENTINEL2_BANDS.get(i))
        .map(|b| b.name)
}

fn attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, ProductError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

fn parse_f64(txt: &str, field: &str) -> Result<f64, ProductError> {
    txt.trim()
        .parse()
        .map_err(|_| ProductError::Parse(format!("{field}: {txt:?} is not a number")))
}

/// Parse `MTD_MSIL1C.xml` into `meta`.
pub fn parse_product_xml(path: &Path, meta: &mut L1cMetadata) -> Result<(), ProductError> {
    let mut reader = Reader::from_file(path)?;
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut curr = String::new();
    let mut offset_band: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                curr = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if curr == "RADIO_ADD_OFFSET" {
                    offset_band = attribute(e, b"band_id")?.as_deref().and_then(band_for_index);
                }
            }
            Event::End(_) => curr.clear(),
            Event::Text(e) => {
                let txt = e.unescape()?;
                match curr.as_str() {
                    "PRODUCT_URI" => meta.product_uri = Some(txt.to_string()),
                    "SPACECRAFT_NAME" => meta.spacecraft = Some(txt.to_string()),
                    "PRODUCT_START_TIME" => meta.product_start_time = Some(txt.to_string()),
                    "QUANTIFICATION_VALUE" => {
                        meta.quantification_value = Some(parse_f64(&txt, "QUANTIFICATION_VALUE")?)
                    }
                    "RADIO_ADD_OFFSET" => {
                        if let Some(band) = offset_band.take() {
                            meta.radio_add_offset
                                .insert(band.to_string(), parse_f64(&txt, "RADIO_ADD_OFFSET")?);
                        }
                    }
                    "Cloud_Coverage_Assessment" => {
                        meta.cloud_coverage = txt.trim().parse().ok();
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// Parse the granule `MTD_TL.xml` into `meta`.
pub fn parse_tile_xml(path: &Path, meta: &mut L1cMetadata) -> Result<(), ProductError> {
    let mut reader = Reader::from_file(path)?;
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut curr = String::new();
    let mut in_mean_sun = false;
    let mut incidence_band: Option<&'static str> = None;
    let mut incidence = (f64::NAN, f64::NAN);

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                curr = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match curr.as_str() {
                    "Mean_Sun_Angle" => in_mean_sun = true,
                    "Mean_Viewing_Incidence_Angle" => {
                        incidence_band =
                            attribute(e, b"bandId")?.as_deref().and_then(band_for_index);
                        incidence = (f64::NAN, f64::NAN);
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Mean_Sun_Angle" => in_mean_sun = false,
                    "Mean_Viewing_Incidence_Angle" => {
                        if let Some(band) = incidence_band.take() {
                            if incidence.0.is_finite() && incidence.1.is_finite() {
                                meta.incidence.insert(band.to_string(), incidence);
                            }
                        }
                    }
                    _ => {}
                }
                curr.clear();
            }
            Event::Text(e) => {
                let txt = e.unescape()?;
                match curr.as_str() {
                    "ZENITH_ANGLE" if in_mean_sun => {
                        meta.sun_zenith = Some(parse_f64(&txt, "ZENITH_ANGLE")?)
                    }
                    "AZIMUTH_ANGLE" if in_mean_sun => {
                        meta.sun_azimuth = Some(parse_f64(&txt, "AZIMUTH_ANGLE")?)
                    }
                    "ZENITH_ANGLE" if incidence_band.is_some() => {
                        incidence.0 = parse_f64(&txt, "ZENITH_ANGLE")?
                    }
                    "AZIMUTH_ANGLE" if incidence_band.is_some() => {
                        incidence.1 = parse_f64(&txt, "AZIMUTH_ANGLE")?
                    }
                    "TILE_ID" => meta.tile_id = Some(txt.to_string()),
                    "HORIZONTAL_CS_CODE" => meta.epsg = Some(txt.to_string()),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

/// File-name suffix of a band raster (`B1` -> `B01`, `B8A` -> `B8A`).
pub fn band_file_suffix(band: &str) -> String {
    match band.strip_prefix('B') {
        Some(n) if n.len() == 1 => format!("B0{n}"),
        _ => band.to_string(),
    }
}

/// Reader for one Sentinel-2 L1C SAFE directory
#[derive(Debug, Clone)]
pub struct Sentinel2Reader {
    pub base_path: PathBuf,
    pub granule_path: PathBuf,
    pub metadata: L1cMetadata,
}

impl Sentinel2Reader {
    pub fn open<P: AsRef<Path>>(safe_dir: P) -> Result<Self, ProductError> {
        let base = safe_dir.as_ref().to_path_buf();
        let product_xml = base.join("MTD_MSIL1C.xml");
        if !product_xml.is_file() {
            return Err(ProductError::MissingField("MTD_MSIL1C.xml"));
        }
        let granule_root = base.join("GRANULE");
        let granule_path = fs::read_dir(&granule_root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.is_dir())
            .ok_or(ProductError::MissingField("GRANULE directory"))?;

        let mut metadata = L1cMetadata::default();
        info!("Parsing product metadata {:?}", product_xml);
        parse_product_xml(&product_xml, &mut metadata)?;
        let tile_xml = granule_path.join("MTD_TL.xml");
        if tile_xml.is_file() {
            parse_tile_xml(&tile_xml, &mut metadata)?;
        } else {
            warn!("No MTD_TL.xml in {:?}; scene angles unavailable", granule_path);
        }
        if metadata.product_uri.is_none() {
            metadata.product_uri = base
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
        }

        Ok(Self {
            base_path: base,
            granule_path,
            metadata,
        })
    }

    pub fn band_path(&self, band: &str) -> Result<PathBuf, ProductError> {
        let img_data = self.granule_path.join("IMG_DATA");
        let suffix = format!("_{}.jp2", band_file_suffix(band));
        fs::read_dir(&img_data)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with(&suffix))
            })
            .ok_or(ProductError::MissingField("band raster"))
    }

    /// Read every MSI band at native resolution, clipped to the
    /// `[left, top, right, bottom]` fractions of the tile when given.
    pub fn read_scene(
        &self,
        properties: ImageProperties,
        clip: Option<[f64; 4]>,
    ) -> Result<Image, ProductError> {
        let mut props = properties;
        self.metadata.apply_to(&mut props);
        let mut image = Image::new(props);

        for band in SENTINEL2_BANDS {
            let path = match self.band_path(band.name) {
                Ok(p) => p,
                Err(_) => {
                    warn!("{}: no raster for {}", self.base_path.display(), band.name);
                    continue;
                }
            };
            let raster = GdalRaster::open(&path)?;
            let window = clip
                .map(|f| raster.fraction_window(f))
                .unwrap_or_else(|| raster.full_window());
            debug!("Reading {} window {:?}", band.name, window);
            let data = raster.read_window(1, window)?;
            if band.name == "B2" {
                image.properties.geotransform = raster.window_geotransform(window);
                image.properties.projection = self
                    .metadata
                    .epsg
                    .clone()
                    .unwrap_or_else(|| raster.metadata.projection.clone());
                image.properties.pixel_size = raster.metadata.geotransform[1].abs();
            }
            image.add_band_unchecked(band.name, data);
        }
        if image.bands().is_empty() {
            return Err(ProductError::MissingField("band rasters"));
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PRODUCT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_User_Product xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/User_Product_Level-1C.xsd">
  <n1:General_Info>
    <Product_Info>
      <PRODUCT_START_TIME>2023-06-15T15:58:19.024Z</PRODUCT_START_TIME>
      <PRODUCT_URI>S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB_20230615T194506.SAFE</PRODUCT_URI>
      <Datatake datatakeIdentifier="GS2A_20230615T155819_041671_N05.09">
        <SPACECRAFT_NAME>Sentinel-2A</SPACECRAFT_NAME>
      </Datatake>
    </Product_Info>
    <Product_Image_Characteristics>
      <QUANTIFICATION_VALUE unit="none">10000</QUANTIFICATION_VALUE>
      <Radiometric_Offset_List>
        <RADIO_ADD_OFFSET band_id="0">-1000</RADIO_ADD_OFFSET>
        <RADIO_ADD_OFFSET band_id="8">-1000</RADIO_ADD_OFFSET>
      </Radiometric_Offset_List>
    </Product_Image_Characteristics>
  </n1:General_Info>
  <n1:Quality_Indicators_Info>
    <Cloud_Coverage_Assessment>12.5</Cloud_Coverage_Assessment>
  </n1:Quality_Indicators_Info>
</n1:Level-1C_User_Product>"#;

    const TILE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:General_Info>
    <TILE_ID>S2A_OPER_MSI_L1C_TL_2APS_20230615T194506_A041671_T17SQB_N05.09</TILE_ID>
  </n1:General_Info>
  <n1:Geometric_Info>
    <Tile_Geocoding>
      <HORIZONTAL_CS_CODE>EPSG:32617</HORIZONTAL_CS_CODE>
    </Tile_Geocoding>
    <Tile_Angles>
      <Sun_Angles_Grid>
        <Zenith><COL_STEP unit="m">5000</COL_STEP></Zenith>
      </Sun_Angles_Grid>
      <Mean_Sun_Angle>
        <ZENITH_ANGLE unit="deg">22.5</ZENITH_ANGLE>
        <AZIMUTH_ANGLE unit="deg">95.25</AZIMUTH_ANGLE>
      </Mean_Sun_Angle>
      <Mean_Viewing_Incidence_Angle_List>
        <Mean_Viewing_Incidence_Angle bandId="1">
          <ZENITH_ANGLE unit="deg">4.0</ZENITH_ANGLE>
          <AZIMUTH_ANGLE unit="deg">110.0</AZIMUTH_ANGLE>
        </Mean_Viewing_Incidence_Angle>
        <Mean_Viewing_Incidence_Angle bandId="8">
          <ZENITH_ANGLE unit="deg">6.0</ZENITH_ANGLE>
          <AZIMUTH_ANGLE unit="deg">120.0</AZIMUTH_ANGLE>
        </Mean_Viewing_Incidence_Angle>
      </Mean_Viewing_Incidence_Angle_List>
    </Tile_Angles>
  </n1:Geometric_Info>
</n1:Level-1C_Tile_ID>"#;

    #[test]
    fn parses_product_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MTD_MSIL1C.xml");
        fs::write(&path, PRODUCT_XML).unwrap();
        let mut meta = L1cMetadata::default();
        parse_product_xml(&path, &mut meta).unwrap();

        assert_eq!(meta.quantification_value, Some(10000.0));
        assert_eq!(meta.radio_add_offset.get("B1"), Some(&-1000.0));
        assert_eq!(meta.radio_add_offset.get("B8A"), Some(&-1000.0));
        assert_eq!(meta.cloud_coverage, Some(12.5));
        assert_eq!(meta.spacecraft.as_deref(), Some("Sentinel-2A"));
        assert_eq!(
            meta.product_id().as_deref(),
            Some("S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB_20230615T194506")
        );
        assert!(meta.start_time().is_some());
    }

    #[test]
    fn parses_tile_angles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MTD_TL.xml");
        fs::write(&path, TILE_XML).unwrap();
        let mut meta = L1cMetadata::default();
        parse_tile_xml(&path, &mut meta).unwrap();

        assert_eq!(meta.sun_zenith, Some(22.5));
        assert_eq!(meta.sun_azimuth, Some(95.25));
        assert_eq!(meta.incidence.get("B2"), Some(&(4.0, 110.0)));
        assert_eq!(meta.incidence.get("B8A"), Some(&(6.0, 120.0)));
        assert_eq!(meta.epsg.as_deref(), Some("EPSG:32617"));
    }

    #[test]
    fn metadata_lands_in_properties() {
        let mut meta = L1cMetadata::default();
        meta.sun_zenith = Some(30.0);
        meta.incidence.insert("B2".into(), (5.0, 100.0));
        let mut props = ImageProperties::new("S2A_X", Utc::now());
        meta.apply_to(&mut props);
        assert_eq!(props.extra_f64(MEAN_SOLAR_ZENITH_ANGLE), Some(30.0));
        assert_eq!(props.extra_f64("MEAN_INCIDENCE_AZIMUTH_ANGLE_B2"), Some(100.0));
    }

    #[test]
    fn band_file_suffixes() {
        assert_eq!(band_file_suffix("B1"), "B01");
        assert_eq!(band_file_suffix("B12"), "B12");
        assert_eq!(band_file_suffix("B8A"), "B8A");
    }

    #[test]
    fn missing_product_xml_is_reported() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Sentinel2Reader::open(dir.path()),
            Err(ProductError::MissingField("MTD_MSIL1C.xml"))
        ));
    }
}
