use gdal::{Dataset, Metadata};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::image::{Image, ImageProperties};
use crate::error::Result;
use crate::io::gdal::GdalError;

/// Software that produced an output, recorded in every export.
pub const CONVERSION_TOOL: &str = env!("CARGO_PKG_NAME");
pub const CONVERSION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Flat `KEY=value` metadata for an image: scene identity, geometry and
/// every extra property. Structured extras are stored as compact JSON.
pub fn extract_metadata_fields(props: &ImageProperties) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("PRODUCT_ID".to_string(), props.product_id.clone());
    metadata.insert("TIME_START".to_string(), props.time_start.to_rfc3339());
    metadata.insert("PIXEL_SIZE".to_string(), props.pixel_size.to_string());
    if let Some(cloud) = props.cloudy_pixel_percentage {
        metadata.insert("CLOUDY_PIXEL_PERCENTAGE".to_string(), cloud.to_string());
    }
    if let Some(g) = props.geometry {
        metadata.insert("SZA".to_string(), g.sza.to_string());
        metadata.insert("SAA".to_string(), g.saa.to_string());
        metadata.insert("VZA".to_string(), g.vza.to_string());
        metadata.insert("VAA".to_string(), g.vaa.to_string());
        metadata.insert("RAA".to_string(), g.raa.to_string());
    }
    for (key, value) in &props.extras {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        metadata.insert(key.to_ascii_uppercase(), text);
    }
    metadata.insert("CONVERSION_TOOL".to_string(), CONVERSION_TOOL.to_string());
    metadata.insert(
        "CONVERSION_VERSION".to_string(),
        CONVERSION_VERSION.to_string(),
    );
    metadata.insert(
        "CONVERSION_TIMESTAMP".to_string(),
        chrono::Utc::now().to_rfc3339(),
    );
    metadata
}

/// Embed image metadata into a GeoTIFF dataset.
pub fn embed_tiff_metadata(
    ds: &mut Dataset,
    props: &ImageProperties,
) -> std::result::Result<(), GdalError> {
    for (key, value) in extract_metadata_fields(props) {
        ds.set_metadata_item(&key, &value, "")?;
    }
    Ok(())
}

/// JSON document describing an exported image.
pub fn metadata_json(image: &Image) -> Value {
    let props = &image.properties;
    let mut json = Map::new();
    json.insert("product_id".into(), Value::from(props.product_id.clone()));
    json.insert("time_start".into(), Value::from(props.time_start.to_rfc3339()));
    json.insert("pixel_size".into(), Value::from(props.pixel_size));
    json.insert(
        "geotransform".into(),
        Value::Array(props.geotransform.iter().map(|&v| Value::from(v)).collect()),
    );
    if !props.projection.is_empty() {
        json.insert("crs".into(), Value::from(props.projection.clone()));
    }
    if let Some(g) = props.geometry {
        json.insert("geometry".into(), serde_json::to_value(g).unwrap_or(Value::Null));
    }
    json.insert(
        "bands".into(),
        Value::Array(
            image
                .band_names()
                .into_iter()
                .map(|n| Value::from(n.to_string()))
                .collect(),
        ),
    );
    json.insert(
        "properties".into(),
        Value::Object(props.extras.clone().into_iter().collect()),
    );
    json.insert("conversion_tool".into(), Value::from(CONVERSION_TOOL));
    json.insert("conversion_version".into(), Value::from(CONVERSION_VERSION));
    Value::Object(json)
}

/// Write `<output>.json` next to an exported file.
pub fn create_metadata_sidecar(output_path: &Path, image: &Image) -> Result<PathBuf> {
    let sidecar_path = output_path.with_extension("json");
    let json_string = serde_json::to_string_pretty(&metadata_json(image))?;
    std::fs::write(&sidecar_path, json_string)?;
    info!("Created metadata sidecar: {:?}", sidecar_path);
    Ok(sidecar_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ndarray::Array2;
    use tempfile::tempdir;

    #[test]
    fn extras_are_flattened_uppercase() {
        let mut props = ImageProperties::new("S2A_MSIL1C_X", Utc::now());
        props.extras.insert("ac_model".into(), Value::from("MOD2"));
        props
            .extras
            .insert("correction".into(), serde_json::json!({"taua": 0.1}));
        let fields = extract_metadata_fields(&props);
        assert_eq!(fields["AC_MODEL"], "MOD2");
        assert_eq!(fields["CORRECTION"], r#"{"taua":0.1}"#);
        assert_eq!(fields["PRODUCT_ID"], "S2A_MSIL1C_X");
    }

    #[test]
    fn sidecar_lists_bands() {
        let dir = tempdir().unwrap();
        let mut image = Image::new(ImageProperties::new("S2A_MSIL1C_X", Utc::now()));
        image.add_band("rhos_B2", Array2::zeros((2, 2))).unwrap();
        let path = create_metadata_sidecar(&dir.path().join("out.tif"), &image).unwrap();
        let json: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["bands"][0], "rhos_B2");
    }
}
