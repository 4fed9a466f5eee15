use gdal::{Dataset, Metadata, errors::GdalError as GdalCrateError};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors encountered when reading rasters through GDAL
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
}

/// Metadata extracted from a GDAL-supported dataset
#[derive(Debug, Clone)]
pub struct GdalMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    /// Affine geotransform coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: [f64; 6],
    /// Projection as `EPSG:<code>` when an authority is present, WKT otherwise
    pub projection: String,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

/// Pixel window `(col_off, row_off, cols, rows)`.
pub type Window = (usize, usize, usize, usize);

/// Window of a `rows` x `cols` grid covering the `[left, top, right, bottom]`
/// fractions. The window always holds at least one pixel inside the grid.
pub fn fraction_window(rows: usize, cols: usize, fractions: [f64; 4]) -> Window {
    let (w, h) = (cols as f64, rows as f64);
    let x0 = (fractions[0] * w).floor().clamp(0.0, w) as usize;
    let y0 = (fractions[1] * h).floor().clamp(0.0, h) as usize;
    let x1 = (fractions[2] * w).ceil().clamp(0.0, w) as usize;
    let y1 = (fractions[3] * h).ceil().clamp(0.0, h) as usize;
    let x0 = x0.min(cols.saturating_sub(1));
    let y0 = y0.min(rows.saturating_sub(1));
    (
        x0,
        y0,
        x1.saturating_sub(x0).max(1),
        y1.saturating_sub(y0).max(1),
    )
}

/// Reader for single band rasters (JPEG2000 MSI bands, cloud probability GeoTIFFs)
pub struct GdalRaster {
    pub dataset: Dataset,
    pub metadata: GdalMetadata,
}

// Helper to extract EPSG code from WKT authority tag
fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

impl GdalRaster {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let geotransform = dataset
            .geo_transform()
            .unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let proj = dataset.projection();
        let projection = if proj.starts_with("EPSG:") {
            proj
        } else if let Some(code) = parse_epsg(&proj) {
            code
        } else {
            proj
        };
        let mut metadata_map = HashMap::new();
        if let Some(entries) = dataset.metadata_domain("") {
            for entry in entries {
                if let Some((key, val)) = entry.split_once('=') {
                    metadata_map.insert(key.to_string(), val.to_string());
                }
            }
        }
        Ok(GdalRaster {
            dataset,
            metadata: GdalMetadata {
                size_x,
                size_y,
                bands,
                geotransform,
                projection,
                metadata: metadata_map,
            },
        })
    }

    /// Full extent window.
    pub fn full_window(&self) -> Window {
        (0, 0, self.metadata.size_x, self.metadata.size_y)
    }

    /// Window covering the `[left, top, right, bottom]` fractions of the raster.
    pub fn fraction_window(&self, fractions: [f64; 4]) -> Window {
        fraction_window(self.metadata.size_y, self.metadata.size_x, fractions)
    }

    /// Read a window of a band (1-based index) as `f32`, shape `(rows, cols)`.
    pub fn read_window(&self, index: usize, window: Window) -> Result<Array2<f32>, GdalError> {
        if index == 0 || index > self.metadata.bands {
            return Err(GdalError::UnsupportedFormat(format!(
                "Band index {} out of range",
                index
            )));
        }
        let (x, y, cols, rows) = window;
        let band = self.dataset.rasterband(index)?;
        let buf = band.read_as::<f32>((x as isize, y as isize), (cols, rows), (cols, rows), None)?;
        let data = buf.data().to_vec();
        let got = data.len();
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|_| GdalError::DimensionMismatch(cols, rows, got, 1))
    }

    /// Geotransform of `window`, origin shifted to its top-left corner.
    pub fn window_geotransform(&self, window: Window) -> [f64; 6] {
        let mut gt = self.metadata.geotransform;
        let (x, y, _, _) = window;
        gt[0] += x as f64 * gt[1] + y as f64 * gt[2];
        gt[3] += x as f64 * gt[4] + y as f64 * gt[5];
        gt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_from_wkt_authority() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 17N",AUTHORITY["EPSG","32617"]]"#;
        assert_eq!(parse_epsg(wkt).as_deref(), Some("EPSG:32617"));
        assert_eq!(parse_epsg("LOCAL_CS[\"x\"]"), None);
    }

    #[test]
    fn fraction_windows_stay_inside_the_grid() {
        assert_eq!(fraction_window(10, 20, [0.25, 0.5, 0.75, 1.0]), (5, 5, 10, 5));
        assert_eq!(fraction_window(10, 20, [0.0, 0.0, 1.0, 1.0]), (0, 0, 20, 10));
        // a region touching the far edge still yields one valid pixel
        assert_eq!(fraction_window(10, 20, [1.0, 1.0, 1.0, 1.0]), (19, 9, 1, 1));
    }
}
