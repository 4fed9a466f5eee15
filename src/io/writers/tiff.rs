use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager, Metadata};
use std::path::Path;

use crate::core::image::Image;
use crate::io::gdal::GdalError;

/// Write every band of `image` as a `Float32` band of a GeoTIFF. Band
/// descriptions carry the band names and NaN is declared as nodata.
pub fn write_tiff_f32(output: &Path, image: &Image) -> Result<Dataset, GdalError> {
    let (rows, cols) = image
        .shape()
        .ok_or_else(|| GdalError::UnsupportedFormat("image has no bands".into()))?;
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds =
        driver.create_with_band_type::<f32, _>(output, cols, rows, image.bands().len())?;

    for (i, band) in image.bands().iter().enumerate() {
        if band.data.dim() != (rows, cols) {
            let (r, c) = band.data.dim();
            return Err(GdalError::DimensionMismatch(cols, rows, c, r));
        }
        let mut handle = ds.rasterband(i + 1)?;
        handle.set_description(&band.name)?;
        handle.set_no_data_value(Some(f64::NAN))?;
        let data: Vec<f32> = band.data.iter().copied().collect();
        let mut buf = Buffer::new((cols, rows), data);
        handle.write((0, 0), (cols, rows), &mut buf)?;
    }

    let props = &image.properties;
    let is_identity = |gt: [f64; 6]| gt == [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    if !is_identity(props.geotransform) {
        ds.set_geo_transform(&props.geotransform)?;
        if !props.projection.is_empty() {
            ds.set_projection(&props.projection)?;
        }
    }
    Ok(ds)
}
