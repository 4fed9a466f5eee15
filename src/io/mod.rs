//! I/O layer: Sentinel-2 L1C SAFE products read through GDAL, the local
//! scene catalog, and `writers` for GeoTIFF/JPEG outputs with metadata.
pub mod catalog;
pub use catalog::{Catalog, CatalogEntry};

pub mod gdal;
pub use gdal::{GdalError, GdalMetadata, GdalRaster};

pub mod sentinel2;
pub use sentinel2::{L1cMetadata, ProductError, Sentinel2Reader};

pub mod writers;
