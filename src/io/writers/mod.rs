//! Output writers: multiband GeoTIFF, RGB quicklook JPEG with world file,
//! and metadata embedding or JSON sidecars.
pub mod jpeg;
pub mod metadata;
pub mod tiff;
pub mod worldfile;
