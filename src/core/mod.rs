//! Core processing: L1 conversion, masks, dark spectrum fitting, the
//! atmospheric correction driver and the products derived from it.
pub mod ancillary;
pub mod bathymetry;
pub mod correction;
pub mod dsf;
pub mod image;
pub mod l1_convert;
pub mod masks;
pub mod processing;
pub mod sensor;
pub mod settings;
pub mod water_quality;
