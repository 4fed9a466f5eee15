//! Raster primitives shared by the L1 converter and the writers.
pub mod morphology;
pub mod resize;
