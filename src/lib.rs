#![doc = r#"
acolite-gee: ACOLITE dark spectrum fitting atmospheric correction for
Sentinel-2 MSI scenes, with water-quality and bathymetry products.

Scenes come from a [`backend::Backend`]: a catalog that can search, read
the pixels of one scene and run export jobs. [`backend::LocalBackend`] serves
Sentinel-2 L1C SAFE products listed in a local `catalog.json`.

Requirements
------------
- GDAL development headers and runtime available on your system.
- ACOLITE LUTs exported to JSON (see [`core::dsf::LutDirectory`]).
- Rust 2024 edition toolchain.

Quick start: correct and export a date range
--------------------------------------------
```rust,no_run
use acolite_gee::api::{self, ExportOptions};
use acolite_gee::backend::{Region, SearchQuery};
use acolite_gee::{Settings, WaterProduct};

fn main() -> acolite_gee::Result<()> {
    let settings = Settings {
        l2w_parameters: vec![WaterProduct::ChlOc3, WaterProduct::SpmNechad2016],
        ..Settings::default()
    };
    let acolite = api::acolite_from_luts("/data/acolite-luts", settings)?;

    let region = Region::Point { lon: -80.5, lat: 24.5 };
    let query = SearchQuery::new(region, "2023-06-01", "2023-07-01")?;
    let collection = api::search_local("/data/catalog", &query)?;

    let report = api::process_collection(&acolite, &collection, &ExportOptions::default(), true)?;
    println!("processed={} skipped={} errors={}", report.processed, report.skipped, report.errors);
    Ok(())
}
```

In-memory correction
--------------------
```rust,no_run
use std::sync::Arc;
use acolite_gee::{Acolite, LutDirectory, Settings};

fn correct(l1c: Vec<acolite_gee::Image>) -> acolite_gee::Result<()> {
    let luts = LutDirectory::open("/data/acolite-luts")?;
    let result = Acolite::new(Arc::new(luts), Settings::default()).correct_images(l1c)?;
    for applied in &result.applied {
        println!("{}: {} taua={:.3}", applied.product_id, applied.model, applied.taua);
    }
    Ok(())
}
```

Error handling
--------------
All public functions return `acolite_gee::Result<T>`. Configuration errors
(`Error::is_configuration`) are raised before any scene is read; resource
limits surface as `Error::ResourceExhausted` and bad data as
`Error::DataQuality`.

Useful modules
--------------
- [`api`]: high-level entry points.
- [`core`]: correction, masks, water quality and bathymetry.
- [`backend`]: catalog search, lazy collections and exports.
- [`io`]: Sentinel-2 readers and GeoTIFF/JPEG writers.
- [`error`]: crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod backend;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
pub use crate::core::correction::{Acolite, AppliedCorrection, CorrectionResult};
pub use crate::core::dsf::{LutDirectory, LutProvider};
pub use crate::core::image::{Footprint, Image, ImageProperties, ViewGeometry};
pub use crate::core::settings::{Ancillary, Settings};
pub use error::{Error, Result};
pub use types::{
    AerosolCorrection, GlintCorrectionMethod, ModelSelection, Sensor, SpectrumOption,
    WaterProduct,
};

// Backends
pub use backend::{Backend, ImageCollection, LocalBackend, Region, SearchQuery};

// High-level API re-exports
pub use api::{BatchReport, ExportOptions, process_collection, process_scene};
