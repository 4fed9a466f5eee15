//! High-level library API: correct a collection and export the results.
//! Prefer these entry points over the lower-level `core` and `backend`
//! modules when embedding the processor.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::backend::{
    Backend, ExportRequest, ImageCollection, LocalBackend, Region, SearchQuery, TaskStatus,
};
use crate::core::correction::Acolite;
use crate::core::dsf::LutDirectory;
use crate::core::image::Image;
use crate::core::settings::Settings;
use crate::error::{Error, Result};
use crate::types::Sensor;

/// Default quicklook composite.
pub const QUICKLOOK_BANDS: [&str; 3] = ["rhos_B4", "rhos_B3", "rhos_B2"];

/// How corrected scenes are exported.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Output pixel size in metres; the image pixel size when `None`
    pub scale: Option<f64>,
    /// Folder under the backend's export root
    pub folder: PathBuf,
    /// Bands to write; all bands when empty
    pub bands: Vec<String>,
    pub region: Option<Region>,
    pub quicklook: bool,
    pub max_pixels: u64,
    /// How long to wait for each export task
    pub timeout: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scale: None,
            folder: PathBuf::new(),
            bands: Vec::new(),
            region: None,
            quicklook: false,
            max_pixels: crate::backend::export::DEFAULT_MAX_PIXELS,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Batch processing report
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub outputs: Vec<PathBuf>,
}

/// Corrector over a LUT directory.
pub fn acolite_from_luts<P: AsRef<Path>>(lut_dir: P, settings: Settings) -> Result<Acolite> {
    settings.validate()?;
    let luts = LutDirectory::open(lut_dir)?;
    Ok(Acolite::new(Arc::new(luts), settings))
}

/// Search a local catalog.
pub fn search_local<P: AsRef<Path>>(root: P, query: &SearchQuery) -> Result<ImageCollection> {
    let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(root)?);
    ImageCollection::search(backend, query)
}

/// Output file stem for a corrected scene (`..._MSIL2R_...`).
pub fn export_description(image: &Image) -> String {
    let id = &image.properties.product_id;
    if id.contains("L1C") {
        id.replacen("L1C", "L2R", 1)
    } else {
        format!("{id}_L2R")
    }
}

/// Submit one export and wait for it. Returns the GeoTIFF path.
pub fn export_image(
    backend: &dyn Backend,
    image: Image,
    description: &str,
    options: &ExportOptions,
) -> Result<PathBuf> {
    let scale = options.scale.unwrap_or(image.properties.pixel_size);
    let mut request = ExportRequest::new(image, description, scale)
        .with_folder(&options.folder)
        .with_max_pixels(options.max_pixels)
        .with_bands(&options.bands);
    if let Some(region) = options.region {
        request = request.with_region(region);
    }
    if options.quicklook {
        let [r, g, b] = QUICKLOOK_BANDS;
        request = request.with_quicklook(r, g, b);
    }

    let id = backend.submit_export(request)?;
    match backend.wait_for_task(&id, options.timeout)? {
        TaskStatus::Completed(path) => Ok(path),
        TaskStatus::Failed(msg) => Err(Error::External(format!("export {id} failed: {msg}"))),
        status => Err(Error::External(format!(
            "export {id} did not finish within {:?} ({:?})",
            options.timeout, status
        ))),
    }
}

/// Correct scene `index` of `collection` and export it.
pub fn process_scene(
    acolite: &Acolite,
    collection: &ImageCollection,
    index: usize,
    options: &ExportOptions,
) -> Result<PathBuf> {
    let l1 = collection.materialize(index)?;
    let result = acolite.correct_images(vec![l1])?;
    let image = result
        .images
        .into_iter()
        .next()
        .ok_or_else(|| Error::Processing("correction returned no image".into()))?;
    let description = export_description(&image);
    export_image(collection.backend().as_ref(), image, &description, options)
}

/// Correct and export every scene of `collection`.
///
/// Configuration errors stop the run before any scene is read. Scenes without
/// a cloud probability raster are skipped when cloud masking is on. If
/// `continue_on_error` is true, other errors are counted in the report and
/// processing continues; otherwise, the first error is returned.
pub fn process_collection(
    acolite: &Acolite,
    collection: &ImageCollection,
    options: &ExportOptions,
    continue_on_error: bool,
) -> Result<BatchReport> {
    acolite.preflight(
        collection
            .scenes()
            .iter()
            .map(|s| Sensor::from_product_id(&s.product_id)),
    )?;
    let cloud_masking = acolite.settings().s2_cloud_proba;
    let collection = if cloud_masking {
        collection.with_cloud_probability()
    } else {
        collection.clone()
    };

    let mut report = BatchReport::default();
    for (index, scene) in collection.scenes().iter().enumerate() {
        if cloud_masking && !scene.has_cloud_probability {
            warn!("Skipping {}: no cloud probability", scene.product_id);
            report.skipped += 1;
            continue;
        }
        info!("Processing {} ({}/{})", scene.product_id, index + 1, collection.len());
        match process_scene(acolite, &collection, index, options) {
            Ok(path) => {
                info!("Successfully processed: {:?}", path);
                report.processed += 1;
                report.outputs.push(path);
            }
            Err(e) => {
                warn!("Error processing {}: {}", scene.product_id, e);
                report.errors += 1;
                if !continue_on_error || e.is_configuration() {
                    return Err(e);
                }
            }
        }
    }
    Ok(report)
}
