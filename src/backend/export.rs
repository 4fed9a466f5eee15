//! Export jobs: clip, resample and write an image to disk on a background thread.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use ndarray::s;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::backend::Region;
use crate::core::image::{Footprint, Image};
use crate::core::processing::resize::resample_band;
use crate::error::{Error, Result};
use crate::io::gdal::{Window, fraction_window};
use crate::io::writers::{jpeg, metadata, tiff, worldfile};

/// Pixel ceiling applied when a request does not set one.
pub const DEFAULT_MAX_PIXELS: u64 = 100_000_000;

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub image: Image,
    /// File stem of the outputs
    pub description: String,
    /// Output folder, relative to the backend's export root
    pub folder: PathBuf,
    /// Output pixel size in metres
    pub scale: f64,
    pub region: Option<Region>,
    pub max_pixels: u64,
    /// Bands written to the GeoTIFF; all bands when empty
    pub bands: Vec<String>,
    /// RGB bands of an optional JPEG quicklook
    pub quicklook: Option<[String; 3]>,
}

impl ExportRequest {
    pub fn new(image: Image, description: impl Into<String>, scale: f64) -> Self {
        Self {
            image,
            description: description.into(),
            folder: PathBuf::new(),
            scale,
            region: None,
            max_pixels: DEFAULT_MAX_PIXELS,
            bands: Vec::new(),
            quicklook: None,
        }
    }

    pub fn with_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn with_bands<S: AsRef<str>>(mut self, bands: &[S]) -> Self {
        self.bands = bands.iter().map(|b| b.as_ref().to_string()).collect();
        self
    }

    pub fn with_quicklook(mut self, r: &str, g: &str, b: &str) -> Self {
        self.quicklook = Some([r.to_string(), g.to_string(), b.to_string()]);
        self
    }

    fn clip_window(&self) -> Option<Window> {
        let (rows, cols) = self.image.shape()?;
        let footprint = self.image.properties.footprint?;
        let fractions = self.region?.clip_fractions(&footprint)?;
        Some(fraction_window(rows, cols, fractions))
    }

    /// `(rows, cols)` of the written raster.
    pub fn output_shape(&self) -> Result<(usize, usize)> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidSetting {
                key: "scale".to_string(),
                reason: format!("{} is not a positive pixel size", self.scale),
            });
        }
        let (rows, cols) = match self.clip_window() {
            Some((_, _, c, r)) => (r, c),
            None => self
                .image
                .shape()
                .ok_or_else(|| Error::Processing("export of an empty image".into()))?,
        };
        let ratio = self.image.properties.pixel_size / self.scale;
        Ok((
            ((rows as f64 * ratio).round() as usize).max(1),
            ((cols as f64 * ratio).round() as usize).max(1),
        ))
    }

    pub fn pixel_count(&self) -> Result<u64> {
        let (rows, cols) = self.output_shape()?;
        Ok(rows as u64 * cols as u64)
    }

    /// Reject the request when it exceeds its pixel ceiling.
    pub fn check_limits(&self) -> Result<()> {
        let count = self.pixel_count()?;
        if count > self.max_pixels {
            return Err(Error::ResourceExhausted(format!(
                "export {} has {} pixels, above max_pixels {}",
                self.description, count, self.max_pixels
            )));
        }
        Ok(())
    }
}

fn clip_image(image: &Image, window: Window) -> Result<Image> {
    let (x, y, cols, rows) = window;
    let mut props = image.properties.clone();
    let gt = &mut props.geotransform;
    gt[0] += x as f64 * gt[1] + y as f64 * gt[2];
    gt[3] += x as f64 * gt[4] + y as f64 * gt[5];
    if let (Some(fp), Some((full_rows, full_cols))) = (props.footprint, image.shape()) {
        let dx = (fp.east - fp.west) / full_cols as f64;
        let dy = (fp.north - fp.south) / full_rows as f64;
        props.footprint = Some(Footprint::new(
            fp.west + x as f64 * dx,
            fp.north - (y + rows) as f64 * dy,
            fp.west + (x + cols) as f64 * dx,
            fp.north - y as f64 * dy,
        ));
    }
    let mut out = Image::new(props);
    for band in image.bands() {
        let view = band.data.slice(s![y..y + rows, x..x + cols]);
        out.add_band(band.name.clone(), view.to_owned())?;
    }
    Ok(out)
}

fn rescale_image(image: &Image, rows: usize, cols: usize, scale: f64) -> Result<Image> {
    let Some((src_rows, src_cols)) = image.shape() else {
        return Ok(image.clone());
    };
    if (src_rows, src_cols) == (rows, cols) {
        return Ok(image.clone());
    }
    let mut props = image.properties.clone();
    props.geotransform[1] *= src_cols as f64 / cols as f64;
    props.geotransform[5] *= src_rows as f64 / rows as f64;
    props.pixel_size = scale;
    let mut out = Image::new(props);
    for band in image.bands() {
        out.add_band(band.name.clone(), resample_band(&band.data, rows, cols)?)?;
    }
    Ok(out)
}

/// Clip, resample and write the request under `root`. Returns the GeoTIFF path.
pub fn run_export(root: &Path, request: &ExportRequest) -> Result<PathBuf> {
    let folder = root.join(&request.folder);
    fs::create_dir_all(&folder)?;

    let mut image = request.image.clone();
    if let Some(window) = request.clip_window() {
        image = clip_image(&image, window)?;
    }
    let (rows, cols) = request.output_shape()?;
    image = rescale_image(&image, rows, cols, request.scale)?;

    let selected;
    let written = if request.bands.is_empty() {
        &image
    } else {
        let names: Vec<&str> = request.bands.iter().map(String::as_str).collect();
        selected = image.select(&names)?;
        &selected
    };

    let tif_path = folder.join(format!("{}.tif", request.description));
    {
        let mut ds = tiff::write_tiff_f32(&tif_path, written)?;
        metadata::embed_tiff_metadata(&mut ds, &written.properties)?;
    }
    info!(
        "Wrote {} ({}x{}, {} bands)",
        tif_path.display(),
        cols,
        rows,
        written.bands().len()
    );

    if let Some([r, g, b]) = &request.quicklook {
        let (rgb, qc, qr) = jpeg::quicklook_rgb(&image, [r, g, b], None)?;
        let jpg_path = folder.join(format!("{}.jpg", request.description));
        jpeg::write_rgb_jpeg(&jpg_path, qc, qr, &rgb)?;
        worldfile::write_world_file(&jpg_path, image.properties.geotransform)?;
        if !image.properties.projection.is_empty() {
            worldfile::write_prj_file(&jpg_path, &image.properties.projection)?;
        }
        metadata::create_metadata_sidecar(&jpg_path, written)?;
    }
    Ok(tif_path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed(PathBuf),
    Failed(String),
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed(_) | TaskStatus::Failed(_))
    }
}

/// Fire-and-forget export jobs tracked by id.
#[derive(Debug, Clone)]
pub struct ExportQueue {
    root: PathBuf,
    next_id: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskStatus>>>,
}

fn lock(tasks: &Mutex<HashMap<TaskId, TaskStatus>>) -> MutexGuard<'_, HashMap<TaskId, TaskStatus>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExportQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: Arc::new(AtomicU64::new(1)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn submit(&self, request: ExportRequest) -> Result<TaskId> {
        request.check_limits()?;
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.tasks).insert(id, TaskStatus::Pending);
        info!("Queued export {} as {}", request.description, id);

        let tasks = Arc::clone(&self.tasks);
        let root = self.root.clone();
        thread::spawn(move || {
            lock(&tasks).insert(id, TaskStatus::Running);
            let status = match run_export(&root, &request) {
                Ok(path) => TaskStatus::Completed(path),
                Err(e) => {
                    error!("Export {} failed: {}", request.description, e);
                    TaskStatus::Failed(e.to_string())
                }
            };
            lock(&tasks).insert(id, status);
        });
        Ok(id)
    }

    pub fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        lock(&self.tasks)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Processing(format!("unknown export {}", id)))
    }
}
