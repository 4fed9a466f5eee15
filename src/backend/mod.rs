//! Image catalog backends and the lazy collection handle.
//!
//! A [`Backend`] answers catalog queries, loads pixels for one scene on
//! request and runs export jobs. [`ImageCollection`] is an immutable handle
//! over a backend and an ordered list of scene references: filtering returns
//! a new handle and pixels are only read by [`ImageCollection::materialize`].
pub mod export;
pub mod local;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use export::{ExportQueue, ExportRequest, TaskId, TaskStatus};
pub use local::LocalBackend;

use crate::core::image::{Footprint, Image};
pub use crate::io::catalog::DEFAULT_COLLECTION;
use crate::error::{Error, Result};

/// Area of interest in lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Point { lon: f64, lat: f64 },
    BBox(Footprint),
}

impl Region {
    pub fn intersects(&self, footprint: &Footprint) -> bool {
        match self {
            Region::Point { lon, lat } => footprint.contains(*lon, *lat),
            Region::BBox(bbox) => bbox.intersects(footprint),
        }
    }

    /// `[left, top, right, bottom]` fractions of `footprint` covered by this
    /// region, mapping lon/lat linearly onto the raster. `None` for points
    /// and for regions that do not overlap.
    pub fn clip_fractions(&self, footprint: &Footprint) -> Option<[f64; 4]> {
        let Region::BBox(bbox) = self else {
            return None;
        };
        if !bbox.intersects(footprint) {
            return None;
        }
        let width = footprint.east - footprint.west;
        let height = footprint.north - footprint.south;
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        let left = ((bbox.west - footprint.west) / width).clamp(0.0, 1.0);
        let right = ((bbox.east - footprint.west) / width).clamp(0.0, 1.0);
        let top = ((footprint.north - bbox.north) / height).clamp(0.0, 1.0);
        let bottom = ((footprint.north - bbox.south) / height).clamp(0.0, 1.0);
        Some([left, top, right, bottom])
    }

    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Region::Point { lon, lat } => (*lon, *lat),
            Region::BBox(b) => ((b.west + b.east) / 2.0, (b.south + b.north) / 2.0),
        }
    }
}

impl std::str::FromStr for Region {
    type Err = Error;

    /// `lon,lat` or `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidSetting {
                key: "region".to_string(),
                reason: format!("{s:?}: {e}"),
            })?;
        match values.as_slice() {
            [lon, lat] => Ok(Region::Point {
                lon: *lon,
                lat: *lat,
            }),
            [w, s, e, n] if w < e && s < n => Ok(Region::BBox(Footprint::new(*w, *s, *e, *n))),
            _ => Err(Error::InvalidSetting {
                key: "region".to_string(),
                reason: format!("{s:?} is neither lon,lat nor west,south,east,north"),
            }),
        }
    }
}

/// Parse an ISO date (`2023-06-15`) or timestamp (`2023-06-15T10:00:00Z`).
pub fn parse_iso_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| Error::InvalidSetting {
            key: "date".to_string(),
            reason: format!("{value:?} is not an ISO date"),
        })
}

/// Catalog query. `end` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub region: Region,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub collection: String,
    pub max_cloud_cover: Option<f64>,
    /// Matched as a substring of the product id (`T17SQB`)
    pub tile: Option<String>,
}

fn date_range(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = parse_iso_time(start)?;
    let end = parse_iso_time(end)?;
    if end <= start {
        return Err(Error::InvalidSetting {
            key: "date".to_string(),
            reason: format!("end {end} is not after start {start}"),
        });
    }
    Ok((start, end))
}

impl SearchQuery {
    pub fn new(region: Region, start: &str, end: &str) -> Result<Self> {
        let (start, end) = date_range(start, end)?;
        Ok(Self {
            region,
            start,
            end,
            collection: DEFAULT_COLLECTION.to_string(),
            max_cloud_cover: None,
            tile: None,
        })
    }

    /// Same query over another date range (end exclusive).
    pub fn with_dates(&self, start: &str, end: &str) -> Result<Self> {
        let (start, end) = date_range(start, end)?;
        Ok(Self {
            start,
            end,
            ..self.clone()
        })
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_max_cloud_cover(mut self, percent: f64) -> Self {
        self.max_cloud_cover = Some(percent);
        self
    }

    pub fn with_tile(mut self, tile: impl Into<String>) -> Self {
        self.tile = Some(tile.into());
        self
    }

    pub fn matches(&self, scene: &SceneRef) -> bool {
        scene.collection == self.collection
            && self.region.intersects(&scene.footprint)
            && scene.time_start >= self.start
            && scene.time_start < self.end
            && self.max_cloud_cover.is_none_or(|max| {
                scene.cloudy_pixel_percentage.is_none_or(|c| c <= max)
            })
            && self
                .tile
                .as_deref()
                .is_none_or(|tile| scene.product_id.contains(tile))
    }
}

/// Reference to one scene in a backend. Holds no pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub product_id: String,
    pub collection: String,
    pub time_start: DateTime<Utc>,
    pub footprint: Footprint,
    pub cloudy_pixel_percentage: Option<f64>,
    pub has_cloud_probability: bool,
}

/// How a scene is read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaterializeOptions {
    pub region: Option<Region>,
    /// Join the cloud probability raster as a `probability` band
    pub cloud_probability: bool,
}

/// Remote or local image catalog with export capability.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, query: &SearchQuery) -> Result<Vec<SceneRef>>;

    fn materialize(&self, scene: &SceneRef, options: &MaterializeOptions) -> Result<Image>;

    /// Queue an export. Requests over their pixel ceiling are rejected here
    /// with `Error::ResourceExhausted`.
    fn submit_export(&self, request: ExportRequest) -> Result<TaskId>;

    fn task_status(&self, id: &TaskId) -> Result<TaskStatus>;

    /// Poll `task_status` until the task finishes or `timeout` passes.
    fn wait_for_task(&self, id: &TaskId, timeout: Duration) -> Result<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.task_status(id)?;
            if status.is_finished() || Instant::now() >= deadline {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Lazy, immutable handle over scenes of a backend.
#[derive(Clone)]
pub struct ImageCollection {
    backend: Arc<dyn Backend>,
    scenes: Vec<SceneRef>,
    options: MaterializeOptions,
}

impl fmt::Debug for ImageCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCollection")
            .field("backend", &self.backend.name())
            .field("scenes", &self.scenes.len())
            .field("options", &self.options)
            .finish()
    }
}

impl ImageCollection {
    pub fn from_scenes(backend: Arc<dyn Backend>, scenes: Vec<SceneRef>) -> Self {
        Self {
            backend,
            scenes,
            options: MaterializeOptions::default(),
        }
    }

    /// Scenes matching `query`, sorted by acquisition time.
    pub fn search(backend: Arc<dyn Backend>, query: &SearchQuery) -> Result<Self> {
        let mut scenes = backend.search(query)?;
        scenes.sort_by_key(|s| s.time_start);
        info!(
            "{}: {} scenes between {} and {}",
            backend.name(),
            scenes.len(),
            query.start,
            query.end
        );
        Ok(Self {
            backend,
            scenes,
            options: MaterializeOptions {
                region: Some(query.region),
                cloud_probability: false,
            },
        })
    }

    /// First scene of each `(start, end)` range. Ranges without a match are skipped.
    pub fn search_list(
        backend: Arc<dyn Backend>,
        template: &SearchQuery,
        ranges: &[(String, String)],
    ) -> Result<Self> {
        let mut scenes = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let query = template.with_dates(start, end)?;
            let mut found = backend.search(&query)?;
            found.sort_by_key(|s| s.time_start);
            match found.into_iter().next() {
                Some(scene) => scenes.push(scene),
                None => warn!("No scene between {} and {}", start, end),
            }
        }
        Ok(Self {
            backend,
            scenes,
            options: MaterializeOptions {
                region: Some(template.region),
                cloud_probability: false,
            },
        })
    }

    /// Handle whose images carry the joined cloud probability band.
    pub fn with_cloud_probability(&self) -> Self {
        let mut joined = self.clone();
        joined.options.cloud_probability = true;
        joined
    }

    pub fn filter<F: Fn(&SceneRef) -> bool>(&self, keep: F) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            scenes: self.scenes.iter().filter(|s| keep(s)).cloned().collect(),
            options: self.options,
        }
    }

    pub fn first(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            scenes: self.scenes.iter().take(1).cloned().collect(),
            options: self.options,
        }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[SceneRef] {
        &self.scenes
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn options(&self) -> &MaterializeOptions {
        &self.options
    }

    /// Read the pixels of scene `index`.
    pub fn materialize(&self, index: usize) -> Result<Image> {
        let scene = self.scenes.get(index).ok_or_else(|| {
            Error::Processing(format!(
                "scene index {} out of range ({} scenes)",
                index,
                self.scenes.len()
            ))
        })?;
        self.backend.materialize(scene, &self.options)
    }

    pub fn submit_export(&self, request: ExportRequest) -> Result<TaskId> {
        self.backend.submit_export(request)
    }
}
