//! Backend serving Sentinel-2 L1C SAFE scenes listed in a local `catalog.json`.
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::backend::export::{ExportQueue, ExportRequest, TaskId, TaskStatus};
use crate::backend::{Backend, MaterializeOptions, SceneRef, SearchQuery};
use crate::core::image::{Footprint, Image, ImageProperties};
use crate::core::masks::CLOUD_PROBABILITY_BAND;
use crate::core::processing::resize::resample_band;
use crate::error::{Error, Result};
use crate::io::catalog::{Catalog, CatalogEntry};
use crate::io::gdal::GdalRaster;
use crate::io::sentinel2::Sentinel2Reader;

#[derive(Debug, Clone)]
pub struct LocalBackend {
    catalog: Catalog,
    exports: ExportQueue,
}

impl LocalBackend {
    /// Open the catalog in `root`. Exports are written under `root/exports`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let catalog = Catalog::load(root.as_ref())?;
        let exports = ExportQueue::new(root.as_ref().join("exports"));
        Ok(Self { catalog, exports })
    }

    pub fn with_export_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.exports = ExportQueue::new(root);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn entry(&self, scene: &SceneRef) -> Result<&CatalogEntry> {
        self.catalog.get(&scene.id).ok_or_else(|| {
            Error::Processing(format!("scene {} is not in the catalog", scene.id))
        })
    }
}

fn scene_ref(entry: &CatalogEntry) -> SceneRef {
    SceneRef {
        id: entry.id.clone(),
        product_id: entry.product_id.clone(),
        collection: entry.collection.clone(),
        time_start: entry.time_start,
        footprint: entry.footprint(),
        cloudy_pixel_percentage: entry.cloudy_pixel_percentage,
        has_cloud_probability: entry.cloud_probability_path.is_some(),
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SceneRef>> {
        let scenes: Vec<SceneRef> = self
            .catalog
            .entries()
            .iter()
            .map(scene_ref)
            .filter(|s| query.matches(s))
            .collect();
        debug!("Catalog search matched {} scenes", scenes.len());
        Ok(scenes)
    }

    fn materialize(&self, scene: &SceneRef, options: &MaterializeOptions) -> Result<Image> {
        let entry = self.entry(scene)?;
        let footprint = entry.footprint();
        let clip = options.region.and_then(|r| r.clip_fractions(&footprint));

        let reader = Sentinel2Reader::open(self.catalog.resolve(&entry.path))?;
        let mut props = ImageProperties::new(entry.product_id.clone(), entry.time_start);
        props.cloudy_pixel_percentage = entry.cloudy_pixel_percentage;
        props.footprint = Some(match clip {
            Some([l, t, r, b]) => {
                let (w, h) = (footprint.east - footprint.west, footprint.north - footprint.south);
                Footprint::new(
                    footprint.west + l * w,
                    footprint.north - b * h,
                    footprint.west + r * w,
                    footprint.north - t * h,
                )
            }
            None => footprint,
        });
        info!("Materializing {}", entry.product_id);
        let mut image = reader.read_scene(props, clip)?;

        if options.cloud_probability {
            let path = entry.cloud_probability_path.as_ref().ok_or_else(|| {
                Error::MissingDependency(format!(
                    "no cloud probability raster for {}",
                    entry.product_id
                ))
            })?;
            let raster = GdalRaster::open(self.catalog.resolve(path))?;
            let window = clip
                .map(|f| raster.fraction_window(f))
                .unwrap_or_else(|| raster.full_window());
            let mut probability = raster.read_window(1, window)?;
            // joined onto the B2 grid so it follows the scene through resampling
            if let Ok(b2) = image.band("B2") {
                let (rows, cols) = b2.dim();
                if probability.dim() != (rows, cols) {
                    probability = resample_band(&probability, rows, cols)?;
                }
            }
            image.add_band_unchecked(CLOUD_PROBABILITY_BAND, probability);
        }
        Ok(image)
    }

    fn submit_export(&self, request: ExportRequest) -> Result<TaskId> {
        self.exports.submit(request)
    }

    fn task_status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.exports.status(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ImageCollection, Region, parse_iso_time};
    use crate::io::catalog::CATALOG_FILE;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_catalog(dir: &Path) {
        std::fs::write(
            dir.join(CATALOG_FILE),
            r#"[
  {"id": "late", "product_id": "S2B_MSIL1C_20230620T155819_N0509_R097_T17SQB_X",
   "time_start": "2023-06-20T15:58:19Z", "cloudy_pixel_percentage": 5.0,
   "footprint": [-81.0, 24.0, -80.0, 25.0], "path": "late.SAFE"},
  {"id": "early", "product_id": "S2A_MSIL1C_20230605T155819_N0509_R097_T17SQB_X",
   "time_start": "2023-06-05T15:58:19Z", "cloudy_pixel_percentage": 50.0,
   "footprint": [-81.0, 24.0, -80.0, 25.0], "path": "early.SAFE",
   "cloud_probability_path": "early_prob.tif"},
  {"id": "elsewhere", "product_id": "S2A_MSIL1C_20230610T100000_N0509_R022_T31UFS_X",
   "time_start": "2023-06-10T10:00:00Z",
   "footprint": [4.0, 51.0, 5.0, 52.0], "path": "elsewhere.SAFE"}
]"#,
        )
        .unwrap();
    }

    #[test]
    fn search_is_sorted_by_time_and_filtered_by_region() {
        let dir = tempdir().unwrap();
        write_catalog(dir.path());
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(dir.path()).unwrap());
        let query = SearchQuery::new(
            Region::Point {
                lon: -80.5,
                lat: 24.5,
            },
            "2023-06-01",
            "2023-07-01",
        )
        .unwrap();
        let collection = ImageCollection::search(Arc::clone(&backend), &query).unwrap();
        let ids: Vec<&str> = collection.scenes().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(collection.scenes()[0].has_cloud_probability);

        let clear = collection.filter(|s| s.cloudy_pixel_percentage.unwrap_or(0.0) < 10.0);
        assert_eq!(clear.len(), 1);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn search_list_skips_empty_ranges() {
        let dir = tempdir().unwrap();
        write_catalog(dir.path());
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(dir.path()).unwrap());
        let template = SearchQuery::new(
            Region::Point {
                lon: -80.5,
                lat: 24.5,
            },
            "2023-01-01",
            "2023-12-31",
        )
        .unwrap();
        let ranges = vec![
            ("2023-06-01".to_string(), "2023-06-10".to_string()),
            ("2023-03-01".to_string(), "2023-03-10".to_string()),
            ("2023-06-15".to_string(), "2023-06-30".to_string()),
        ];
        let collection = ImageCollection::search_list(backend, &template, &ranges).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(
            collection.scenes()[1].time_start,
            parse_iso_time("2023-06-20T15:58:19Z").unwrap()
        );
    }

    #[test]
    fn search_list_rejects_inverted_range() {
        let dir = tempdir().unwrap();
        write_catalog(dir.path());
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(dir.path()).unwrap());
        let template = SearchQuery::new(Region::Point { lon: -80.5, lat: 24.5 }, "2023-01-01", "2023-12-31")
            .unwrap();
        let ranges = vec![
            ("2023-06-01".to_string(), "2023-06-10".to_string()),
            ("2023-06-30".to_string(), "2023-06-15".to_string()),
        ];
        let err = ImageCollection::search_list(backend, &template, &ranges).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { .. }));
    }

    #[test]
    fn materialize_out_of_range_is_an_error() {
        let dir = tempdir().unwrap();
        write_catalog(dir.path());
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::open(dir.path()).unwrap());
        let collection = ImageCollection::from_scenes(backend, Vec::new());
        assert!(collection.materialize(0).is_err());
    }
}
