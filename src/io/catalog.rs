//! Local scene catalog (`catalog.json`).
//!
//! ```json
//! [
//!   {
//!     "id": "20230615T155819_20230615T160453_T17SQB",
//!     "product_id": "S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB_20230615T194506",
//!     "collection": "S2_HARMONIZED",
//!     "time_start": "2023-06-15T15:58:19Z",
//!     "cloudy_pixel_percentage": 12.5,
//!     "footprint": [-81.1, 24.4, -80.0, 25.4],
//!     "path": "S2A_MSIL1C_20230615T155819_N0509_R097_T17SQB_20230615T194506.SAFE",
//!     "cloud_probability_path": "cloud_probability/T17SQB_20230615.tif"
//!   }
//! ]
//! ```
//! Relative paths are resolved against the catalog directory.
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::image::Footprint;
use crate::error::{Error, Result};

pub const CATALOG_FILE: &str = "catalog.json";
pub const DEFAULT_COLLECTION: &str = "S2_HARMONIZED";

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub product_id: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    pub time_start: DateTime<Utc>,
    #[serde(default)]
    pub cloudy_pixel_percentage: Option<f64>,
    /// `[west, south, east, north]` in degrees
    pub footprint: [f64; 4],
    pub path: PathBuf,
    #[serde(default)]
    pub cloud_probability_path: Option<PathBuf>,
}

impl CatalogEntry {
    pub fn footprint(&self) -> Footprint {
        Footprint::from(self.footprint)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>, entries: Vec<CatalogEntry>) -> Self {
        Self {
            root: root.into(),
            entries,
        }
    }

    /// Load `catalog.json` from `root`.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let path = root.join(CATALOG_FILE);
        if !path.is_file() {
            return Err(Error::MissingDependency(format!(
                "scene catalog not found: {}",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(&path)?);
        let entries: Vec<CatalogEntry> = serde_json::from_reader(reader)?;
        info!("Loaded {} catalog entries from {:?}", entries.len(), path);
        Ok(Self { root, entries })
    }

    pub fn save(&self) -> Result<()> {
        let writer = BufWriter::new(File::create(self.root.join(CATALOG_FILE))?);
        serde_json::to_writer_pretty(writer, &self.entries)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_entries_with_default_collection() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CATALOG_FILE),
            r#"[{"id": "a", "product_id": "S2A_MSIL1C_X", "time_start": "2023-06-15T15:58:19Z",
                 "footprint": [-81.1, 24.4, -80.0, 25.4], "path": "a.SAFE"}]"#,
        )
        .unwrap();
        let catalog = Catalog::load(dir.path()).unwrap();
        let entry = catalog.get("a").unwrap();
        assert_eq!(entry.collection, DEFAULT_COLLECTION);
        assert!(entry.cloud_probability_path.is_none());
        assert_eq!(catalog.resolve(&entry.path), dir.path().join("a.SAFE"));
    }

    #[test]
    fn missing_catalog_is_missing_dependency() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Catalog::load(dir.path()),
            Err(Error::MissingDependency(_))
        ));
    }
}
