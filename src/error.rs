//! Crate-level error type and `Result` alias.
//! Configuration problems (unknown keys, bad discriminators, unsupported products)
//! and missing external data are separate variants from remote resource limits and
//! data-quality failures, so callers can decide what to retry and what to fix.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sentinel-2 product error: {0}")]
    Product(#[from] crate::io::ProductError),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Unknown setting: {key}")]
    UnknownSetting { key: String },

    #[error("Invalid value for {key}: {value:?} (allowed: {allowed})")]
    InvalidOption {
        key: &'static str,
        value: String,
        allowed: String,
    },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Unsupported water-quality product: {product:?} (supported: {supported})")]
    UnsupportedProduct { product: String, supported: String },

    #[error("Missing external dependency: {0}")]
    MissingDependency(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Band {band} not found in image")]
    MissingBand { band: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("External error: {0}")]
    External(String),
}

impl Error {
    pub fn external<E: std::fmt::Display>(e: E) -> Self {
        Error::External(e.to_string())
    }

    pub fn missing_band(band: impl Into<String>) -> Self {
        Error::MissingBand { band: band.into() }
    }

    /// True for errors that should stop a run before any scene is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownSetting { .. }
                | Error::InvalidOption { .. }
                | Error::InvalidSetting { .. }
                | Error::UnsupportedProduct { .. }
                | Error::MissingDependency(_)
        )
    }
}
