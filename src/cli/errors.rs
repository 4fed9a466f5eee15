use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid region: {region}. Expected \"lon,lat\" or \"west,south,east,north\"")]
    InvalidRegion { region: String },

    #[error("Scale must be a positive number of metres, got: {scale}")]
    InvalidScale { scale: f64 },

    #[error("No scenes found between {start} and {end}")]
    NoScenes { start: String, end: String },

    #[error("{errors} of {total} scenes failed")]
    BatchFailed { errors: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Acolite(#[from] acolite_gee::Error),
}
