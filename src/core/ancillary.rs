//! Ancillary atmosphere (ozone, water vapour, wind, pressure) retrieval.
use std::env;

use chrono::{DateTime, Utc};

use crate::core::settings::{Ancillary, Settings};
use crate::error::Result;

pub const EARTHDATA_USER: &str = "EARTHDATA_u";
pub const EARTHDATA_PASSWORD: &str = "EARTHDATA_p";

/// NASA Earthdata login used by ancillary providers.
#[derive(Clone, PartialEq, Eq)]
pub struct EarthdataCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for EarthdataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarthdataCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl EarthdataCredentials {
    /// Credentials from settings, falling back to the `EARTHDATA_u` and
    /// `EARTHDATA_p` environment variables. Empty values count as unset.
    pub fn resolve(settings: &Settings) -> Option<Self> {
        let pick = |value: &Option<String>, var: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env::var(var).ok().filter(|v| !v.is_empty()))
        };
        Some(Self {
            user: pick(&settings.earthdata_u, EARTHDATA_USER)?,
            password: pick(&settings.earthdata_p, EARTHDATA_PASSWORD)?,
        })
    }
}

/// Source of ancillary data for a place and time.
pub trait AncillaryProvider: Send + Sync {
    fn ancillary(
        &self,
        time: DateTime<Utc>,
        lon: f64,
        lat: f64,
        credentials: Option<&EarthdataCredentials>,
    ) -> Result<Ancillary>;
}

/// Provider returning the same values everywhere.
#[derive(Debug, Clone, Copy)]
pub struct FixedAncillary(pub Ancillary);

impl AncillaryProvider for FixedAncillary {
    fn ancillary(
        &self,
        _time: DateTime<Utc>,
        _lon: f64,
        _lat: f64,
        _credentials: Option<&EarthdataCredentials>,
    ) -> Result<Ancillary> {
        Ok(self.0)
    }
}
