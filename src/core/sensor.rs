//! Sentinel-2 MSI band table.

/// One MSI band: settings/LUT id (`"8A"`), image band name (`"B8A"`),
/// nominal centre wavelength and native resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MsiBand {
    pub id: &'static str,
    pub name: &'static str,
    pub wavelength_nm: u32,
    pub resolution_m: u32,
}

pub const SENTINEL2_BANDS: &[MsiBand] = &[
    MsiBand { id: "1", name: "B1", wavelength_nm: 443, resolution_m: 60 },
    MsiBand { id: "2", name: "B2", wavelength_nm: 492, resolution_m: 10 },
    MsiBand { id: "3", name: "B3", wavelength_nm: 560, resolution_m: 10 },
    MsiBand { id: "4", name: "B4", wavelength_nm: 665, resolution_m: 10 },
    MsiBand { id: "5", name: "B5", wavelength_nm: 704, resolution_m: 20 },
    MsiBand { id: "6", name: "B6", wavelength_nm: 740, resolution_m: 20 },
    MsiBand { id: "7", name: "B7", wavelength_nm: 783, resolution_m: 20 },
    MsiBand { id: "8", name: "B8", wavelength_nm: 833, resolution_m: 10 },
    MsiBand { id: "8A", name: "B8A", wavelength_nm: 865, resolution_m: 20 },
    MsiBand { id: "9", name: "B9", wavelength_nm: 945, resolution_m: 60 },
    MsiBand { id: "10", name: "B10", wavelength_nm: 1374, resolution_m: 60 },
    MsiBand { id: "11", name: "B11", wavelength_nm: 1614, resolution_m: 20 },
    MsiBand { id: "12", name: "B12", wavelength_nm: 2202, resolution_m: 20 },
];

/// Bands never used to estimate AOT (water vapour, cirrus and the SWIR glint reference).
pub const AOT_SKIP_BANDS: &[&str] = &["B9", "B10", "B11", "B12"];

/// SWIR bands used as the residual glint reference.
pub const GLINT_REFERENCE_BANDS: [&str; 2] = ["B11", "B12"];

/// Wind speed (m/s) at which the sky-glint LUT is evaluated.
pub const GLINT_WIND: f64 = 20.0;

pub fn band_names() -> impl Iterator<Item = &'static str> {
    SENTINEL2_BANDS.iter().map(|b| b.name)
}

pub fn band_by_name(name: &str) -> Option<&'static MsiBand> {
    SENTINEL2_BANDS.iter().find(|b| b.name == name)
}

/// Image band name (`"B8A"`) to LUT band id (`"8A"`). Names without the `B` prefix pass through.
pub fn band_id(name: &str) -> &str {
    name.strip_prefix('B').unwrap_or(name)
}

/// Reference band whose grid defines the output raster for a target resolution.
pub fn band_by_scale(scale: u32) -> &'static str {
    match scale {
        10 => "B2",
        20 => "B5",
        60 => "B1",
        _ => "B2",
    }
}
