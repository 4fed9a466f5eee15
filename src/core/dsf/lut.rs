//! Atmospheric look-up tables.
//!
//! The correction only consumes LUTs; it never generates them. Models are
//! reached through the [`LutProvider`] trait so the DSF logic can run against
//! ACOLITE tables exported to JSON ([`LutDirectory`]) or any other source.
//!
//! Directory layout read by [`LutDirectory`]:
//!
//! ```text
//! <root>/<sensor>/<lut-name>.json        aerosol models (romix, dutott, astot)
//! <root>/<sensor>/rsky/<name>-MOD<n>.json sky glint for aerosol model n
//! <root>/<sensor>/gas.json               ozone/water vapour absorption per band
//! ```
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::image::ViewGeometry;
use crate::core::settings::Ancillary;
use crate::error::{Error, Result};
use crate::types::Sensor;

/// Geometry and pressure at which LUT parameters are evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub sza: f64,
    pub vza: f64,
    pub raa: f64,
    pub pressure: f64,
}

impl Geometry {
    pub fn from_view(view: &ViewGeometry, pressure: f64) -> Self {
        Self {
            sza: view.sza,
            vza: view.vza,
            raa: view.raa,
            pressure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtmosphericParameter {
    /// Path reflectance
    Romix,
    /// Total up and down transmittance
    Dutott,
    /// Spherical albedo
    Astot,
}

impl AtmosphericParameter {
    pub const ALL: [AtmosphericParameter; 3] = [
        AtmosphericParameter::Romix,
        AtmosphericParameter::Dutott,
        AtmosphericParameter::Astot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AtmosphericParameter::Romix => "romix",
            AtmosphericParameter::Dutott => "dutott",
            AtmosphericParameter::Astot => "astot",
        }
    }
}

/// One aerosol model: atmospheric parameters per band as a function of
/// geometry and aerosol optical thickness.
pub trait AtmosphereModel: Send + Sync {
    fn name(&self) -> &str;

    /// Ascending AOT nodes of the table.
    fn tau_grid(&self) -> &[f64];

    /// Parameter for band id (`"2"`, `"8A"`) at `tau`.
    fn parameter(
        &self,
        parameter: AtmosphericParameter,
        band: &str,
        geometry: &Geometry,
        tau: f64,
    ) -> Result<f64>;

    /// `romix` evaluated at every node of the tau grid.
    fn romix_curve(&self, band: &str, geometry: &Geometry) -> Result<Vec<f64>> {
        self.tau_grid()
            .iter()
            .map(|tau| self.parameter(AtmosphericParameter::Romix, band, geometry, *tau))
            .collect()
    }
}

/// Sky reflectance seen through the water surface.
pub trait SkyGlintModel: Send + Sync {
    fn sky_glint(&self, band: &str, geometry: &Geometry, wind: f64, tau: f64) -> Result<f64>;
}

/// Source of atmospheric models for a sensor.
pub trait LutProvider: Send + Sync {
    /// Candidate aerosol models in a stable order. Selection ties go to the
    /// earliest model.
    fn aerosol_models(&self, sensor: Sensor) -> Result<Vec<Arc<dyn AtmosphereModel>>>;

    fn sky_glint(&self, sensor: Sensor, model: &str) -> Result<Arc<dyn SkyGlintModel>>;

    /// Two-way gas transmittance for a band.
    fn gas_transmittance(
        &self,
        sensor: Sensor,
        band: &str,
        view: &ViewGeometry,
        ancillary: &Ancillary,
    ) -> Result<f64>;
}

/// Multilinear interpolation over a regular (rectilinear) grid.
/// Values are stored row-major with the last axis varying fastest.
/// Points outside the grid are clamped to the edges.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularGrid {
    axes: Vec<Vec<f64>>,
    values: Vec<f64>,
    strides: Vec<usize>,
}

impl RegularGrid {
    pub fn new(axes: Vec<Vec<f64>>, values: Vec<f64>) -> Result<Self> {
        if axes.iter().any(|a| a.is_empty()) {
            return Err(Error::InvalidSetting {
                key: "lut".to_string(),
                reason: "empty LUT axis".to_string(),
            });
        }
        if axes.iter().any(|a| a.windows(2).any(|w| w[1] <= w[0])) {
            return Err(Error::InvalidSetting {
                key: "lut".to_string(),
                reason: "LUT axes must be strictly ascending".to_string(),
            });
        }
        let expected: usize = axes.iter().map(Vec::len).product();
        if expected != values.len() {
            return Err(Error::InvalidSetting {
                key: "lut".to_string(),
                reason: format!("expected {} values, found {}", expected, values.len()),
            });
        }
        let mut strides = vec![1; axes.len()];
        for i in (0..axes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * axes[i + 1].len();
        }
        Ok(Self {
            axes,
            values,
            strides,
        })
    }

    pub fn interpolate(&self, point: &[f64]) -> Result<f64> {
        if point.len() != self.axes.len() {
            return Err(Error::Processing(format!(
                "LUT lookup with {} coordinates on a {}-dimensional grid",
                point.len(),
                self.axes.len()
            )));
        }
        let cells: Vec<(usize, f64)> = self
            .axes
            .iter()
            .zip(point)
            .map(|(axis, x)| locate(axis, *x))
            .collect();

        let mut total = 0.0;
        for corner in 0..(1usize << cells.len()) {
            let mut weight = 1.0;
            let mut offset = 0;
            for (dim, (idx, t)) in cells.iter().enumerate() {
                let upper = corner >> dim & 1 == 1;
                let (i, w) = if upper { (idx + 1, *t) } else { (*idx, 1.0 - t) };
                if w == 0.0 {
                    weight = 0.0;
                    break;
                }
                weight *= w;
                offset += i.min(self.axes[dim].len() - 1) * self.strides[dim];
            }
            if weight != 0.0 {
                total += weight * self.values[offset];
            }
        }
        Ok(total)
    }
}

/// Lower node index and fractional position of `x` on `axis`, clamped.
fn locate(axis: &[f64], x: f64) -> (usize, f64) {
    let n = axis.len();
    if n == 1 || x <= axis[0] {
        return (0, 0.0);
    }
    if x >= axis[n - 1] {
        return (n - 2, 1.0);
    }
    let i = axis.partition_point(|v| *v <= x) - 1;
    (i, (x - axis[i]) / (axis[i + 1] - axis[i]))
}

/// Linear interpolation of `x` on ascending `xp`, clamped to the end values.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    if xp.is_empty() || xp.len() != fp.len() || x.is_nan() {
        return f64::NAN;
    }
    let (i, t) = locate(xp, x);
    if xp.len() == 1 {
        return fp[0];
    }
    fp[i] + (fp[i + 1] - fp[i]) * t
}

#[derive(Debug, Deserialize)]
struct AerosolAxes {
    pressure: Vec<f64>,
    raa: Vec<f64>,
    vza: Vec<f64>,
    sza: Vec<f64>,
    tau: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct AerosolLutFile {
    name: Option<String>,
    axes: AerosolAxes,
    bands: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

/// Aerosol model loaded from an ACOLITE LUT exported to JSON.
/// Axis order is `pressure, raa, vza, sza, tau`.
#[derive(Debug)]
pub struct AerosolLut {
    name: String,
    tau: Vec<f64>,
    grids: HashMap<(String, AtmosphericParameter), RegularGrid>,
}

impl AerosolLut {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: AerosolLutFile = serde_json::from_str(&text)?;
        let name = file.name.unwrap_or_else(|| file_stem(path));
        let axes = vec![
            file.axes.pressure,
            file.axes.raa,
            file.axes.vza,
            file.axes.sza,
            file.axes.tau.clone(),
        ];
        let mut grids = HashMap::new();
        for (band, params) in file.bands {
            for parameter in AtmosphericParameter::ALL {
                if let Some(values) = params.get(parameter.as_str()) {
                    let grid = RegularGrid::new(axes.clone(), values.clone())?;
                    grids.insert((band.clone(), parameter), grid);
                }
            }
        }
        debug!("Loaded LUT {} ({} band grids)", name, grids.len());
        Ok(Self {
            name,
            tau: file.axes.tau,
            grids,
        })
    }
}

impl AtmosphereModel for AerosolLut {
    fn name(&self) -> &str {
        &self.name
    }

    fn tau_grid(&self) -> &[f64] {
        &self.tau
    }

    fn parameter(
        &self,
        parameter: AtmosphericParameter,
        band: &str,
        geometry: &Geometry,
        tau: f64,
    ) -> Result<f64> {
        let grid = self
            .grids
            .get(&(band.to_string(), parameter))
            .ok_or_else(|| {
                Error::MissingDependency(format!(
                    "LUT {} has no {} for band {}",
                    self.name,
                    parameter.as_str(),
                    band
                ))
            })?;
        grid.interpolate(&[
            geometry.pressure,
            geometry.raa,
            geometry.vza,
            geometry.sza,
            tau,
        ])
    }
}

#[derive(Debug, Deserialize)]
struct SkyAxes {
    raa: Vec<f64>,
    vza: Vec<f64>,
    sza: Vec<f64>,
    wind: Vec<f64>,
    tau: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct SkyLutFile {
    axes: SkyAxes,
    bands: BTreeMap<String, Vec<f64>>,
}

/// Sky glint table, axis order `raa, vza, sza, wind, tau`.
#[derive(Debug)]
pub struct SkyGlintLut {
    grids: HashMap<String, RegularGrid>,
}

impl SkyGlintLut {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: SkyLutFile = serde_json::from_str(&text)?;
        let axes = vec![
            file.axes.raa,
            file.axes.vza,
            file.axes.sza,
            file.axes.wind,
            file.axes.tau,
        ];
        let grids = file
            .bands
            .into_iter()
            .map(|(band, values)| Ok((band, RegularGrid::new(axes.clone(), values)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { grids })
    }
}

impl SkyGlintModel for SkyGlintLut {
    fn sky_glint(&self, band: &str, geometry: &Geometry, wind: f64, tau: f64) -> Result<f64> {
        let grid = self.grids.get(band).ok_or_else(|| {
            Error::MissingDependency(format!("sky glint LUT has no band {band}"))
        })?;
        grid.interpolate(&[geometry.raa, geometry.vza, geometry.sza, wind, tau])
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct GasCoefficients {
    /// Ozone absorption per cm-atm
    ko3: f64,
    /// Water vapour absorption per g/cm2
    #[serde(default)]
    kwv: f64,
}

#[derive(Debug, Deserialize)]
struct GasFile {
    bands: BTreeMap<String, GasCoefficients>,
}

type ModelCache = HashMap<Sensor, Vec<Arc<dyn AtmosphereModel>>>;

/// ACOLITE LUTs exported to JSON under one root directory. Aerosol models are
/// parsed once per sensor and shared by clones.
#[derive(Clone)]
pub struct LutDirectory {
    root: PathBuf,
    models: Arc<Mutex<ModelCache>>,
}

impl std::fmt::Debug for LutDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LutDirectory")
            .field("root", &self.root)
            .field("cached_sensors", &lock(&self.models).len())
            .finish()
    }
}

fn lock(models: &Mutex<ModelCache>) -> MutexGuard<'_, ModelCache> {
    models.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LutDirectory {
    /// Fails with a missing-dependency error when `root` is not a directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::MissingDependency(format!(
                "ACOLITE LUT directory not found: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            models: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn sensor_dir(&self, sensor: Sensor) -> Result<PathBuf> {
        let dir = self.root.join(sensor.lut_name());
        if !dir.is_dir() {
            return Err(Error::MissingDependency(format!(
                "no LUTs for {} under {}",
                sensor,
                self.root.display()
            )));
        }
        Ok(dir)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// `-MOD<n>` suffix shared by an aerosol model and its sky glint table.
fn model_suffix(name: &str) -> Option<&str> {
    name.rfind("-MOD").map(|i| &name[i..])
}

impl LutProvider for LutDirectory {
    fn aerosol_models(&self, sensor: Sensor) -> Result<Vec<Arc<dyn AtmosphereModel>>> {
        let mut cache = lock(&self.models);
        if let Some(models) = cache.get(&sensor) {
            return Ok(models.clone());
        }
        let dir = self.sensor_dir(sensor)?;
        let mut models: Vec<Arc<dyn AtmosphereModel>> = Vec::new();
        for path in json_files(&dir)? {
            if path.file_name().is_some_and(|n| n == "gas.json") {
                continue;
            }
            models.push(Arc::new(AerosolLut::from_file(&path)?));
        }
        if models.is_empty() {
            return Err(Error::MissingDependency(format!(
                "no aerosol LUTs in {}",
                dir.display()
            )));
        }
        info!("Loaded {} aerosol models for {}", models.len(), sensor);
        cache.insert(sensor, models.clone());
        Ok(models)
    }

    fn sky_glint(&self, sensor: Sensor, model: &str) -> Result<Arc<dyn SkyGlintModel>> {
        let dir = self.sensor_dir(sensor)?.join("rsky");
        let suffix = model_suffix(model).unwrap_or(model);
        let path = if dir.is_dir() {
            json_files(&dir)?
                .into_iter()
                .find(|p| file_stem(p).ends_with(suffix))
        } else {
            None
        };
        let path = path.ok_or_else(|| {
            Error::MissingDependency(format!(
                "no sky glint LUT matching {} in {}",
                model,
                dir.display()
            ))
        })?;
        Ok(Arc::new(SkyGlintLut::from_file(&path)?))
    }

    fn gas_transmittance(
        &self,
        sensor: Sensor,
        band: &str,
        view: &ViewGeometry,
        ancillary: &Ancillary,
    ) -> Result<f64> {
        let path = self.sensor_dir(sensor)?.join("gas.json");
        if !path.is_file() {
            return Err(Error::MissingDependency(format!(
                "gas transmittance table not found: {}",
                path.display()
            )));
        }
        let file: GasFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
        let coeff = file.bands.get(band).ok_or_else(|| {
            Error::MissingDependency(format!("gas table has no band {band}"))
        })?;
        let optical_depth = coeff.ko3 * ancillary.uoz + coeff.kwv * ancillary.uwv;
        Ok((-optical_depth * view.airmass()).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn interpolates_bilinear_and_clamps() {
        let grid = RegularGrid::new(
            vec![vec![0.0, 1.0], vec![0.0, 10.0]],
            vec![0.0, 10.0, 1.0, 11.0],
        )
        .unwrap();
        assert_relative_eq!(grid.interpolate(&[0.5, 5.0]).unwrap(), 5.5);
        assert_relative_eq!(grid.interpolate(&[2.0, 20.0]).unwrap(), 11.0);
        assert_relative_eq!(grid.interpolate(&[-1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn single_node_axes_are_constant() {
        let grid = RegularGrid::new(vec![vec![1013.25], vec![0.0, 1.0]], vec![0.1, 0.3]).unwrap();
        assert_relative_eq!(grid.interpolate(&[900.0, 0.5]).unwrap(), 0.2);
    }

    #[test]
    fn grid_size_mismatch_is_rejected() {
        assert!(RegularGrid::new(vec![vec![0.0, 1.0]], vec![1.0]).is_err());
        assert!(RegularGrid::new(vec![vec![1.0, 0.0]], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn interp_clamps_at_ends() {
        let xp = [0.0, 0.5, 1.0];
        let fp = [0.01, 0.06, 0.11];
        assert_relative_eq!(interp(0.035, &fp, &xp), 0.25);
        assert_relative_eq!(interp(0.5, &fp, &xp), 1.0);
        assert_relative_eq!(interp(-0.2, &fp, &xp), 0.0);
    }

    #[test]
    fn missing_directory_is_missing_dependency() {
        let err = LutDirectory::open("/nonexistent/acolite/luts").unwrap_err();
        assert!(matches!(err, Error::MissingDependency(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn loads_models_and_gas_table() {
        let dir = tempdir().unwrap();
        let sensor_dir = dir.path().join("S2A_MSI");
        fs::create_dir_all(sensor_dir.join("rsky")).unwrap();
        fs::write(
            sensor_dir.join("ACOLITE-LUT-202110-MOD1.json"),
            r#"{"axes": {"pressure": [1013.25], "raa": [0.0], "vza": [0.0], "sza": [30.0], "tau": [0.0, 1.0]},
                "bands": {"2": {"romix": [0.01, 0.11], "dutott": [0.9, 0.7], "astot": [0.1, 0.2]}}}"#,
        )
        .unwrap();
        fs::write(
            sensor_dir.join("gas.json"),
            r#"{"bands": {"2": {"ko3": 0.0, "kwv": 0.0}}}"#,
        )
        .unwrap();
        fs::write(
            sensor_dir.join("rsky").join("ACOLITE-RSKY-202102-82W-MOD1.json"),
            r#"{"axes": {"raa": [0.0], "vza": [0.0], "sza": [30.0], "wind": [20.0], "tau": [0.0, 1.0]},
                "bands": {"2": [0.02, 0.04]}}"#,
        )
        .unwrap();

        let luts = LutDirectory::open(dir.path()).unwrap();
        let models = luts.aerosol_models(Sensor::S2A).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name(), "ACOLITE-LUT-202110-MOD1");
        let geom = Geometry {
            sza: 30.0,
            vza: 5.0,
            raa: 90.0,
            pressure: 1013.25,
        };
        let romix = models[0]
            .parameter(AtmosphericParameter::Romix, "2", &geom, 0.5)
            .unwrap();
        assert_relative_eq!(romix, 0.06);

        let view = ViewGeometry::new(30.0, 150.0, 5.0, 100.0);
        let anc = Ancillary {
            uoz: 0.3,
            uwv: 1.5,
            wind: 2.0,
            pressure: 1013.25,
        };
        let tg = luts.gas_transmittance(Sensor::S2A, "2", &view, &anc).unwrap();
        assert_relative_eq!(tg, 1.0);

        let rsky = luts.sky_glint(Sensor::S2A, models[0].name()).unwrap();
        assert_relative_eq!(rsky.sky_glint("2", &geom, 20.0, 0.5).unwrap(), 0.03);

        assert!(matches!(
            luts.aerosol_models(Sensor::S2B),
            Err(Error::MissingDependency(_))
        ));
    }

    #[test]
    fn aerosol_models_are_parsed_once() {
        let dir = tempdir().unwrap();
        let sensor_dir = dir.path().join("S2A_MSI");
        fs::create_dir_all(&sensor_dir).unwrap();
        let lut_path = sensor_dir.join("ACOLITE-LUT-202110-MOD1.json");
        fs::write(
            &lut_path,
            r#"{"axes": {"pressure": [1013.25], "raa": [0.0], "vza": [0.0], "sza": [30.0], "tau": [0.0, 1.0]},
                "bands": {"2": {"romix": [0.01, 0.11], "dutott": [0.9, 0.7], "astot": [0.1, 0.2]}}}"#,
        )
        .unwrap();

        let luts = LutDirectory::open(dir.path()).unwrap();
        let first = luts.aerosol_models(Sensor::S2A).unwrap();
        // a second call must not touch the file again
        fs::write(&lut_path, "not json").unwrap();
        let second = luts.clone().aerosol_models(Sensor::S2A).unwrap();
        assert_eq!(second.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }
}
