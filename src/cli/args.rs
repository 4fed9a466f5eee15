use clap::Parser;
use std::path::PathBuf;

use acolite_gee::types::ModelSelection;

#[derive(Parser)]
#[command(
    name = "acolite-gee",
    version,
    about = "ACOLITE dark spectrum fitting for Sentinel-2 catalogs"
)]
pub struct CliArgs {
    /// Local catalog directory containing catalog.json
    #[arg(short, long)]
    pub catalog: PathBuf,

    /// ACOLITE LUT directory (JSON export)
    #[arg(long)]
    pub luts: PathBuf,

    /// Region of interest: "lon,lat" or "west,south,east,north"
    #[arg(short, long)]
    pub region: String,

    /// Start date (inclusive), ISO 8601
    #[arg(long)]
    pub start: String,

    /// End date (exclusive), ISO 8601
    #[arg(long)]
    pub end: String,

    /// Collection name
    #[arg(long, default_value = acolite_gee::backend::DEFAULT_COLLECTION)]
    pub collection: String,

    /// Maximum scene cloud cover (percent)
    #[arg(long)]
    pub max_cloud_cover: Option<f64>,

    /// MGRS tile filter (e.g. 17SQB)
    #[arg(long)]
    pub tile: Option<String>,

    /// ACOLITE settings file (JSON or key=value)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Water-quality products, comma separated (e.g. "chl_oc3,spm_nechad2016,Rrs_*")
    #[arg(short, long)]
    pub products: Option<String>,

    /// Model selection criterion
    #[arg(long, value_enum)]
    pub model_selection: Option<ModelSelection>,

    /// Fixed aerosol optical thickness (requires --fixed-lut)
    #[arg(long, requires = "fixed_lut")]
    pub fixed_aot: Option<f64>,

    /// LUT used with --fixed-aot
    #[arg(long, requires = "fixed_aot")]
    pub fixed_lut: Option<String>,

    /// Apply residual glint correction
    #[arg(long, default_value_t = false)]
    pub glint: bool,

    /// Mask clouds and shadows from the cloud probability rasters
    #[arg(long, default_value_t = false)]
    pub cloud_mask: bool,

    /// Output folder, relative to the catalog's export root
    #[arg(short, long, default_value = "")]
    pub output: PathBuf,

    /// Export root directory (defaults to <catalog>/exports)
    #[arg(long)]
    pub export_root: Option<PathBuf>,

    /// Output pixel size in metres
    #[arg(long)]
    pub scale: Option<f64>,

    /// Bands to export, comma separated (all bands when omitted)
    #[arg(long)]
    pub bands: Option<String>,

    /// Maximum pixels per export
    #[arg(long)]
    pub max_pixels: Option<u64>,

    /// Also write an RGB JPEG quicklook with world file and JSON sidecar
    #[arg(long, default_value_t = false)]
    pub quicklook: bool,

    /// Process only the first matching scene (single mode)
    #[arg(long, default_value_t = false)]
    pub first: bool,

    /// Batch mode: keep processing other scenes when one fails
    #[arg(long, default_value_t = false)]
    pub continue_on_error: bool,

    /// Enable logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
