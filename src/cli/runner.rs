use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use acolite_gee::api::{self, ExportOptions};
use acolite_gee::backend::{Backend, ImageCollection, LocalBackend, Region, SearchQuery};
use acolite_gee::core::settings::{Settings, read_overrides};

use super::args::CliArgs;
use super::errors::AppError;

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings file overrides with command-line options on top.
fn build_settings(args: &CliArgs) -> Result<Settings, AppError> {
    let mut overrides = match &args.settings {
        Some(path) => read_overrides(path)?,
        None => Map::new(),
    };
    if let Some(products) = &args.products {
        overrides.insert(
            "l2w_parameters".into(),
            Value::Array(split_list(products).into_iter().map(Value::from).collect()),
        );
    }
    if let Some(selection) = args.model_selection {
        overrides.insert("dsf_model_selection".into(), Value::from(selection.as_str()));
    }
    if let (Some(aot), Some(lut)) = (args.fixed_aot, &args.fixed_lut) {
        overrides.insert("dsf_fixed_aot".into(), Value::from(aot));
        overrides.insert("dsf_fixed_lut".into(), Value::from(lut.clone()));
    }
    if args.glint {
        overrides.insert("dsf_residual_glint_correction".into(), Value::Bool(true));
    }
    if args.cloud_mask {
        overrides.insert("s2_cloud_proba".into(), Value::Bool(true));
    }
    Ok(Settings::from_overrides(overrides)?)
}

fn export_options(args: &CliArgs, region: Region) -> Result<ExportOptions, AppError> {
    if let Some(scale) = args.scale {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(AppError::InvalidScale { scale });
        }
    }
    let mut options = ExportOptions {
        scale: args.scale,
        folder: args.output.clone(),
        bands: args.bands.as_deref().map(split_list).unwrap_or_default(),
        region: Some(region),
        quicklook: args.quicklook,
        ..ExportOptions::default()
    };
    if let Some(max_pixels) = args.max_pixels {
        options.max_pixels = max_pixels;
    }
    Ok(options)
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.log {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .init();
    }

    let region: Region = args.region.parse().map_err(|_| AppError::InvalidRegion {
        region: args.region.clone(),
    })?;
    let settings = build_settings(&args)?;
    let acolite = api::acolite_from_luts(&args.luts, settings)?;
    let options = export_options(&args, region)?;

    let mut backend = LocalBackend::open(&args.catalog)?;
    if let Some(root) = &args.export_root {
        backend = backend.with_export_root(root);
    }
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let mut query = SearchQuery::new(region, &args.start, &args.end)?
        .with_collection(args.collection.clone());
    if let Some(cloud) = args.max_cloud_cover {
        query = query.with_max_cloud_cover(cloud);
    }
    if let Some(tile) = &args.tile {
        query = query.with_tile(tile.clone());
    }

    let mut collection = ImageCollection::search(backend, &query)?;
    if collection.is_empty() {
        return Err(AppError::NoScenes {
            start: args.start.clone(),
            end: args.end.clone(),
        }
        .into());
    }
    if args.first {
        collection = collection.first();
    }

    info!("Processing {} scenes", collection.len());
    let report = api::process_collection(&acolite, &collection, &options, args.continue_on_error)?;

    info!("Batch processing complete!");
    info!("Processed: {}", report.processed);
    info!("Skipped: {}", report.skipped);
    info!("Errors: {}", report.errors);
    for path in &report.outputs {
        println!("{}", path.display());
    }
    if report.errors > 0 {
        return Err(AppError::BatchFailed {
            errors: report.errors,
            total: collection.len(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_trimmed() {
        assert_eq!(split_list(" chl_oc3, Rrs_* ,,"), vec!["chl_oc3", "Rrs_*"]);
    }
}
