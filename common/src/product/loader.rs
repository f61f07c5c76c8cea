// Product metadata loader: a directory of YAML files, one product each

use super::{
    AggregateConfig, IncidentsConfig, ProductConfig, ProductSettings, RawProductFile,
};
use crate::errors::ConfigError;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One aggregate target as needed by result sync
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProductArch {
    pub product: String,
    pub flavor: String,
    pub arch: String,
    pub distri: String,
    pub version: String,
}

/// YAML files of a metadata directory in name order
fn metadata_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(path = %dir.display(), error = %e, "Cannot read product metadata directory");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yml") | Some("yaml")
                )
        })
        .collect();
    files.sort();
    files
}

fn read_file(path: &Path) -> Result<RawProductFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidYaml {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Parse one product file into zero, one or two config records
fn parse_file(
    path: &Path,
    disable_aggregates: bool,
    disable_incidents: bool,
    single_arch: &BTreeSet<String>,
) -> Result<Vec<ProductConfig>, ConfigError> {
    let raw = read_file(path)?;
    let context = path.display().to_string();

    let product = raw.product.ok_or_else(|| ConfigError::MissingKey {
        key: "product".to_string(),
        context: context.clone(),
    })?;
    let settings = raw.settings.ok_or_else(|| ConfigError::MissingKey {
        key: "settings".to_string(),
        context,
    })?;
    let settings = ProductSettings::from_raw(product, settings)?;

    let mut configs = Vec::new();

    if let Some(incidents) = raw.incidents.filter(|_| !disable_incidents) {
        let config = IncidentsConfig::from_raw(&settings, incidents, single_arch.clone())?;
        configs.push(ProductConfig::Incidents(config));
    }

    if let Some(aggregate) = raw.aggregate.filter(|_| !disable_aggregates) {
        match AggregateConfig::from_raw(&settings, aggregate) {
            Ok(config) => configs.push(ProductConfig::Aggregate(config)),
            // A broken aggregate section does not invalidate the incident flavors
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping aggregate config"),
        }
    }

    Ok(configs)
}

/// Load every product config below `dir`; broken files are logged and skipped
pub fn load_metadata(
    dir: &Path,
    disable_aggregates: bool,
    disable_incidents: bool,
    single_arch: &BTreeSet<String>,
) -> Vec<ProductConfig> {
    let mut configs = Vec::new();

    for path in metadata_files(dir) {
        match parse_file(&path, disable_aggregates, disable_incidents, single_arch) {
            Ok(parsed) => {
                debug!(path = %path.display(), records = parsed.len(), "Loaded product metadata");
                configs.extend(parsed);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping product metadata file");
            }
        }
    }

    info!(records = configs.len(), "Product metadata loaded");
    configs
}

/// Every aggregate (product, flavor, arch) target defined below `dir`
pub fn read_products(dir: &Path) -> Vec<ProductArch> {
    let mut products = Vec::new();

    for path in metadata_files(dir) {
        let configs = match parse_file(&path, false, true, &BTreeSet::new()) {
            Ok(configs) => configs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping product metadata file");
                continue;
            }
        };

        for config in configs {
            if let ProductConfig::Aggregate(aggregate) = config {
                for arch in &aggregate.architectures {
                    products.push(ProductArch {
                        product: aggregate.product.clone(),
                        flavor: aggregate.flavor.clone(),
                        arch: arch.clone(),
                        distri: aggregate.distri.clone(),
                        version: aggregate.version.clone(),
                    });
                }
            }
        }
    }

    products
}

/// Packages that are only built for one architecture
pub fn load_single_arch(path: &Path) -> BTreeSet<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Cannot read single-arch package list");
            return BTreeSet::new();
        }
    };

    match serde_yaml::from_str::<Option<Vec<String>>>(&content) {
        Ok(packages) => packages.unwrap_or_default().into_iter().collect(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Invalid single-arch package list");
            BTreeSet::new()
        }
    }
}
