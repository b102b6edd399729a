//! Contract discovery: derive a registry from a consumer directory tree.
//!
//! Walks the tree, samples each tabular file, infers its schema, and
//! emits one contract per file. The walk order is sorted and inference is
//! pure, so re-running discovery over an unchanged tree yields a
//! byte-identical registry. One unreadable file is a warning, never a
//! fatal error.
//!
//! Conventions:
//! - The first path segment under the root is the dataset's *category*.
//! - Categories map to service names through `service_map`; an unmapped
//!   category means the dataset is purely local/derived (`service: none`).
//! - Categories map to freshness thresholds through `freshness_map`;
//!   unmapped categories get a conservative default and a manual-review
//!   warning.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use datapact_adapter::{FetchParams, ServiceSpec};
use datapact_schema::{infer_schema, Dataset, InferOptions};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::contract::{ContractRegistry, DataContract};

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("Failed to walk {root}: {source}")]
    Walk {
        root: String,
        #[source]
        source: walkdir::Error,
    },
}

/// Tuning for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Maximum rows sampled per file for inference.
    pub sample_rows: usize,

    pub infer: InferOptions,

    /// Category (first directory segment) -> service adapter name.
    pub service_map: BTreeMap<String, String>,

    /// Category -> freshness threshold in seconds.
    pub freshness_map: BTreeMap<String, u64>,

    /// Threshold for categories missing from `freshness_map`.
    pub default_freshness_secs: u64,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        let mut freshness_map = BTreeMap::new();
        freshness_map.insert("intraday".to_string(), 6 * 3600);
        freshness_map.insert("daily".to_string(), 24 * 3600);
        freshness_map.insert("historical".to_string(), 7 * 24 * 3600);

        Self {
            sample_rows: 200,
            infer: InferOptions::default(),
            service_map: BTreeMap::new(),
            freshness_map,
            default_freshness_secs: 24 * 3600,
        }
    }
}

/// Result of a discovery run: the derived registry plus non-fatal
/// warnings (skipped files, unmapped categories).
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub registry: ContractRegistry,
    pub warnings: Vec<String>,
}

/// Recursively discover dataset files under `root` and derive one
/// contract per file.
pub fn discover(root: &Path, options: &DiscoverOptions) -> Result<DiscoveryOutcome, DiscoverError> {
    let mut contracts = Vec::new();
    let mut services: BTreeMap<String, ServiceSpec> = BTreeMap::new();
    let mut warnings = Vec::new();

    let walker = WalkDir::new(root).sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|source| DiscoverError::Walk {
            root: root.display().to_string(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path);
        match discover_file(path, rel, options, &mut warnings) {
            Some(contract) => {
                if let Some(service) = &contract.service {
                    // Convention: the service name doubles as the command
                    // name until the registry is edited by hand.
                    services
                        .entry(service.clone())
                        .or_insert_with(|| ServiceSpec::new(service.clone()));
                }
                contracts.push(contract);
            }
            None => continue,
        }
    }

    contracts.sort_by(|a, b| a.id.cmp(&b.id));
    info!(
        contracts = contracts.len(),
        warnings = warnings.len(),
        "discovery complete"
    );

    Ok(DiscoveryOutcome {
        registry: ContractRegistry::new(services, contracts),
        warnings,
    })
}

fn discover_file(
    path: &Path,
    rel: &Path,
    options: &DiscoverOptions,
    warnings: &mut Vec<String>,
) -> Option<DataContract> {
    let mut sample = match Dataset::from_csv_path(path) {
        Ok(dataset) => dataset,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable file");
            warnings.push(format!("Skipped {}: {}", rel.display(), err));
            return None;
        }
    };
    sample.rows.truncate(options.sample_rows);

    let schema = infer_schema(&sample, &options.infer);

    let category = first_segment(rel);
    let service = category
        .as_deref()
        .and_then(|c| options.service_map.get(c))
        .cloned();

    let freshness_secs = match category.as_deref().and_then(|c| options.freshness_map.get(c)) {
        Some(secs) => *secs,
        None => {
            warnings.push(format!(
                "Contract for {} has unmapped category '{}'; defaulted to {}s, review manually",
                rel.display(),
                category.as_deref().unwrap_or("<root>"),
                options.default_freshness_secs
            ));
            options.default_freshness_secs
        }
    };

    let id = DataContract::id_from_path(rel);
    debug!(id = id.as_str(), path = %rel.display(), "discovered contract");

    Some(DataContract {
        id,
        output_path: path.to_path_buf(),
        freshness_secs,
        service,
        depends_on: Vec::new(),
        fetch_params: FetchParams::new(),
        schema,
    })
}

fn first_segment(rel: &Path) -> Option<String> {
    let mut components = rel.components();
    let first = components.next()?;
    // A bare filename at the root has no category.
    components.next()?;
    match first {
        Component::Normal(seg) => Some(seg.to_string_lossy().into_owned()),
        _ => None,
    }
}
