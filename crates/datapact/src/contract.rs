//! Data contracts and the contract registry.
//!
//! A `DataContract` binds one output dataset to its schema, freshness
//! rule, and data source. The registry file is the source of truth for
//! what the pipeline manager will execute; it is loaded once at startup,
//! verified, and read-only for the duration of a run. Discovery can
//! regenerate it at any time, and regenerating over an unchanged tree
//! produces a byte-identical file (the registry doubles as a diffable
//! artifact between runs).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use datapact_adapter::{FetchParams, ServiceSpec};
use datapact_schema::{SchemaError, SchemaSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse registry: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate contract id: {0}")]
    DuplicateId(String),

    #[error("Contracts '{first}' and '{second}' share output path {path}")]
    DuplicateOutputPath {
        first: String,
        second: String,
        path: String,
    },

    #[error("Contract '{contract}' references unknown service '{service}'")]
    UnknownService { contract: String, service: String },

    #[error("Contract '{contract}' depends on unknown contract '{dependency}'")]
    UnknownDependency { contract: String, dependency: String },

    #[error("Contract '{contract}' schema invalid: {source}")]
    Schema {
        contract: String,
        #[source]
        source: SchemaError,
    },
}

/// One pipeline unit: a declarative record binding an output dataset to
/// its schema, freshness threshold, and (optionally) a service adapter.
/// Immutable once created within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataContract {
    /// Stable key, derived from the output path.
    pub id: String,

    pub output_path: PathBuf,

    /// Maximum data age before a refresh is attempted.
    pub freshness_secs: u64,

    /// Service adapter name, or `None` for purely local/derived datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Producer contracts that must complete before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Extra parameters rendered as CLI arguments on fetch.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fetch_params: FetchParams,

    pub schema: SchemaSpec,
}

impl DataContract {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    /// Derive a stable contract id from a relative output path:
    /// extension stripped, path separators and non-alphanumerics mapped
    /// to underscores.
    pub fn id_from_path(rel_path: &Path) -> String {
        let stem = rel_path.with_extension("");
        let mut id = String::new();
        for ch in stem.to_string_lossy().chars() {
            if ch.is_ascii_alphanumeric() {
                id.push(ch.to_ascii_lowercase());
            } else if !id.ends_with('_') {
                id.push('_');
            }
        }
        id.trim_matches('_').to_string()
    }
}

/// The full registry: service specs plus contracts, exactly what the
/// `run` command executes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContractRegistry {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceSpec>,

    #[serde(default)]
    pub contracts: Vec<DataContract>,
}

impl ContractRegistry {
    pub fn new(services: BTreeMap<String, ServiceSpec>, contracts: Vec<DataContract>) -> Self {
        Self {
            services,
            contracts,
        }
    }

    /// Load and verify a registry file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry: Self = serde_yaml::from_str(&text)?;
        registry.verify()?;
        Ok(registry)
    }

    /// Serialize to YAML with contracts sorted by id, so regenerated
    /// registries diff cleanly.
    pub fn to_yaml(&self) -> Result<String, RegistryError> {
        let mut sorted = self.clone();
        sorted.contracts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(serde_yaml::to_string(&sorted)?)
    }

    /// Write the registry file atomically (temp + rename).
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let yaml = self.to_yaml()?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source: std::io::Error| RegistryError::Io {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(parent).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        use std::io::Write;
        tmp.write_all(yaml.as_bytes()).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    pub fn contract(&self, id: &str) -> Option<&DataContract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    /// Enforce registry invariants: unique ids, unique output paths,
    /// known service and dependency references, valid schemas.
    pub fn verify(&self) -> Result<(), RegistryError> {
        let mut ids = HashSet::new();
        let mut outputs: BTreeMap<&Path, &str> = BTreeMap::new();

        for contract in &self.contracts {
            if !ids.insert(contract.id.as_str()) {
                return Err(RegistryError::DuplicateId(contract.id.clone()));
            }
            if let Some(first) = outputs.insert(contract.output_path.as_path(), &contract.id) {
                return Err(RegistryError::DuplicateOutputPath {
                    first: first.to_string(),
                    second: contract.id.clone(),
                    path: contract.output_path.display().to_string(),
                });
            }
            contract
                .schema
                .verify()
                .map_err(|source| RegistryError::Schema {
                    contract: contract.id.clone(),
                    source,
                })?;
        }

        for contract in &self.contracts {
            if let Some(service) = &contract.service {
                if !self.services.contains_key(service) {
                    return Err(RegistryError::UnknownService {
                        contract: contract.id.clone(),
                        service: service.clone(),
                    });
                }
            }
            for dep in &contract.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(RegistryError::UnknownDependency {
                        contract: contract.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Timeout for a contract's service, falling back to the spec default
    /// when the service is not declared (mock adapters in tests).
    pub fn fetch_timeout(&self, contract: &DataContract) -> Duration {
        contract
            .service
            .as_deref()
            .and_then(|s| self.services.get(s))
            .map(|spec| spec.timeout())
            .unwrap_or(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datapact_schema::{ColumnSpec, ColumnType};

    fn contract(id: &str, output: &str) -> DataContract {
        DataContract {
            id: id.to_string(),
            output_path: PathBuf::from(output),
            freshness_secs: 3600,
            service: None,
            depends_on: Vec::new(),
            fetch_params: FetchParams::new(),
            schema: SchemaSpec::new(vec![ColumnSpec::new("Date", ColumnType::Datetime)]).unwrap(),
        }
    }

    #[test]
    fn test_id_from_path() {
        assert_eq!(
            DataContract::id_from_path(Path::new("intraday/pnl.csv")),
            "intraday_pnl"
        );
        assert_eq!(
            DataContract::id_from_path(Path::new("Daily Data/my-positions.csv")),
            "daily_data_my_positions"
        );
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = ContractRegistry::new(
            BTreeMap::new(),
            vec![contract("a", "a.csv"), contract("a", "b.csv")],
        );
        assert!(matches!(
            registry.verify(),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_duplicate_output_path_rejected() {
        let registry = ContractRegistry::new(
            BTreeMap::new(),
            vec![contract("a", "same.csv"), contract("b", "same.csv")],
        );
        assert!(matches!(
            registry.verify(),
            Err(RegistryError::DuplicateOutputPath { .. })
        ));
    }

    #[test]
    fn test_unknown_service_rejected() {
        let mut c = contract("a", "a.csv");
        c.service = Some("market".to_string());
        let registry = ContractRegistry::new(BTreeMap::new(), vec![c]);
        assert!(matches!(
            registry.verify(),
            Err(RegistryError::UnknownService { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut c = contract("a", "a.csv");
        c.depends_on = vec!["missing".to_string()];
        let registry = ContractRegistry::new(BTreeMap::new(), vec![c]);
        assert!(matches!(
            registry.verify(),
            Err(RegistryError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_yaml_round_trip_sorted_by_id() {
        let registry = ContractRegistry::new(
            BTreeMap::new(),
            vec![contract("zeta", "z.csv"), contract("alpha", "a.csv")],
        );
        let yaml = registry.to_yaml().unwrap();
        let parsed: ContractRegistry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.contracts[0].id, "alpha");
        assert_eq!(parsed.contracts[1].id, "zeta");
        // Serializing again must be byte-identical.
        assert_eq!(parsed.to_yaml().unwrap(), yaml);
    }
}
