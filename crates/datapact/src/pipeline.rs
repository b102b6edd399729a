//! Pipeline manager: executes contracts against local caches or service
//! adapters, validating before publish.
//!
//! Per-contract algorithm:
//!
//! 1. Local-first: fresh local data short-circuits the whole pipeline.
//! 2. Health-check the service; unreachable falls back to stale local
//!    data when it exists.
//! 3. Fetch; adapter errors use the same stale-fallback-or-fail policy.
//! 4. Validate the fetched dataset against the contract schema.
//! 5. ERROR-level validation rejects the new data and retains the prior
//!    file. A schema-invalid dataset never overwrites a valid one.
//! 6. WARNING/SUCCESS publishes via write-to-temp-then-atomic-rename.
//!
//! Contracts are independent units writing to disjoint output paths, so
//! they run on a bounded worker pool; producer/consumer edges declared
//! via `depends_on` are honored by executing in topological waves.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use datapact_adapter::{AdapterError, CancelFlag, ServiceAdapter};
use datapact_schema::{validate, Dataset, ValidationLevel};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::contract::{ContractRegistry, DataContract};

/// Final state of one contract after `execute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContractStatus {
    /// Data at `output_path` is valid and current (either freshly
    /// published or already fresh).
    Published { refreshed: bool },
    /// Refresh was needed but could not happen; stale local data is
    /// being served instead.
    Skipped { reason: String },
    /// No valid data could be produced or served.
    Failed { reason: String },
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Published { .. } => "Published",
            ContractStatus::Skipped { .. } => "Skipped",
            ContractStatus::Failed { .. } => "Failed",
        }
    }
}

/// Outcome of one contract: status plus surfaced warnings (validation
/// caveats, staleness notes). Warnings are reported even on success so
/// data-quality drift stays visible over time.
#[derive(Debug, Clone, Serialize)]
pub struct ContractOutcome {
    pub id: String,
    #[serde(flatten)]
    pub status: ContractStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Aggregate result of a run, in execution order.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcomes: Vec<ContractOutcome>,
}

impl RunSummary {
    pub fn published(&self) -> usize {
        self.count(|s| matches!(s, ContractStatus::Published { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ContractStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ContractStatus::Failed { .. }))
    }

    pub fn any_failed(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: impl Fn(&ContractStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker pool size for independent contracts.
    pub jobs: usize,
    /// Budget for each health probe.
    pub health_timeout: Duration,
    /// Run-level cancellation, shared with every adapter call.
    pub cancel: CancelFlag,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            health_timeout: Duration::from_secs(5),
            cancel: CancelFlag::new(),
        }
    }
}

/// Set of adapters keyed by service name. Production wires `CliAdapter`s
/// built from the registry; tests inject mocks.
pub type AdapterSet = BTreeMap<String, Arc<dyn ServiceAdapter>>;

/// Orchestrates contract execution for one run. Owns nothing mutable
/// beyond the run options; the registry is read-only throughout.
pub struct PipelineManager<'a> {
    registry: &'a ContractRegistry,
    adapters: AdapterSet,
    options: RunOptions,
}

impl<'a> PipelineManager<'a> {
    pub fn new(registry: &'a ContractRegistry, adapters: AdapterSet, options: RunOptions) -> Self {
        Self {
            registry,
            adapters,
            options,
        }
    }

    /// Execute every contract (or the `only` subset), honoring dependency
    /// order, with independent contracts running concurrently.
    ///
    /// One contract's failure never aborts its siblings; the summary
    /// carries every outcome.
    pub fn run_all(&self, only: Option<&[String]>) -> Result<RunSummary> {
        let selected = self.select_contracts(only)?;
        let waves = topological_waves(&selected)?;

        let mut outcomes = Vec::with_capacity(selected.len());
        for wave in waves {
            let mut wave_outcomes: Vec<(usize, ContractOutcome)> = Vec::with_capacity(wave.len());
            for chunk in wave.chunks(self.options.jobs.max(1)) {
                let chunk_outcomes: Vec<(usize, ContractOutcome)> = std::thread::scope(|scope| {
                    let handles: Vec<_> = chunk
                        .iter()
                        .map(|&idx| {
                            let contract = selected[idx];
                            scope.spawn(move || (idx, self.execute(contract)))
                        })
                        .collect();
                    handles.into_iter().map(|h| h.join().expect("worker panicked")).collect()
                });
                wave_outcomes.extend(chunk_outcomes);
            }
            wave_outcomes.sort_by_key(|(idx, _)| *idx);
            outcomes.extend(wave_outcomes.into_iter().map(|(_, o)| o));
        }

        let summary = RunSummary {
            run_id: uuid::Uuid::new_v4().to_string(),
            outcomes,
        };
        info!(
            published = summary.published(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "run complete"
        );
        Ok(summary)
    }

    fn select_contracts(&self, only: Option<&[String]>) -> Result<Vec<&'a DataContract>> {
        match only {
            None => Ok(self.registry.contracts.iter().collect()),
            Some(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.registry.contract(id) {
                        Some(contract) => selected.push(contract),
                        None => bail!("Unknown contract id '{}'", id),
                    }
                }
                Ok(selected)
            }
        }
    }

    /// Execute one contract to completion.
    pub fn execute(&self, contract: &DataContract) -> ContractOutcome {
        debug!(contract = contract.id.as_str(), "executing contract");

        // Local-first: fresh data means no fetch at all.
        if let Some(age) = file_age(&contract.output_path) {
            if age <= contract.freshness() {
                debug!(
                    contract = contract.id.as_str(),
                    age_secs = age.as_secs(),
                    "local data fresh, no-op"
                );
                return ContractOutcome {
                    id: contract.id.clone(),
                    status: ContractStatus::Published { refreshed: false },
                    warnings: Vec::new(),
                };
            }
        }

        let local_exists = contract.output_path.exists();

        let Some(service) = contract.service.as_deref() else {
            // Purely local/derived dataset: nothing to fetch from.
            return if local_exists {
                self.stale_fallback(contract, "no service configured for refresh")
            } else {
                self.failed(contract, "no service configured and no local data")
            };
        };
        let Some(adapter) = self.adapters.get(service) else {
            return if local_exists {
                self.stale_fallback(contract, &format!("no adapter for service '{}'", service))
            } else {
                self.failed(contract, &format!("no adapter for service '{}'", service))
            };
        };

        // Health probe is a fresh check on every run; health is never
        // cached across runs.
        let health = adapter.health_check(self.options.health_timeout);
        if !health.reachable {
            return if local_exists {
                self.stale_fallback(contract, "service unreachable")
            } else {
                self.failed(contract, "service unreachable, no local fallback")
            };
        }

        let timeout = self.registry.fetch_timeout(contract);
        let raw = match adapter.fetch(&contract.fetch_params, timeout) {
            Ok(raw) => raw,
            Err(err) => {
                return if local_exists {
                    self.stale_fallback(contract, &format!("fetch failed: {}", err))
                } else {
                    self.failed(contract, &format!("fetch failed: {}, no local fallback", err))
                };
            }
        };

        let dataset = match Dataset::from_csv_str(&raw) {
            Ok(dataset) => dataset,
            Err(err) => {
                let reason = format!("{}", AdapterError::MalformedOutput(err.to_string()));
                return if local_exists {
                    self.stale_fallback(contract, &reason)
                } else {
                    self.failed(contract, &format!("{}, no local fallback", reason))
                };
            }
        };

        let report = validate(&dataset, &contract.schema);
        let warnings: Vec<String> = report
            .notable_issues()
            .map(|issue| match &issue.column {
                Some(column) => format!("{}: {}", column, issue.message),
                None => issue.message.clone(),
            })
            .collect();

        if report.level == ValidationLevel::Error {
            // Central correctness guarantee: invalid data never replaces
            // previously valid data.
            error!(
                contract = contract.id.as_str(),
                issues = report.issues.len(),
                "validation failed, retaining prior data"
            );
            return ContractOutcome {
                id: contract.id.clone(),
                status: ContractStatus::Failed {
                    reason: format!("validation failed: {}", warnings.join("; ")),
                },
                warnings,
            };
        }

        let publish = report.rewritten.as_ref().unwrap_or(&dataset);
        if let Err(err) = atomic_write(&contract.output_path, &publish.to_csv_string()) {
            return self.failed(contract, &format!("failed to write output: {}", err));
        }

        info!(
            contract = contract.id.as_str(),
            warnings = warnings.len(),
            "published"
        );
        ContractOutcome {
            id: contract.id.clone(),
            status: ContractStatus::Published { refreshed: true },
            warnings,
        }
    }

    fn stale_fallback(&self, contract: &DataContract, reason: &str) -> ContractOutcome {
        warn!(
            contract = contract.id.as_str(),
            reason, "serving stale local data"
        );
        ContractOutcome {
            id: contract.id.clone(),
            status: ContractStatus::Skipped {
                reason: reason.to_string(),
            },
            warnings: vec![format!(
                "serving stale data from {}",
                contract.output_path.display()
            )],
        }
    }

    fn failed(&self, contract: &DataContract, reason: &str) -> ContractOutcome {
        error!(contract = contract.id.as_str(), reason, "contract failed");
        ContractOutcome {
            id: contract.id.clone(),
            status: ContractStatus::Failed {
                reason: reason.to_string(),
            },
            warnings: Vec::new(),
        }
    }
}

/// Age of the file at `path`, `None` when it does not exist.
fn file_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Write via temp file + atomic rename so concurrent readers never see a
/// partial file.
fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    use std::io::Write;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Kahn's algorithm over `depends_on` edges, grouped into waves: every
/// contract in wave N has all producers in waves < N. Cycles are a
/// configuration error reported before any contract runs.
fn topological_waves(contracts: &[&DataContract]) -> Result<Vec<Vec<usize>>> {
    let index_of: HashMap<&str, usize> = contracts
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; contracts.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); contracts.len()];
    for (i, contract) in contracts.iter().enumerate() {
        for dep in &contract.depends_on {
            // Edges to contracts outside the selection are ignored; the
            // producer is simply not part of this run.
            if let Some(&producer) = index_of.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[producer].push(i);
            }
        }
    }

    let mut waves = Vec::new();
    let mut current: Vec<usize> = (0..contracts.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0usize;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &i in &current {
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        waves.push(std::mem::take(&mut current));
        current = next;
    }

    if placed != contracts.len() {
        let stuck: Vec<&str> = (0..contracts.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| contracts[i].id.as_str())
            .collect();
        bail!("dependency cycle among contracts: {}", stuck.join(", "));
    }

    Ok(waves)
}
