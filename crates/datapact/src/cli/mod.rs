//! Command-line surface of the pipeline manager.
//!
//! Three commands: `run` executes contracts (exit 1 if any fail),
//! `discover` regenerates the registry from a directory tree, and
//! `validate` checks one file against one contract schema offline.

pub mod output;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use datapact_adapter::{CancelFlag, CliAdapter, ServiceAdapter};
use datapact_schema::{validate, Dataset, ValidationLevel};
use tracing::warn;

use crate::contract::ContractRegistry;
use crate::discover::{discover, DiscoverOptions};
use crate::pipeline::{AdapterSet, PipelineManager, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "datapact",
    about = "Contract-driven data pipeline engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute all (or a filtered subset of) contracts
    Run {
        /// Path to the contract registry file
        #[arg(long, default_value = "datapact.yaml")]
        registry: PathBuf,

        /// Restrict the run to these contract ids (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,

        /// Worker pool size for independent contracts
        #[arg(long, default_value_t = 4)]
        jobs: usize,

        /// Emit the run summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Scan a directory tree and (re)generate the contract registry
    Discover {
        /// Root directory to scan for dataset files
        root: PathBuf,

        /// Where to write the registry
        #[arg(long, default_value = "datapact.yaml")]
        output: PathBuf,
    },
    /// Validate a dataset against a contract schema, without any fetch
    Validate {
        /// Dataset file to check
        file: PathBuf,

        /// Path to the contract registry file
        #[arg(long, default_value = "datapact.yaml")]
        registry: PathBuf,

        /// Contract id whose schema to validate against
        #[arg(long)]
        contract: String,
    },
}

/// Dispatch a parsed CLI invocation; returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            registry,
            only,
            jobs,
            json,
        } => run_command(registry, only, jobs, json),
        Command::Discover { root, output } => discover_command(root, output),
        Command::Validate {
            file,
            registry,
            contract,
        } => validate_command(file, registry, contract),
    }
}

fn run_command(registry_path: PathBuf, only: Vec<String>, jobs: usize, json: bool) -> Result<i32> {
    let registry = ContractRegistry::load(&registry_path)
        .with_context(|| format!("Failed to load registry {}", registry_path.display()))?;

    let cancel = CancelFlag::new();
    install_cancel_handler(&cancel);

    let adapters = build_adapters(&registry, &cancel);
    let options = RunOptions {
        jobs,
        cancel,
        ..RunOptions::default()
    };

    let manager = PipelineManager::new(&registry, adapters, options);
    let filter = (!only.is_empty()).then_some(only.as_slice());
    let summary = manager.run_all(filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::print_run_summary(&summary);
    }

    Ok(if summary.any_failed() { 1 } else { 0 })
}

fn build_adapters(registry: &ContractRegistry, cancel: &CancelFlag) -> AdapterSet {
    registry
        .services
        .iter()
        .map(|(name, spec)| {
            let adapter: Arc<dyn ServiceAdapter> =
                Arc::new(CliAdapter::new(name.clone(), spec.clone(), cancel.clone()));
            (name.clone(), adapter)
        })
        .collect()
}

fn discover_command(root: PathBuf, output_path: PathBuf) -> Result<i32> {
    let previous_ids: Option<BTreeSet<String>> = if output_path.exists() {
        match ContractRegistry::load(&output_path) {
            Ok(prev) => Some(prev.contracts.into_iter().map(|c| c.id).collect()),
            Err(err) => {
                warn!(error = %err, "existing registry unreadable, skipping diff");
                None
            }
        }
    } else {
        None
    };

    let outcome = discover(&root, &DiscoverOptions::default())
        .with_context(|| format!("Discovery failed under {}", root.display()))?;

    for warning in &outcome.warnings {
        println!("warning: {}", warning);
    }

    if let Some(previous) = previous_ids {
        let current: BTreeSet<String> = outcome
            .registry
            .contracts
            .iter()
            .map(|c| c.id.clone())
            .collect();
        for added in current.difference(&previous) {
            println!("added: {}", added);
        }
        for removed in previous.difference(&current) {
            println!("removed: {}", removed);
        }
    }

    outcome
        .registry
        .save(&output_path)
        .with_context(|| format!("Failed to write registry {}", output_path.display()))?;

    println!(
        "Discovered {} contract(s) -> {}",
        outcome.registry.contracts.len(),
        output_path.display()
    );
    Ok(0)
}

fn validate_command(file: PathBuf, registry_path: PathBuf, contract_id: String) -> Result<i32> {
    let registry = ContractRegistry::load(&registry_path)
        .with_context(|| format!("Failed to load registry {}", registry_path.display()))?;
    let contract = registry
        .contract(&contract_id)
        .ok_or_else(|| anyhow!("Contract '{}' not found in registry", contract_id))?;

    let dataset = Dataset::from_csv_path(&file)
        .with_context(|| format!("Failed to read dataset {}", file.display()))?;

    let report = validate(&dataset, &contract.schema);
    output::print_validation_report(&report);

    Ok(if report.level == ValidationLevel::Error {
        1
    } else {
        0
    })
}

#[cfg(unix)]
fn install_cancel_handler(cancel: &CancelFlag) {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, cancel.as_atomic()) {
            warn!(error = %err, "failed to register signal handler");
        }
    }
}

#[cfg(windows)]
fn install_cancel_handler(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!(error = %err, "failed to register ctrl-c handler");
    }
}
