//! Datapact: contract-driven data pipeline engine.
//!
//! Discovers data requirements from a consumer-side directory tree,
//! derives formal data contracts (schema + freshness + data source),
//! executes those contracts against local caches or external CLI
//! services, and validates produced datasets before publishing them for
//! downstream consumers.
//!
//! The library surface exists so integration tests and embedders can
//! drive the engine without going through the CLI.

pub mod cli;
pub mod contract;
pub mod discover;
pub mod pipeline;

pub use contract::{ContractRegistry, DataContract, RegistryError};
pub use discover::{discover, DiscoverOptions, DiscoveryOutcome};
pub use pipeline::{
    ContractOutcome, ContractStatus, PipelineManager, RunOptions, RunSummary,
};
