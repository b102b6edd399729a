//! Service Adapter seam for Datapact
//!
//! Every external data provider is reached through one narrow contract: a
//! health probe and a fetch, both bounded by a timeout. This is the seam
//! at which all non-determinism and external failure enters the pipeline;
//! everything above it is written as if `fetch` can fail on any call.
//!
//! The production implementation ([`CliAdapter`]) spawns the provider's
//! CLI as an isolated subprocess. Tests substitute mock implementations
//! of [`ServiceAdapter`] without touching real processes.

pub mod cli_adapter;

pub use cli_adapter::CliAdapter;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key/value fetch parameters, rendered as `--key value` CLI arguments in
/// sorted order so invocations are reproducible.
pub type FetchParams = BTreeMap<String, String>;

/// Typed failure modes of a service call. There is deliberately no
/// "empty result" variant: an empty fetch is malformed output, never a
/// silent success.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Service call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Service produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("Service call cancelled")]
    Cancelled,
}

/// Declarative invocation contract for one external CLI service.
///
/// `health_args` replace `args` for the health probe; the probe is a
/// dedicated low-cost invocation mode of the same command, never a full
/// fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the inherited environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_health_args")]
    pub health_args: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_health_args() -> Vec<String> {
    vec!["--health".to_string()]
}

impl ServiceSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            health_args: default_health_args(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Transient, per-run record of one health probe. Intentionally never
/// persisted: a stale health cache would mask real outages.
#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub service: String,
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
    pub latency: Duration,
}

/// Run-level cancellation signal, shared with every in-flight adapter
/// call. Setting it terminates subprocesses promptly rather than waiting
/// for their natural timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Underlying atomic, for wiring into OS signal handlers.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// The uniform invocation contract the pipeline manager relies on.
pub trait ServiceAdapter: Send + Sync {
    /// Service name, for logging and summaries.
    fn name(&self) -> &str;

    /// Lightweight reachability probe. Must complete within `timeout` or
    /// report unreachable; must never perform a full fetch.
    fn health_check(&self, timeout: Duration) -> ServiceHealth;

    /// Invoke the external process and capture its output. On timeout or
    /// non-zero exit this returns a typed error, never an empty result.
    fn fetch(&self, params: &FetchParams, timeout: Duration) -> Result<String, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_spec_defaults() {
        let spec: ServiceSpec = serde_json::from_str(r#"{"command": "fetch-prices"}"#).unwrap();
        assert_eq!(spec.timeout_secs, 30);
        assert_eq!(spec.health_args, vec!["--health"]);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
