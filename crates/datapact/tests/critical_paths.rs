//! Critical path tests over real files and real subprocesses.
//!
//! These exercise the public library surface end to end: discover a tree,
//! load the registry back, execute contracts against real CLI services,
//! and confirm the published files on disk.

use std::fs;
use std::path::Path;

use datapact::{discover, ContractRegistry, DiscoverOptions};
use tempfile::TempDir;

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("intraday")).unwrap();
    fs::create_dir_all(root.join("historical")).unwrap();
    fs::write(
        root.join("intraday/pnl.csv"),
        "Date,PnL\n2024-01-10,1.5\n2024-01-11,-0.3\n",
    )
    .unwrap();
    fs::write(
        root.join("historical/trades.csv"),
        "Ticker,Exit\nTSLA,2024-01-10\nAAPL,2024-03-02\n",
    )
    .unwrap();
}

mod discovery {
    use super::*;

    /// Discovery twice over an unchanged tree must be byte-identical on
    /// disk, not just structurally equal.
    #[test]
    fn test_discovery_idempotent_on_disk() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());

        let first = discover(dir.path(), &DiscoverOptions::default()).unwrap();
        let path_a = dir.path().join("registry_a.yaml");
        first.registry.save(&path_a).unwrap();

        let second = discover(dir.path(), &DiscoverOptions::default()).unwrap();
        let path_b = dir.path().join("registry_b.yaml");
        second.registry.save(&path_b).unwrap();

        assert_eq!(
            fs::read_to_string(&path_a).unwrap(),
            fs::read_to_string(&path_b).unwrap()
        );
    }

    /// A saved registry must load back verified and equivalent.
    #[test]
    fn test_registry_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());

        let outcome = discover(dir.path(), &DiscoverOptions::default()).unwrap();
        let registry_path = dir.path().join("datapact.yaml");
        outcome.registry.save(&registry_path).unwrap();

        let loaded = ContractRegistry::load(&registry_path).unwrap();
        assert_eq!(loaded.contracts.len(), 2);
        assert!(loaded.contract("intraday_pnl").is_some());
        assert!(loaded.contract("historical_trades").is_some());
    }
}

#[cfg(unix)]
mod execution {
    use super::*;
    use datapact::pipeline::AdapterSet;
    use datapact::{PipelineManager, RunOptions};
    use datapact_adapter::{CancelFlag, CliAdapter, ServiceAdapter, ServiceSpec};
    use std::sync::Arc;
    use std::time::{Duration, Instant, SystemTime};

    fn backdate(path: &Path, secs_ago: u64) {
        let mtime = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(secs_ago),
        );
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    fn sh_service(script: &str) -> ServiceSpec {
        let mut spec = ServiceSpec::new("sh");
        spec.args = vec!["-c".to_string(), script.to_string()];
        // Probe mode: same command, dedicated cheap invocation.
        spec.health_args = vec![];
        spec
    }

    fn adapter_set(entries: Vec<(&str, ServiceSpec)>) -> AdapterSet {
        entries
            .into_iter()
            .map(|(name, spec)| {
                let adapter: Arc<dyn ServiceAdapter> =
                    Arc::new(CliAdapter::new(name, spec, CancelFlag::new()));
                (name.to_string(), adapter)
            })
            .collect()
    }

    /// End to end: discover, wire a real subprocess service, run, and
    /// observe the refreshed file.
    #[test]
    fn test_run_refreshes_stale_contract_via_subprocess() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let pnl_path = dir.path().join("intraday/pnl.csv");
        backdate(&pnl_path, 48 * 3600);
        backdate(&dir.path().join("historical/trades.csv"), 1);

        let mut options = DiscoverOptions::default();
        options
            .service_map
            .insert("intraday".to_string(), "market".to_string());
        let outcome = discover(dir.path(), &options).unwrap();
        let registry = outcome.registry;

        let fresh_csv = "Date,PnL\\n2024-06-01,9.9\\n";
        let adapters = adapter_set(vec![(
            "market",
            sh_service(&format!("printf '{}'", fresh_csv)),
        )]);

        let manager = PipelineManager::new(&registry, adapters, RunOptions::default());
        let summary = manager.run_all(None).unwrap();

        assert_eq!(summary.failed(), 0);
        let published = fs::read_to_string(&pnl_path).unwrap();
        assert!(published.contains("2024-06-01,9.9"));
    }

    /// The freshness invariant: a fresh file means the service is never
    /// invoked, observable here because the service would clobber a
    /// sentinel file if it ran.
    #[test]
    fn test_fresh_contract_never_invokes_service() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let sentinel = dir.path().join("invoked");

        let mut options = DiscoverOptions::default();
        options
            .service_map
            .insert("intraday".to_string(), "market".to_string());
        let registry = discover(dir.path(), &options).unwrap().registry;

        let adapters = adapter_set(vec![(
            "market",
            sh_service(&format!(
                "touch {}; echo Date,PnL; echo 2024-06-01,9.9",
                sentinel.display()
            )),
        )]);

        let manager = PipelineManager::new(&registry, adapters, RunOptions::default());
        let summary = manager.run_all(None).unwrap();

        assert_eq!(summary.published(), 2);
        assert!(!sentinel.exists(), "fresh contract must not call fetch");
    }

    /// No-regression: an ERROR-level refresh leaves the previous file
    /// byte-identical.
    #[test]
    fn test_invalid_refresh_preserves_previous_bytes() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let pnl_path = dir.path().join("intraday/pnl.csv");
        let before = fs::read_to_string(&pnl_path).unwrap();
        backdate(&pnl_path, 48 * 3600);
        backdate(&dir.path().join("historical/trades.csv"), 1);

        let mut options = DiscoverOptions::default();
        options
            .service_map
            .insert("intraday".to_string(), "market".to_string());
        let registry = discover(dir.path(), &options).unwrap().registry;

        // Service returns a row with a missing required PnL value.
        let adapters = adapter_set(vec![(
            "market",
            sh_service("printf 'Date,PnL\\n2024-06-01,\\n'"),
        )]);

        let manager = PipelineManager::new(&registry, adapters, RunOptions::default());
        let summary = manager.run_all(None).unwrap();

        assert_eq!(summary.failed(), 1);
        assert_eq!(fs::read_to_string(&pnl_path).unwrap(), before);
    }

    /// Cancelling a run mid-flight must interrupt the fetch in progress
    /// and resolve the contract through the fallback policy, not after
    /// its full timeout budget.
    #[test]
    fn test_cancellation_mid_run_resolves_via_fallback() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let pnl_path = dir.path().join("intraday/pnl.csv");
        let before = fs::read_to_string(&pnl_path).unwrap();
        backdate(&pnl_path, 48 * 3600);
        backdate(&dir.path().join("historical/trades.csv"), 1);

        let mut options = DiscoverOptions::default();
        options
            .service_map
            .insert("intraday".to_string(), "market".to_string());
        let registry = discover(dir.path(), &options).unwrap().registry;

        // Health probe answers instantly; the fetch hangs until killed.
        let mut spec = ServiceSpec::new("sh");
        spec.args = vec![
            "-c".to_string(),
            "[ \"$0\" = --health ] && exit 0; sleep 30".to_string(),
        ];
        spec.health_args = vec!["--health".to_string()];

        let cancel = CancelFlag::new();
        let adapter: Arc<dyn ServiceAdapter> =
            Arc::new(CliAdapter::new("market", spec, cancel.clone()));
        let adapters: AdapterSet = [("market".to_string(), adapter)].into_iter().collect();

        let run_options = RunOptions {
            cancel: cancel.clone(),
            ..RunOptions::default()
        };

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            cancel.cancel();
        });

        let start = Instant::now();
        let manager = PipelineManager::new(&registry, adapters, run_options);
        let summary = manager.run_all(None).unwrap();
        canceller.join().unwrap();

        // The fetch budget is 30s; cancellation has to cut it short.
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 0);
        assert_eq!(fs::read_to_string(&pnl_path).unwrap(), before);
    }

    /// Stale fallback: unreachable service, existing local file, run is
    /// Skipped and old data survives.
    #[test]
    fn test_unreachable_service_falls_back_to_stale_file() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());
        let pnl_path = dir.path().join("intraday/pnl.csv");
        let before = fs::read_to_string(&pnl_path).unwrap();
        backdate(&pnl_path, 48 * 3600);
        backdate(&dir.path().join("historical/trades.csv"), 1);

        let mut options = DiscoverOptions::default();
        options
            .service_map
            .insert("intraday".to_string(), "market".to_string());
        let registry = discover(dir.path(), &options).unwrap().registry;

        // Health probe exits non-zero: unreachable.
        let mut spec = sh_service("exit 7");
        spec.health_args = vec![];
        let adapters = adapter_set(vec![("market", spec)]);

        let manager = PipelineManager::new(&registry, adapters, RunOptions::default());
        let summary = manager.run_all(None).unwrap();

        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 0);
        assert_eq!(fs::read_to_string(&pnl_path).unwrap(), before);
    }
}
