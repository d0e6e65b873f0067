//! Subcommand bodies

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use netheal_core::{fan_out, CheckpointStore, NetHealConfig, Orchestrator, Services};
use netheal_exec::{
    CommandExecutor, DeviceLeases, DeviceRegistry, FleetExecutor, OpenSshConnector, SessionLog,
};
use netheal_oracle::OracleClient;

fn load_registry(config: &NetHealConfig) -> Result<DeviceRegistry> {
    let path = config.registry_path();
    DeviceRegistry::load(&path)
        .with_context(|| format!("loading device registry from {}", path.display()))
}

fn fleet_executor(config: &NetHealConfig) -> Arc<FleetExecutor> {
    Arc::new(
        FleetExecutor::new(Arc::new(OpenSshConnector::new()), Arc::new(DeviceLeases::new()))
            .with_session_log(Arc::new(SessionLog::new(config.session_log_path()))),
    )
}

fn load_topology(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading topology file {}", path.display()))?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("topology file {} is not JSON", path.display()))?;
    Ok(serde_json::to_string_pretty(&parsed)?)
}

/// Drive every active alarm; returns the process exit code
pub(crate) async fn run(config: NetHealConfig) -> Result<i32> {
    config.validate().context("invalid configuration")?;
    let registry = load_registry(&config)?;
    let topology = load_topology(&config.topology_path())?;
    let oracle = OracleClient::from_config(config.oracle_config())
        .context("configuring the reasoning oracle")?;

    let services = Services::new(
        Arc::new(registry),
        fleet_executor(&config),
        oracle,
        Arc::new(CheckpointStore::new(config.data_dir.clone())),
    )
    .with_timeouts(config.exec_timeouts())
    .with_fleet_cap(config.fleet_cap);

    // with human-in-the-loop on, the orchestrator's gate reads this console
    let orchestrator =
        Orchestrator::new(services, config, topology).context("opening the remediation log")?;

    let summary = orchestrator.run().await.context("alarm run failed")?;
    let report = serde_json::json!({ "Alarms": summary.reports });
    println!("{}", serde_json::to_string_pretty(&report)?);
    for run in summary.escalated() {
        tracing::warn!(alarm = %run.alarm.id, reason = %run.reason, "alarm escalated");
    }
    Ok(summary.exit_code())
}

/// One harmless probe per device; non-zero if any device fails
pub(crate) async fn labcheck(config: &NetHealConfig) -> Result<i32> {
    let registry = load_registry(config)?;
    let executor: Arc<dyn CommandExecutor> = fleet_executor(config);
    let timeouts = config.exec_timeouts();

    let items: Vec<_> = registry
        .iter()
        .map(|device| (device.name.clone(), device.clone()))
        .collect();
    let results = fan_out(items, Some(config.fleet_cap), move |device| {
        let executor = Arc::clone(&executor);
        async move {
            let command = device.kind.probe_command().to_string();
            let outcome = executor.run(&device, &[command], timeouts).await;
            (device.kind, outcome)
        }
    })
    .await;

    println!("{:<16} {:<16} {:<6} DETAIL", "DEVICE", "KIND", "STATUS");
    let mut failed = 0;
    for (name, joined) in results {
        let (kind, status, detail) = match joined {
            Ok((kind, outcome)) if outcome.all_succeeded() => {
                let first = outcome
                    .results
                    .first()
                    .map(|r| r.output.lines().next().unwrap_or_default().trim().to_string())
                    .unwrap_or_default();
                (kind.to_string(), "ok", first)
            }
            Ok((kind, outcome)) => {
                failed += 1;
                let detail = outcome
                    .connection_error
                    .clone()
                    .or_else(|| outcome.results.iter().find_map(|r| r.error.clone()))
                    .unwrap_or_else(|| "probe failed".to_string());
                (kind.to_string(), "FAIL", detail)
            }
            Err(failure) => {
                failed += 1;
                ("?".to_string(), "FAIL", failure.to_string())
            }
        };
        println!("{name:<16} {kind:<16} {status:<6} {detail}");
    }
    tracing::info!(devices = registry.len(), failed, "lab check complete");
    Ok(i32::from(failed > 0))
}

/// Registry listing; secrets are never printed
pub(crate) fn registry(config: &NetHealConfig) -> Result<i32> {
    let registry = load_registry(config)?;
    println!("{:<16} {:<16} {:<22} USER", "DEVICE", "KIND", "ADDRESS");
    for device in registry.iter() {
        let address = format!("{}:{}", device.address, device.port);
        let enable = if device.credentials.enable_secret.is_some() {
            " (enable)"
        } else {
            ""
        };
        println!(
            "{:<16} {:<16} {:<22} {}{enable}",
            device.name, device.kind, address, device.credentials.username
        );
    }
    Ok(0)
}
