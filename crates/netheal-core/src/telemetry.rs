//! Ping telemetry from linux probe hosts
//!
//! Each probe host runs `ping -c <count> <target>` for its targets in one
//! batch; probe hosts run concurrently.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use netheal_exec::{BatchOutcome, DeviceKind};

use crate::config::ProbeConfig;
use crate::dispatch::fan_out;
use crate::services::Services;
use crate::types::{ProbeReading, Telemetry};
use crate::verify::TelemetrySource;

static PACKET_LOSS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("packet loss pattern"));

/// Loss percentage from ping output
#[must_use]
pub fn parse_loss(output: &str) -> Option<f32> {
    PACKET_LOSS
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[must_use]
pub fn ping_command(target: &str, count: u32) -> String {
    format!("ping -c {count} {target}")
}

#[derive(Debug, Clone)]
pub struct ProbeTelemetry {
    services: Services,
    probes: Vec<ProbeConfig>,
}

impl ProbeTelemetry {
    pub fn new(services: Services, probes: Vec<ProbeConfig>) -> Self {
        Self { services, probes }
    }

    #[must_use]
    pub fn probes(&self) -> &[ProbeConfig] {
        &self.probes
    }
}

fn readings_from(probe: &ProbeConfig, outcome: &BatchOutcome) -> Vec<ProbeReading> {
    probe
        .targets
        .iter()
        .zip(&outcome.results)
        .map(|(target, result)| {
            let loss = parse_loss(&result.output);
            // ping exits non-zero on loss; a loss figure is still a reading
            let error = match (loss, &result.error) {
                (Some(_), _) => None,
                (None, Some(err)) => Some(err.clone()),
                (None, None) => Some("no packet loss figure in output".to_string()),
            };
            ProbeReading {
                probe_host: probe.probe_host.clone(),
                target: target.clone(),
                output: result.output.clone(),
                loss_percent: loss,
                error,
            }
        })
        .collect()
}

fn failed_readings(probe: &ProbeConfig, error: &str) -> Vec<ProbeReading> {
    probe
        .targets
        .iter()
        .map(|target| ProbeReading {
            probe_host: probe.probe_host.clone(),
            target: target.clone(),
            output: String::new(),
            loss_percent: None,
            error: Some(error.to_string()),
        })
        .collect()
}

#[async_trait]
impl TelemetrySource for ProbeTelemetry {
    async fn sample(&self) -> Telemetry {
        let items: Vec<(String, ProbeConfig)> = self
            .probes
            .iter()
            .map(|p| (p.probe_host.clone(), p.clone()))
            .collect();
        let services = self.services.clone();
        let sampled = fan_out(items, Some(self.services.fleet_cap), move |probe| {
            let services = services.clone();
            async move {
                let device = match services.registry.lookup(&probe.probe_host) {
                    Ok(device) => device.clone(),
                    Err(e) => return failed_readings(&probe, &e.to_string()),
                };
                if device.kind != DeviceKind::LinuxHost {
                    tracing::warn!(device = %device.name, kind = %device.kind, "probe host is not a linux host");
                }
                let commands: Vec<String> = probe
                    .targets
                    .iter()
                    .map(|t| ping_command(t, probe.count))
                    .collect();
                let outcome = services.executor.run(&device, &commands, services.timeouts).await;
                readings_from(&probe, &outcome)
            }
        })
        .await;

        let mut readings = Vec::new();
        for ((host, joined), probe) in sampled.into_iter().zip(&self.probes) {
            match joined {
                Ok(mut batch) => readings.append(&mut batch),
                Err(failure) => {
                    tracing::error!(probe_host = %host, error = %failure, "probe task failed");
                    readings.extend(failed_readings(probe, &failure.to_string()));
                }
            }
        }
        Telemetry::new(readings)
    }
}

/// Telemetry that never changes; for runs without probes
#[derive(Debug, Clone, Default)]
pub struct NoTelemetry;

#[async_trait]
impl TelemetrySource for NoTelemetry {
    async fn sample(&self) -> Telemetry {
        Telemetry::new(Vec::new())
    }
}
