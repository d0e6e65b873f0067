//! End-to-end alarm runs against a scripted lab and a scripted oracle

use std::sync::Arc;
use std::time::Duration;

use netheal_core::prelude::*;
use netheal_core::prompts::{self, AlarmContext};
use netheal_core::report::ReportFile;
use netheal_core::{AttemptOutcome, FinalReport, ProbeConfig, Recon, Telemetry, VerificationCheck};
use netheal_exec::{ConnectionFailure, DeviceLeases, ExecTimeouts, FleetExecutor};
use netheal_test_utils::{
    lab_registry, lab_topology, ping_output, scripted_client, FakeConnector, FakeDevice,
    ScriptedBackend, LAB_TARGET,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const ALARM: &str = "100% packet loss to 10.10.10.2";

const RCA_TEXT: &str =
    "Root cause: interface Gi0/1 on router is administratively down, isolating 10.10.10.0/24.";

const PLAN: &str = "```json\n{\"commands\": {\"router\": [\"configure terminal\", \"interface Gi0/1\", \"no shutdown\", \"exit\"]}}\n```";

struct Lab {
    _dir: TempDir,
    connector: FakeConnector,
    backend: Arc<ScriptedBackend>,
    services: Services,
    orchestrator: Orchestrator,
}

fn quick() -> ExecTimeouts {
    ExecTimeouts::default()
        .with_connect(Duration::from_secs(1))
        .with_per_command(Duration::from_millis(200))
}

fn cmds(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| (*c).to_string()).collect()
}

fn ping() -> String {
    format!("ping -c 4 {LAB_TARGET}")
}

/// Router Gi0/1 is down until `no shutdown` runs on it
fn lab_connector() -> FakeConnector {
    FakeConnector::new()
        .with_device(
            "router",
            FakeDevice::new().reply(
                "show ip interface brief",
                "GigabitEthernet0/1  10.10.10.1  YES manual administratively down down",
            ),
        )
        .with_device("firewall", FakeDevice::new())
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new().reply(&ping(), &ping_output(LAB_TARGET, 100)))
        .heal_when("router", "no shutdown", "host", &ping(), &ping_output(LAB_TARGET, 0))
}

/// Recon and insight answers shared by every scenario
fn with_recon_routes(backend: ScriptedBackend) -> ScriptedBackend {
    backend
        .route(prompts::TRAFFIC_PATH_MARKER, r#"{"traffic-path": ["router", "switch", "host"]}"#)
        .route(prompts::DIAGNOSTICS_MARKER, "show ip interface brief")
        .route(prompts::FLEET_SUMMARY_MARKER, "router Gi0/1 is down; switch and host look healthy")
        .route(prompts::DEVICE_SUMMARY_MARKER, "interface down")
        .route(prompts::COMMAND_INSIGHT_MARKER, "Gi0/1 is administratively down")
}

fn lab_config() -> NetHealConfig {
    NetHealConfig::default().with_probe(ProbeConfig::new("host", &[LAB_TARGET]))
}

fn lab(connector: FakeConnector, backend: ScriptedBackend, config: NetHealConfig) -> Lab {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let executor = Arc::new(FleetExecutor::new(
        Arc::new(connector.clone()),
        Arc::new(DeviceLeases::new()),
    ));
    let services = Services::new(
        Arc::new(lab_registry()),
        executor,
        scripted_client(Arc::clone(&backend)),
        Arc::new(CheckpointStore::new(dir.path())),
    )
    .with_timeouts(quick());
    let config = config
        .with_data_dir(dir.path())
        .with_settle_delay(Duration::ZERO);
    let orchestrator = Orchestrator::new(services.clone(), config, lab_topology().to_string())
        .unwrap()
        .with_gate(Arc::new(AutoConfirm));
    Lab {
        _dir: dir,
        connector,
        backend,
        services,
        orchestrator,
    }
}

fn ping_alarm() -> Alarm {
    Alarm::new("Ping Result", 1, json!(ALARM))
}

#[tokio::test]
async fn test_interface_down_is_remediated_and_verified() {
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route(prompts::RCA_MARKER, RCA_TEXT)
            .route_sequence(prompts::VERIFY_MARKER, &["not-Resolved", "Resolved"]),
    );
    let lab = lab(lab_connector(), backend, lab_config());

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Resolved, "reason: {}", run.reason);
    assert_eq!(run.attempts, 1);
    assert_eq!(
        run.trail,
        vec![
            AlarmState::Intake,
            AlarmState::Recon,
            AlarmState::Hypothesize,
            AlarmState::AwaitingConfirmation,
            AlarmState::Remediate,
            AlarmState::Verify,
            AlarmState::Resolved,
        ]
    );
    assert!(lab.connector.executed("router").contains(&"no shutdown".to_string()));

    let entries = lab.orchestrator.remediation_log().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt.device, "router");
    assert_eq!(
        entries[0].attempt.commands,
        cmds(&["configure terminal", "interface Gi0/1", "no shutdown", "exit"])
    );
    assert!(lab.orchestrator.remediation_log().verify_integrity().is_ok());

    let sample = run.last_sample.expect("verified telemetry");
    assert_eq!(sample.telemetry.readings[0].loss_percent, Some(0.0));
    assert_eq!(run.history.len(), 1);
    assert!(lab.services.checkpoints.rca_narrative(&run.alarm.id).exists());
}

#[tokio::test]
async fn test_cleared_condition_resolves_without_remediation() {
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, r#"{"status": "Null"}"#)
            .route(
                prompts::RCA_MARKER,
                "The link flapped earlier; the condition no longer present on any device.",
            )
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    );
    let lab = lab(lab_connector(), backend, lab_config());

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Resolved);
    assert_eq!(run.reason, "condition no longer present");
    assert!(!run.trail.contains(&AlarmState::Remediate));
    assert!(lab.orchestrator.remediation_log().entries().is_empty());
    assert!(!lab.connector.executed("router").contains(&"no shutdown".to_string()));
}

#[tokio::test]
async fn test_fenced_empty_plan_without_cause_escalates() {
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, "```json\n{\"commands\":[]}\n```")
            .route(prompts::RCA_MARKER, "No root cause identified from the collected output.")
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    );
    let lab = lab(lab_connector(), backend, lab_config());

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert!(run.reason.contains("no root cause identified"), "{}", run.reason);
    assert_eq!(run.attempts, 0);
    assert!(lab.orchestrator.remediation_log().entries().is_empty());
}

#[tokio::test]
async fn test_unresolving_plans_escalate_at_attempt_bound() {
    let narratives = [
        "Root cause 1: interface Gi0/1 on router is shut down.",
        "Root cause 2: duplex mismatch on router Gi0/1.",
        "Root cause 3: stale ARP entry on router.",
        "Root cause 4: router Gi0/1 has the wrong subnet mask.",
        "Root cause 5: router Gi0/1 is err-disabled.",
    ];
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route_sequence(prompts::RCA_MARKER, &narratives)
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    );
    // no heal: the plan never clears the loss
    let connector = FakeConnector::new()
        .with_device("router", FakeDevice::new())
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new().reply(&ping(), &ping_output(LAB_TARGET, 100)));
    let lab = lab(connector, backend, lab_config().with_attempt_bound(5));

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert!(run.reason.starts_with("attempt limit reached"), "{}", run.reason);
    assert_eq!(run.attempts, 5);
    assert_eq!(run.trail.iter().filter(|s| **s == AlarmState::Remediate).count(), 5);
    assert_eq!(run.history.len(), 5);

    let entries = lab.orchestrator.remediation_log().entries();
    let attempts: Vec<u32> = entries.iter().map(|e| e.attempt.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
    assert!(lab.orchestrator.remediation_log().verify_integrity().is_ok());
}

fn plan_backend() -> ScriptedBackend {
    with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route_sequence(
                prompts::RCA_MARKER,
                &[RCA_TEXT, "Root cause: Gi0/1 on router is err-disabled."],
            )
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    )
}

#[tokio::test]
async fn test_dropped_connection_logs_partial_attempt_and_retries() {
    let connector = FakeConnector::new()
        // paging, `configure terminal`, `interface Gi0/1`, then the link drops
        .with_device("router", FakeDevice::new().lose_connection_after(3))
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new().reply(&ping(), &ping_output(LAB_TARGET, 100)));
    let lab = lab(connector, plan_backend(), lab_config().with_attempt_bound(2));

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert!(run.reason.starts_with("attempt limit reached"), "{}", run.reason);
    assert!(run.trail.contains(&AlarmState::Retry));

    let entries = lab.orchestrator.remediation_log().entries();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.attempt.device, "router");
        assert_eq!(entry.attempt.outcome, AttemptOutcome::Partial);
        assert!(entry.attempt.connection_error.is_some());
        assert_eq!(entry.attempt.results.len(), 4);
    }
    assert!(!lab.connector.executed("router").contains(&"no shutdown".to_string()));
    assert!(lab.orchestrator.remediation_log().verify_integrity().is_ok());
}

#[tokio::test]
async fn test_refused_connection_logs_failed_attempt_before_escalating() {
    let connector = FakeConnector::new()
        .with_device("router", FakeDevice::new().refuse(ConnectionFailure::Unreachable))
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new().reply(&ping(), &ping_output(LAB_TARGET, 100)));
    let lab = lab(connector, plan_backend(), lab_config().with_attempt_bound(1));

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert_eq!(run.attempts, 1);
    assert_eq!(
        &run.trail[run.trail.len() - 3..],
        &[AlarmState::Remediate, AlarmState::Verify, AlarmState::Escalated]
    );

    let entries = lab.orchestrator.remediation_log().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt.outcome, AttemptOutcome::Failed);
    assert!(entries[0]
        .attempt
        .connection_error
        .as_deref()
        .is_some_and(|e| e.contains("scripted refusal")));
    assert_eq!(run.remediations, vec![entries[0].attempt.clone()]);
    assert!(lab.connector.executed("router").is_empty());
}

#[tokio::test]
async fn test_unavailable_oracle_still_terminates() {
    // no routes at all: every oracle call fails
    let lab = lab(lab_connector(), ScriptedBackend::new(), lab_config().with_attempt_bound(3));

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert!(run.reason.starts_with("attempt limit reached"), "{}", run.reason);
    assert_eq!(run.attempts, 3);
    assert!(run.history.is_empty());
    assert!(lab.orchestrator.remediation_log().entries().is_empty());
    // recon fell back to built-in diagnostics on every registry device
    assert!(lab.connector.executed("firewall").contains(&"show route".to_string()));
}

#[tokio::test]
async fn test_repeated_root_cause_is_never_recorded_twice() {
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route(prompts::RCA_MARKER, RCA_TEXT)
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    );
    let connector = FakeConnector::new()
        .with_device("router", FakeDevice::new())
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new().reply(&ping(), &ping_output(LAB_TARGET, 100)));
    let lab = lab(connector, backend, lab_config().with_attempt_bound(4));

    let run = lab.orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert_eq!(run.attempts, 4);
    assert_eq!(run.history.len(), 1);
    // one applied plan; the other rounds failed on the repeat
    assert_eq!(lab.orchestrator.remediation_log().entries().len(), 1);
    // each failed round re-asked once with the repeat flagged
    let reasks = lab
        .backend
        .calls_matching("previous answer repeated one of the root causes")
        .len();
    assert_eq!(reasks, 3);
}

#[tokio::test]
async fn test_gate_failure_escalates_before_remediation() {
    struct ClosedGate;

    #[async_trait::async_trait]
    impl ConfirmationGate for ClosedGate {
        async fn confirm(&self, _prompt: &str) -> Result<(), NetHealError> {
            Err(NetHealError::Gate("input closed before confirmation".into()))
        }
    }

    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route(prompts::RCA_MARKER, RCA_TEXT)
            .route(prompts::VERIFY_MARKER, "not-Resolved"),
    );
    let lab = lab(lab_connector(), backend, lab_config());
    let orchestrator = lab.orchestrator.clone().with_gate(Arc::new(ClosedGate));

    let run = orchestrator.process(ping_alarm()).await;

    assert_eq!(run.state, AlarmState::Escalated);
    assert_eq!(
        &run.trail[run.trail.len() - 2..],
        &[AlarmState::AwaitingConfirmation, AlarmState::Escalated]
    );
    assert!(!lab.connector.executed("router").contains(&"no shutdown".to_string()));
}

#[tokio::test]
async fn test_recon_survives_a_panicking_device() {
    let connector = FakeConnector::new()
        .with_device("router", FakeDevice::new().panic_on("show ip interface brief"))
        .with_device("switch", FakeDevice::new())
        .with_device("host", FakeDevice::new());
    let backend = with_recon_routes(ScriptedBackend::new());
    let lab = lab(connector, backend, lab_config());
    let ctx = AlarmContext {
        alarm: ALARM.into(),
        traffic_path: cmds(&["router", "switch", "host", "core-9"]),
        topology: lab_topology().to_string(),
        history: String::new(),
    };

    let report = Recon::new(lab.services.clone())
        .run(&ping_alarm().id, 1, &ctx)
        .await;

    let devices: Vec<&str> = report.insights.iter().map(|i| i.device.as_str()).collect();
    assert_eq!(devices, vec!["router", "switch", "host", "core-9"]);
    assert!(report.insights[0].finding.starts_with("error:"));
    assert_eq!(report.insights[1].finding, "interface down");
    assert!(report.insights[3].finding.contains("not found"));
    assert!(!lab.connector.executed("switch").is_empty());
}

#[tokio::test]
async fn test_verification_is_idempotent_for_same_telemetry() {
    let backend = Arc::new(
        ScriptedBackend::new().route_sequence(prompts::VERIFY_MARKER, &["not-Resolved", "Resolved"]),
    );
    let check = VerificationCheck::new(scripted_client(Arc::clone(&backend)));
    let alarm = ping_alarm();
    let telemetry = Telemetry::new(Vec::new());

    let first = check.is_resolved(&alarm, telemetry.clone()).await.unwrap();
    let second = check.is_resolved(&alarm, telemetry.clone()).await.unwrap();
    assert_eq!(first.cleared, second.cleared);
    assert_eq!(backend.call_count(), 1);

    check.invalidate(&alarm.id);
    let third = check.is_resolved(&alarm, telemetry).await.unwrap();
    assert!(third.cleared);
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_full_run_writes_reports() {
    let backend = with_recon_routes(
        ScriptedBackend::new()
            .route(prompts::EXTRACTION_MARKER, PLAN)
            .route(prompts::RCA_MARKER, RCA_TEXT)
            .route_sequence(prompts::VERIFY_MARKER, &["not-Resolved", "Resolved"])
            .route(prompts::FINAL_SUMMARY_MARKER, "Gi0/1 on router was shut; no shutdown restored it.")
            .route("the key : 'Status'", "Active")
            .route("the key : 'Priority'", "Urgent")
            .route(prompts::REPORT_FIELD_MARKER, "Link Down"),
    );
    let lab = lab(lab_connector(), backend, lab_config().with_human_in_the_loop(false));

    let summary = lab.orchestrator.run().await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.runs.len(), 1);
    assert!(summary.skipped.is_empty());
    assert!(!summary.runs[0].trail.contains(&AlarmState::AwaitingConfirmation));

    let store = &lab.services.checkpoints;
    let combined: serde_json::Value = store.read_json(&store.combined_alarms()).unwrap().unwrap();
    assert_eq!(combined["Ping Result"].as_array().map(Vec::len), Some(1));

    let report: ReportFile<FinalReport> = store.read_json(&store.final_report()).unwrap().unwrap();
    let entry = &report.alarms[0];
    assert_eq!(entry.base.alarm_id.as_str(), "Ping Result 1");
    assert_eq!(entry.base.status, "Resolved");
    assert_eq!(entry.base.priority, "Urgent");
    assert_eq!(entry.classification, "Link Down");
    assert_eq!(entry.final_outcome, "Resolved after 1 remediation attempt(s)");
    assert_eq!(entry.root_cause_analysis, vec![RCA_TEXT.to_string()]);
    assert!(entry.remediation_steps[0].starts_with("router (attempt 1, succeeded)"));
    assert!(store.initial_report().exists());
}

#[tokio::test]
async fn test_resolved_alarms_are_skipped() {
    let backend = ScriptedBackend::new()
        .route("the key : 'Status'", "Resolved")
        .route(prompts::REPORT_FIELD_MARKER, "Informational");
    let lab = lab(lab_connector(), backend, lab_config());

    let summary = lab.orchestrator.run().await.unwrap();

    assert!(summary.runs.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.reports[0].final_outcome, "Resolved at intake; no action taken");
    assert!(lab.connector.executed("router").is_empty());
}
