//! Executor batch contract against a scripted transport

use std::sync::Arc;
use std::time::Duration;

use netheal_exec::{
    CommandExecutor, DeviceLeases, ExecTimeouts, FleetExecutor, SessionLog,
};
use netheal_exec::ConnectionFailure;
use netheal_test_utils::{lab_registry, FakeConnector, FakeDevice, FakeReply};
use pretty_assertions::assert_eq;

fn quick() -> ExecTimeouts {
    ExecTimeouts::default()
        .with_connect(Duration::from_secs(1))
        .with_per_command(Duration::from_millis(50))
}

fn fleet(connector: &FakeConnector) -> FleetExecutor {
    FleetExecutor::new(Arc::new(connector.clone()), Arc::new(DeviceLeases::new()))
}

fn cmds(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| (*c).to_string()).collect()
}

#[tokio::test]
async fn test_one_result_per_command_in_order() {
    let connector = FakeConnector::new().with_device("host", FakeDevice::new());
    let registry = lab_registry();
    let host = registry.lookup("host").unwrap();

    let commands = cmds(&["uname -a", "sleep 0", "ip addr", "uname -a"]);
    let outcome = fleet(&connector).run(host, &commands, quick()).await;

    assert_eq!(outcome.results.len(), commands.len());
    let order: Vec<&str> = outcome.results.iter().map(|r| r.command.as_str()).collect();
    assert_eq!(order, vec!["uname -a", "sleep 0", "ip addr", "uname -a"]);
    assert!(outcome.all_succeeded());
    assert_eq!(connector.executed("host"), cmds(&["uname -a", "ip addr", "uname -a"]));
    assert_eq!(connector.connect_count("host"), 1);
}

#[tokio::test]
async fn test_long_sleep_is_cut_at_command_timeout() {
    let connector = FakeConnector::new().with_device("host", FakeDevice::new());
    let registry = lab_registry();
    let host = registry.lookup("host").unwrap();
    let timeouts = quick().with_per_command(Duration::from_millis(200));

    let commands = cmds(&["sleep 100000", "ip link set eth1 up"]);
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        fleet(&connector).run(host, &commands, timeouts),
    )
    .await
    .expect("batch must finish within the command timeout");

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0].timed_out);
    assert!(outcome.results[1].succeeded());
    assert_eq!(connector.executed("host"), cmds(&["ip link set eth1 up"]));
}

#[tokio::test]
async fn test_sleep_never_reaches_transport() {
    let connector = FakeConnector::new().with_device("router", FakeDevice::new());
    let registry = lab_registry();
    let router = registry.lookup("router").unwrap();

    let outcome = fleet(&connector)
        .run(router, &cmds(&["sleep 0", "sleep 0.01"]), quick())
        .await;

    assert!(outcome.all_succeeded());
    assert!(outcome.results.iter().all(|r| r.output.is_empty()));
    assert_eq!(connector.connect_count("router"), 0);
    assert!(connector.all_executed().is_empty());
}

#[tokio::test]
async fn test_timeout_is_recorded_and_batch_continues() {
    let connector = FakeConnector::new().with_device(
        "host",
        FakeDevice::new()
            .hang_on("ping -c 100 10.0.0.9")
            .reply("uptime", "up 3 days"),
    );
    let registry = lab_registry();
    let host = registry.lookup("host").unwrap();

    let outcome = fleet(&connector)
        .run(host, &cmds(&["ping -c 100 10.0.0.9", "uptime"]), quick())
        .await;

    let first = &outcome.results[0];
    assert!(first.timed_out);
    assert_eq!(first.output, "partial");
    assert_eq!(outcome.results[1].output, "up 3 days");
    assert!(outcome.connection_error.is_none());
}

#[tokio::test]
async fn test_refused_connection_fails_every_command() {
    let connector = FakeConnector::new().with_device(
        "firewall",
        FakeDevice::new().refuse(ConnectionFailure::Auth),
    );
    let registry = lab_registry();
    let fw = registry.lookup("firewall").unwrap();

    let commands = cmds(&["show route", "show interface ip brief", "sleep 0"]);
    let outcome = fleet(&connector).run(fw, &commands, quick()).await;

    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.is_connection_failure());
    assert!(outcome
        .results
        .iter()
        .all(|r| r.error.as_deref().is_some_and(|e| e.contains("auth"))));
    assert_eq!(connector.open_sessions(), 0);
}

#[tokio::test]
async fn test_connection_lost_mid_batch_keeps_earlier_results() {
    let connector = FakeConnector::new().with_device(
        "host",
        FakeDevice::new().lose_connection_after(1),
    );
    let registry = lab_registry();
    let host = registry.lookup("host").unwrap();

    let outcome = fleet(&connector)
        .run(host, &cmds(&["a", "b", "c"]), quick())
        .await;

    assert!(outcome.results[0].succeeded());
    assert!(!outcome.results[1].succeeded());
    assert!(!outcome.results[2].succeeded());
    assert!(outcome.is_connection_failure());
    assert_eq!(connector.open_sessions(), 0);
    assert_eq!(connector.closed_sessions(), 1);
}

#[tokio::test]
async fn test_network_session_elevates_and_disables_paging_once() {
    let connector = FakeConnector::new().with_device(
        "router",
        FakeDevice::new()
            .unprivileged(Some("lab-enable"))
            .drops_privilege_on("disable"),
    );
    let registry = lab_registry();
    let router = registry.lookup("router").unwrap();

    let outcome = fleet(&connector)
        .run(router, &cmds(&["show ip route", "disable", "show ip int brief"]), quick())
        .await;

    assert!(outcome.all_succeeded());
    assert_eq!(
        connector.executed("router"),
        cmds(&["terminal length 0", "show ip route", "disable", "show ip int brief"])
    );
    // once on open, once after privilege was dropped
    assert_eq!(connector.elevations(), 2);
}

#[tokio::test]
async fn test_wrong_enable_secret_is_auth_failure() {
    let connector = FakeConnector::new().with_device(
        "firewall",
        FakeDevice::new().unprivileged(Some("something-else")),
    );
    let registry = lab_registry();
    let fw = registry.lookup("firewall").unwrap();

    let outcome = fleet(&connector).run(fw, &cmds(&["show run"]), quick()).await;

    assert!(outcome.is_connection_failure());
    assert!(connector.executed("firewall").is_empty());
    assert_eq!(connector.open_sessions(), 0);
}

#[tokio::test]
async fn test_linux_host_gets_no_paging_command() {
    let connector = FakeConnector::new().with_device(
        "host",
        FakeDevice::new().reply_with("false", FakeReply::error("", Some(1))),
    );
    let registry = lab_registry();
    let host = registry.lookup("host").unwrap();

    let outcome = fleet(&connector).run(host, &cmds(&["false"]), quick()).await;

    assert_eq!(connector.executed("host"), cmds(&["false"]));
    assert_eq!(outcome.results[0].error.as_deref(), Some("exit status 1"));
}

#[tokio::test]
async fn test_batches_on_one_device_never_overlap() {
    let connector = FakeConnector::new().with_device(
        "switch",
        FakeDevice::new().latency(Duration::from_millis(10)),
    );
    let registry = Arc::new(lab_registry());
    let fleet = Arc::new(fleet(&connector));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let fleet = Arc::clone(&fleet);
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let switch = registry.lookup("switch").unwrap();
            fleet
                .run(switch, &cmds(&["show vlan brief", "show mac address-table"]), quick())
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().all_succeeded());
    }
    assert_eq!(connector.max_concurrent("switch"), 1);
    assert_eq!(connector.connect_count("switch"), 4);
}

#[tokio::test]
async fn test_panicking_transport_releases_lease_and_session() {
    let connector = FakeConnector::new().with_device("host", FakeDevice::new().panic_on("boom"));
    let registry = Arc::new(lab_registry());
    let fleet = Arc::new(fleet(&connector));

    let crashed = {
        let fleet = Arc::clone(&fleet);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let host = registry.lookup("host").unwrap();
            fleet.run(host, &cmds(&["boom"]), quick()).await
        })
    };
    assert!(crashed.await.unwrap_err().is_panic());
    assert_eq!(connector.open_sessions(), 0);

    let host = registry.lookup("host").unwrap();
    let after = tokio::time::timeout(
        Duration::from_secs(1),
        fleet.run(host, &cmds(&["uptime"]), quick()),
    )
    .await
    .expect("lease must be free after a panic");
    assert!(after.all_succeeded());
}

#[tokio::test]
async fn test_session_log_records_each_batch() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(SessionLog::new(dir.path().join("session_log.jsonl")));
    let connector = FakeConnector::new()
        .with_device("host", FakeDevice::new())
        .with_device("router", FakeDevice::new());
    let fleet = fleet(&connector).with_session_log(Arc::clone(&log));
    let registry = lab_registry();

    fleet
        .run(registry.lookup("host").unwrap(), &cmds(&["uname -a"]), quick())
        .await;
    fleet
        .run(registry.lookup("router").unwrap(), &cmds(&["show clock"]), quick())
        .await;

    let records = log.read_all().await.unwrap();
    let devices: Vec<&str> = records.iter().map(|r| r.device.as_str()).collect();
    assert_eq!(devices, vec!["host", "router"]);
    assert_eq!(records[1].results[0].command, "show clock");
}
