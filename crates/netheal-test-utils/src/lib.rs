//! Testing utilities for the netheal workspace
//!
//! Shared fakes and fixtures:
//! - [`FakeConnector`] / [`FakeDevice`]: scripted device transport
//! - [`ScriptedBackend`]: scripted reasoning oracle
//! - a four-device lab registry and its topology

#![allow(missing_docs)]

mod connector;
mod oracle;

use std::sync::Arc;
use std::time::Duration;

pub use connector::{FakeConnector, FakeDevice, FakeReply};
pub use oracle::ScriptedBackend;

use netheal_exec::{Credentials, DeviceDescriptor, DeviceKind, DeviceRegistry};
use netheal_oracle::OracleClient;

/// Address the lab alarms are about
pub const LAB_TARGET: &str = "10.10.10.2";

/// Router, firewall, switch and one Linux host
pub fn lab_devices() -> Vec<DeviceDescriptor> {
    let creds = |user: &str, secret: Option<&str>| Credentials {
        username: user.to_string(),
        password: Some("lab-password".to_string()),
        enable_secret: secret.map(str::to_string),
        key_file: None,
    };
    vec![
        DeviceDescriptor::new("router", DeviceKind::NetworkIos, "192.168.100.1")
            .with_credentials(creds("admin", Some("lab-enable"))),
        DeviceDescriptor::new("firewall", DeviceKind::NetworkAsa, "192.168.100.2")
            .with_credentials(creds("admin", Some("lab-enable"))),
        DeviceDescriptor::new("switch", DeviceKind::NetworkSwitch, "192.168.100.3")
            .with_credentials(creds("admin", None)),
        DeviceDescriptor::new("host", DeviceKind::LinuxHost, "192.168.100.4")
            .with_credentials(creds("root", None)),
    ]
}

pub fn lab_registry() -> DeviceRegistry {
    DeviceRegistry::from_devices(lab_devices()).expect("lab device names are unique")
}

/// Registry file contents in the inventory format
pub fn lab_registry_json() -> String {
    serde_json::json!([
        {"name": "router", "type": "Cisco IOS virtual Router", "ip": "192.168.100.1",
         "username": "admin", "password": "lab-password", "enable_password": "lab-enable", "port": 22},
        {"name": "firewall", "type": "Cisco virtual ASA Firewall", "ip": "192.168.100.2",
         "username": "admin", "password": "lab-password", "enable_password": "lab-enable", "port": 22},
        {"name": "switch", "type": "Cisco IOS Layer 2 virtual Switch", "ip": "192.168.100.3",
         "username": "admin", "password": "lab-password", "port": 22},
        {"name": "host", "type": "alpine virtual linux", "ip": "192.168.100.4",
         "username": "root", "password": "lab-password", "port": 22}
    ])
    .to_string()
}

/// L3 topology matching [`lab_devices`]
pub fn lab_topology() -> serde_json::Value {
    serde_json::json!({
        "nodes": ["router", "firewall", "switch", "host"],
        "links": [
            {"a": "router:Gi0/1", "b": "switch:Gi0/0", "subnet": "10.10.10.0/24"},
            {"a": "router:Gi0/2", "b": "firewall:outside", "subnet": "10.20.20.0/24"},
            {"a": "switch:Gi0/2", "b": "host:eth1", "subnet": "10.10.10.0/24"}
        ]
    })
}

/// `ping -c 4` style output with the given loss
pub fn ping_output(target: &str, loss_percent: u32) -> String {
    let received = 4 - (4 * loss_percent.min(100) / 100);
    format!(
        "PING {target} ({target}): 56 data bytes\n\n--- {target} ping statistics ---\n\
         4 packets transmitted, {received} packets received, {loss_percent}% packet loss"
    )
}

/// Oracle client over `backend` with no retry pause
pub fn scripted_client(backend: Arc<ScriptedBackend>) -> OracleClient {
    OracleClient::new(backend).with_retry_delay(Duration::ZERO)
}
