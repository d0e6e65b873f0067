//! Device descriptors and the fleet registry
//!
//! The registry is a JSON array of device records. Field names follow the
//! lab inventory format (`name`, `type`, `ip`, `username`, `password`,
//! `enable_password`, `port`); the kind label is normalized on load so that
//! both short forms (`router`, `asa`, `linux`) and the long inventory labels
//! ("Cisco IOS virtual Router") are accepted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Broad class of a device, which selects its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// IOS-style router CLI
    NetworkIos,
    /// ASA-style firewall CLI
    NetworkAsa,
    /// IOS-style layer 2 switch CLI
    NetworkSwitch,
    /// Generic Linux host reached over a shell
    LinuxHost,
}

impl DeviceKind {
    /// All kinds, in registry listing order
    pub const ALL: [Self; 4] = [
        Self::NetworkIos,
        Self::NetworkAsa,
        Self::NetworkSwitch,
        Self::LinuxHost,
    ];

    /// Network CLI kinds need privileged mode before any command
    #[inline]
    #[must_use]
    pub fn requires_privilege(self) -> bool {
        !matches!(self, Self::LinuxHost)
    }

    /// Command that disables output paging, if the kind pages
    #[must_use]
    pub fn paging_command(self) -> Option<&'static str> {
        match self {
            Self::NetworkAsa => Some("terminal pager 0"),
            Self::NetworkIos | Self::NetworkSwitch => Some("terminal length 0"),
            Self::LinuxHost => None,
        }
    }

    /// Cheap liveness probe used by `labcheck`
    #[must_use]
    pub fn probe_command(self) -> &'static str {
        match self {
            Self::NetworkAsa => "show version | include up",
            Self::NetworkIos | Self::NetworkSwitch => "show version | include uptime",
            Self::LinuxHost => "uname -a",
        }
    }

    /// Stable short label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkIos => "network-ios",
            Self::NetworkAsa => "network-asa",
            Self::NetworkSwitch => "network-switch",
            Self::LinuxHost => "linux-host",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ExecError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let lower = label.trim().to_ascii_lowercase();
        let kind = if lower.contains("asa") || lower.contains("firewall") {
            Self::NetworkAsa
        } else if lower.contains("switch") {
            Self::NetworkSwitch
        } else if lower.contains("router") || lower.contains("ios") {
            Self::NetworkIos
        } else if lower.contains("linux") || lower.contains("alpine") || lower.contains("host") {
            Self::LinuxHost
        } else {
            return Err(ExecError::UnknownDeviceKind(label.to_string()));
        };
        Ok(kind)
    }
}

/// Login material for a device. `Debug` never prints secrets.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing)]
    pub enable_secret: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "enable_secret",
                &self.enable_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("key_file", &self.key_file)
            .finish()
    }
}

/// One managed device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub kind: DeviceKind,
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl DeviceDescriptor {
    /// Create a descriptor with default port and empty credentials
    pub fn new(name: impl Into<String>, kind: DeviceKind, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            address: address.into(),
            port: 22,
            credentials: Credentials::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Inventory record as it appears on disk
#[derive(Debug, Deserialize)]
struct RegistryRecord {
    name: String,
    #[serde(alias = "type")]
    kind: String,
    #[serde(alias = "ip", alias = "host")]
    address: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "enable_password", alias = "secret")]
    enable_secret: Option<String>,
    #[serde(default)]
    key_file: Option<PathBuf>,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_port() -> u16 {
    22
}

impl TryFrom<RegistryRecord> for DeviceDescriptor {
    type Error = ExecError;

    fn try_from(record: RegistryRecord) -> Result<Self, Self::Error> {
        let kind = record.kind.parse()?;
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.is_empty());
        Ok(Self {
            name: record.name,
            kind,
            address: record.address,
            port: record.port,
            credentials: Credentials {
                username: record.username,
                password: blank_to_none(record.password),
                enable_secret: blank_to_none(record.enable_secret),
                key_file: record.key_file,
            },
        })
    }
}

/// Name-indexed fleet registry, preserving file order
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: IndexMap<String, DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Build from descriptors; duplicate names are rejected
    ///
    /// # Errors
    /// `ExecError::Registry` on a duplicate device name.
    pub fn from_devices(
        devices: impl IntoIterator<Item = DeviceDescriptor>,
    ) -> Result<Self, ExecError> {
        let mut map = IndexMap::new();
        for device in devices {
            if map.contains_key(&device.name) {
                return Err(ExecError::Registry(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
            map.insert(device.name.clone(), device);
        }
        Ok(Self { devices: map })
    }

    /// Parse a registry document
    ///
    /// # Errors
    /// `ExecError::Registry` for malformed JSON, `ExecError::UnknownDeviceKind`
    /// for an unrecognized type label.
    pub fn from_json(text: &str) -> Result<Self, ExecError> {
        let records: Vec<RegistryRecord> =
            serde_json::from_str(text).map_err(|e| ExecError::Registry(e.to_string()))?;
        let devices = records
            .into_iter()
            .map(DeviceDescriptor::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_devices(devices)
    }

    /// Load a registry file
    ///
    /// # Errors
    /// I/O or parse failure.
    pub fn load(path: &Path) -> Result<Self, ExecError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExecError::Registry(format!("cannot read {}: {e}", path.display()))
        })?;
        let registry = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), devices = registry.len(), "registry loaded");
        Ok(registry)
    }

    /// Look a device up by name
    ///
    /// # Errors
    /// `ExecError::DeviceNotFound` if the name is unknown.
    pub fn lookup(&self, name: &str) -> Result<&DeviceDescriptor, ExecError> {
        self.devices
            .get(name)
            .ok_or_else(|| ExecError::DeviceNotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"[
        {"name": "R1", "type": "Cisco IOS virtual Router", "ip": "10.0.0.1",
         "username": "admin", "password": "pw", "enable_password": "en", "port": 22},
        {"name": "FW", "type": "Cisco virtual ASA Firewall", "ip": "10.0.0.2",
         "username": "admin", "password": "pw", "enable_password": ""},
        {"name": "SW1", "type": "Cisco IOS Layer 2 virtual Switch", "ip": "10.0.0.3",
         "username": "admin"},
        {"name": "srv", "type": "alpine virtual linux", "ip": "10.0.0.4",
         "username": "root", "password": "pw", "port": 2222}
    ]"#;

    #[test]
    fn test_inventory_labels_normalize() {
        let registry = DeviceRegistry::from_json(INVENTORY).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.lookup("R1").unwrap().kind, DeviceKind::NetworkIos);
        assert_eq!(registry.lookup("FW").unwrap().kind, DeviceKind::NetworkAsa);
        assert_eq!(registry.lookup("SW1").unwrap().kind, DeviceKind::NetworkSwitch);
        let srv = registry.lookup("srv").unwrap();
        assert_eq!(srv.kind, DeviceKind::LinuxHost);
        assert_eq!(srv.port, 2222);
    }

    #[test]
    fn test_empty_enable_secret_is_none() {
        let registry = DeviceRegistry::from_json(INVENTORY).unwrap();
        let fw = registry.lookup("FW").unwrap();
        assert!(fw.credentials.enable_secret.is_none());
        assert_eq!(fw.port, 22);
    }

    #[test]
    fn test_lookup_unknown_device() {
        let registry = DeviceRegistry::from_json(INVENTORY).unwrap();
        let err = registry.lookup("R9").unwrap_err();
        assert!(matches!(err, ExecError::DeviceNotFound(name) if name == "R9"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let devices = vec![
            DeviceDescriptor::new("A", DeviceKind::LinuxHost, "1.1.1.1"),
            DeviceDescriptor::new("A", DeviceKind::NetworkIos, "1.1.1.2"),
        ];
        assert!(matches!(
            DeviceRegistry::from_devices(devices),
            Err(ExecError::Registry(_))
        ));
    }

    #[test]
    fn test_unknown_kind_label() {
        let err = "toaster".parse::<DeviceKind>().unwrap_err();
        assert!(matches!(err, ExecError::UnknownDeviceKind(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let registry = DeviceRegistry::from_json(INVENTORY).unwrap();
        let rendered = format!("{:?}", registry.lookup("R1").unwrap());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"pw\""));
        assert!(!rendered.contains("\"en\""));
    }

    #[test]
    fn test_serialized_descriptor_omits_secrets() {
        let registry = DeviceRegistry::from_json(INVENTORY).unwrap();
        let json = serde_json::to_string(registry.lookup("R1").unwrap()).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("enable_secret"));
        assert!(json.contains("network-ios"));
    }

    #[test]
    fn test_kind_capabilities() {
        assert!(!DeviceKind::LinuxHost.requires_privilege());
        assert_eq!(DeviceKind::NetworkAsa.paging_command(), Some("terminal pager 0"));
        assert_eq!(DeviceKind::NetworkSwitch.paging_command(), Some("terminal length 0"));
        assert_eq!(DeviceKind::LinuxHost.paging_command(), None);
    }
}
