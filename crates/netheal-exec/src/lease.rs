//! Per-device exclusive leases
//!
//! Two batches never run on the same device at once. A batch holds the
//! device's lease from connect to close; the lease is released on drop, so
//! early returns and panics in the holder free it as well.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lease table keyed by device name
#[derive(Debug, Default)]
pub struct DeviceLeases {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `device`
    pub async fn acquire(&self, device: &str) -> DeviceLease {
        let lock = self
            .locks
            .entry(device.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        tracing::trace!(device, "lease acquired");
        DeviceLease {
            device: device.to_string(),
            _guard: guard,
        }
    }

    /// Non-blocking attempt; `None` when another batch holds the device
    pub fn try_acquire(&self, device: &str) -> Option<DeviceLease> {
        let lock = self
            .locks
            .entry(device.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.try_lock_owned().ok()?;
        Some(DeviceLease {
            device: device.to_string(),
            _guard: guard,
        })
    }
}

/// Held while a batch owns a device
#[derive(Debug)]
pub struct DeviceLease {
    device: String,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceLease {
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        tracing::trace!(device = %self.device, "lease released");
    }
}
