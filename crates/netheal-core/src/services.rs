//! Handles shared by every stage of the loop

use std::sync::Arc;

use netheal_exec::{CommandExecutor, DeviceRegistry, ExecTimeouts};
use netheal_oracle::OracleClient;

use crate::checkpoint::CheckpointStore;

/// Cheap to clone; every field is shared
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<DeviceRegistry>,
    pub executor: Arc<dyn CommandExecutor>,
    pub oracle: OracleClient,
    pub checkpoints: Arc<CheckpointStore>,
    pub timeouts: ExecTimeouts,
    /// Upper bound for every fan-out pool
    pub fleet_cap: usize,
}

impl Services {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        executor: Arc<dyn CommandExecutor>,
        oracle: OracleClient,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            registry,
            executor,
            oracle,
            checkpoints,
            timeouts: ExecTimeouts::default(),
            fleet_cap: 16,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ExecTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_fleet_cap(mut self, cap: usize) -> Self {
        self.fleet_cap = cap;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("devices", &self.registry.len())
            .field("oracle", &self.oracle)
            .field("checkpoints", &self.checkpoints.root())
            .field("timeouts", &self.timeouts)
            .field("fleet_cap", &self.fleet_cap)
            .finish_non_exhaustive()
    }
}
