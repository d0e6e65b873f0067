//! netheal-exec - device access for the fault-triage loop
//!
//! Provides:
//! - The device registry (name -> kind, address, credentials)
//! - Per-kind command executors behind one [`CommandExecutor`] trait
//! - An OpenSSH transport and the [`Connector`] seam tests substitute
//! - Per-device leases and an append-only session log
//!
//! # Example
//!
//! ```rust,ignore
//! use netheal_exec::prelude::*;
//!
//! let registry = DeviceRegistry::load("data/input/devices.json".as_ref())?;
//! let fleet = FleetExecutor::new(
//!     Arc::new(OpenSshConnector::new()),
//!     Arc::new(DeviceLeases::new()),
//! );
//! let device = registry.lookup("R1")?;
//! let outcome = fleet
//!     .run(device, &["show ip route".to_string()], ExecTimeouts::default())
//!     .await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod device;
pub mod error;
pub mod executor;
pub mod lease;
pub mod result;
pub mod session;
pub mod session_log;
pub mod ssh;

pub use device::{Credentials, DeviceDescriptor, DeviceKind, DeviceRegistry};
pub use error::{ConnectionFailure, ExecError};
pub use executor::{CommandExecutor, FleetExecutor, PrivilegedExecutor, ShellExecutor};
pub use lease::{DeviceLease, DeviceLeases};
pub use result::{parse_sleep, BatchOutcome, CommandResult, ExecTimeouts};
pub use session::{Connector, ExecOutput, Session};
pub use session_log::{SessionLog, SessionRecord};
pub use ssh::OpenSshConnector;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running commands on devices
    pub use crate::{
        BatchOutcome, CommandExecutor, CommandResult, DeviceDescriptor, DeviceKind, DeviceLeases,
        DeviceRegistry, ExecTimeouts, FleetExecutor, OpenSshConnector,
    };
}
