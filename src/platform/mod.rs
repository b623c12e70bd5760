// ============================================================================
// File: packages/vm-backup/src/platform/mod.rs
// ----------------------------------------------------------------------------
// Virtualization platform boundary.
//
// Provides the contract the backup orchestrator drives:
// - PlatformConnector / PlatformSession traits for lookups and mutations
// - Entity and long-running-operation types
// - Submit-then-poll helper with a fixed interval and overall deadline
// - oVirt Engine REST implementation
// ============================================================================

mod errors;
mod poll;
mod trait_def;
mod types;

pub mod ovirt;

#[cfg(test)]
pub(crate) mod memory;

pub use errors::{PlatformError, PlatformResult};
pub use poll::{PollSettings, poll};
pub use trait_def::{PlatformConnector, PlatformSession};
pub use types::{
    CloneRequest, Cluster, Credentials, Disk, DiskTarget, ExportedBackup, OperationHandle,
    OperationKind, OperationStatus, Snapshot, StorageDomain, TerminalStatus, Vm,
};
