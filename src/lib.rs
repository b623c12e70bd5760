// ============================================================================
// File: packages/vm-backup/src/lib.rs
// ----------------------------------------------------------------------------
// Unattended VM backups through a virtualization management platform.
//
// Each configured VM is snapshotted, cloned from the snapshot, and the clone
// is exported to an export domain; snapshots and clones are always removed
// and old exports are pruned to a retention count.
// ============================================================================

pub mod config;
pub mod naming;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod retention;

pub use config::{BackupPolicy, ConfigError, ConfigResult, PolicyBuilder};
pub use naming::{NameGenerator, NameTooLong, RunSuffix};
pub use orchestrator::{BackupOrchestrator, BackupStep, RunError};
pub use platform::ovirt::OvirtConnector;
pub use platform::{PlatformConnector, PlatformError, PlatformResult, PlatformSession};
pub use report::{RunReport, VmOutcome, VmReport};
pub use retention::{RetentionSweeper, SweepError};
