// ============================================================================
// File: packages/vm-backup/src/platform/trait_def.rs
// ----------------------------------------------------------------------------
// PlatformConnector / PlatformSession trait definitions
// ============================================================================

use async_trait::async_trait;

use super::errors::PlatformResult;
use super::types::{
    CloneRequest, Cluster, Credentials, Disk, ExportedBackup, OperationHandle, OperationStatus,
    Snapshot, StorageDomain, Vm,
};

/// Opens sessions against the virtualization control plane
///
/// The orchestrator owns the connector for the whole run and asks it for a
/// fresh session whenever the current one is lost.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Authenticate and open a new session
    async fn connect(&self, credentials: &Credentials) -> PlatformResult<Box<dyn PlatformSession>>;
}

/// Authenticated session against the virtualization control plane
///
/// Mutating calls only submit work and return an [`OperationHandle`];
/// completion is observed through [`PlatformSession::operation_status`]
/// (see [`crate::platform::poll`]).
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Look up a VM by exact name
    async fn find_vm(&self, name: &str) -> PlatformResult<Option<Vm>>;

    /// List VMs whose name starts with `prefix`
    async fn search_vms(&self, prefix: &str) -> PlatformResult<Vec<Vm>>;

    /// Disks currently attached to `vm`, in platform order
    async fn list_disks(&self, vm: &Vm) -> PlatformResult<Vec<Disk>>;

    /// Snapshots of `vm` whose description equals `description`
    async fn list_snapshots(&self, vm: &Vm, description: &str) -> PlatformResult<Vec<Snapshot>>;

    /// Disk images captured in `snapshot`
    async fn list_snapshot_disks(&self, snapshot: &Snapshot) -> PlatformResult<Vec<Disk>>;

    async fn create_snapshot(
        &self,
        vm: &Vm,
        description: &str,
        disks: &[Disk],
    ) -> PlatformResult<OperationHandle>;

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> PlatformResult<OperationHandle>;

    /// Materialize a standalone VM from a snapshot, collapsing its disk chain
    async fn create_vm_from_snapshot(&self, request: &CloneRequest)
    -> PlatformResult<OperationHandle>;

    async fn delete_vm(&self, vm: &Vm) -> PlatformResult<OperationHandle>;

    async fn export_vm(&self, vm: &Vm, domain: &StorageDomain) -> PlatformResult<OperationHandle>;

    /// Exported VMs residing in `domain`, in the domain's listing order
    async fn list_exports(&self, domain: &StorageDomain) -> PlatformResult<Vec<ExportedBackup>>;

    async fn delete_export(
        &self,
        domain: &StorageDomain,
        export: &ExportedBackup,
    ) -> PlatformResult<OperationHandle>;

    async fn find_storage_domain(&self, name: &str) -> PlatformResult<Option<StorageDomain>>;

    async fn find_cluster(&self, name: &str) -> PlatformResult<Option<Cluster>>;

    /// Current state of a submitted operation
    async fn operation_status(&self, handle: &OperationHandle) -> PlatformResult<OperationStatus>;

    /// Release the session
    async fn disconnect(&self) -> PlatformResult<()>;
}
