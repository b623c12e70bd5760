// ============================================================================
// File: packages/vm-backup/src/platform/types.rs
// ----------------------------------------------------------------------------
// Platform entities and long-running operation types
// ============================================================================

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection parameters for the platform control API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Base URL of the API
    pub url: String,

    /// Login name, including any authentication domain
    pub username: String,

    /// Login password
    pub password: String,

    /// Skip TLS certificate and hostname verification
    pub insecure: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Virtual machine as known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    /// Platform identifier
    pub id: String,

    /// Cluster-unique name
    pub name: String,

    /// Memory size in bytes
    pub memory: u64,
}

/// Disk attached to a VM or captured in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
}

/// Point-in-time capture of a VM's disks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,

    /// VM the snapshot belongs to
    pub vm_id: String,

    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDomain {
    pub id: String,
    pub name: String,
}

/// Exported VM residing in an export domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedBackup {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Placement of one snapshot disk image in the clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTarget {
    /// Disk image taken from the snapshot
    pub image_id: String,

    /// Storage domain to materialize the image on; `None` keeps the source domain
    pub storage_domain: Option<StorageDomain>,
}

/// Create-VM-from-snapshot request
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub name: String,
    pub memory: u64,
    pub cluster: Cluster,
    pub snapshot: Snapshot,
    pub disks: Vec<DiskTarget>,
}

/// Kind of long-running platform operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateSnapshot,
    DeleteSnapshot,
    CreateVm,
    DeleteVm,
    ExportVm,
    DeleteExport,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSnapshot => "create_snapshot",
            Self::DeleteSnapshot => "delete_snapshot",
            Self::CreateVm => "create_vm_from_snapshot",
            Self::DeleteVm => "delete_vm",
            Self::ExportVm => "export_vm",
            Self::DeleteExport => "delete_export",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a submitted operation
///
/// `resource` and `outcome` are opaque to callers; the client that issued
/// the handle knows how to observe the operation through them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle {
    pub kind: OperationKind,
    pub resource: String,

    /// Where the result must show up once `resource` settles, if elsewhere
    pub outcome: Option<String>,
}

impl OperationHandle {
    pub fn new<R: Into<String>>(kind: OperationKind, resource: R) -> Self {
        Self {
            kind,
            resource: resource.into(),
            outcome: None,
        }
    }

    pub fn with_outcome<O: Into<String>>(mut self, outcome: O) -> Self {
        self.outcome = Some(outcome.into());
        self
    }
}

/// Observed state of an operation at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed(String),
}

/// Final state of an operation after polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
}
