// ============================================================================
// File: packages/vm-backup/src/platform/memory.rs
// ----------------------------------------------------------------------------
// In-memory platform used by the test suites.
//
// Mutating operations take effect immediately and report `Succeeded` on the
// first status query, unless the operation kind was scripted to fail or to
// hang. Every call is recorded so tests can assert on the exact traffic.
// ============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::{PlatformError, PlatformResult};
use super::trait_def::{PlatformConnector, PlatformSession};
use super::types::{
    CloneRequest, Cluster, Credentials, Disk, ExportedBackup, OperationHandle, OperationKind,
    OperationStatus, Snapshot, StorageDomain, Vm,
};

/// 2026-01-01T00:00:00Z
const EPOCH_BASE: i64 = 1_767_225_600;

const MUTATING_CALLS: &[&str] = &[
    "create_snapshot",
    "delete_snapshot",
    "create_vm_from_snapshot",
    "delete_vm",
    "export_vm",
    "delete_export",
];

/// One recorded platform call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: &'static str,
    pub target: String,
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        MUTATING_CALLS.contains(&self.name)
    }
}

#[derive(Debug)]
struct StoredSnapshot {
    snapshot: Snapshot,
    disks: Vec<Disk>,
}

#[derive(Debug)]
struct StoredVm {
    vm: Vm,
    disks: Vec<Disk>,
    snapshots: Vec<StoredSnapshot>,
}

#[derive(Debug, Default)]
struct State {
    vms: Vec<StoredVm>,
    clusters: Vec<Cluster>,
    domains: Vec<StorageDomain>,
    exports: HashMap<String, Vec<ExportedBackup>>,
    operations: HashMap<String, OperationStatus>,
    failing: HashMap<OperationKind, String>,
    hanging: HashSet<OperationKind>,
    scripted: HashMap<&'static str, VecDeque<PlatformError>>,
    domain_removals: HashMap<&'static str, String>,
    hide_created_snapshots: bool,
    clone_requests: Vec<CloneRequest>,
    calls: Vec<Call>,
    connects: u32,
    next_id: u64,
    clock: i64,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(EPOCH_BASE + self.clock, 0).unwrap_or_default()
    }

    fn record(&mut self, name: &'static str, target: &str) -> PlatformResult<()> {
        self.calls.push(Call {
            name,
            target: target.to_string(),
        });
        if let Some(domain) = self.domain_removals.remove(name) {
            self.domains.retain(|existing| existing.name != domain);
        }
        match self.scripted.get_mut(name).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Decide how a submitted operation ends; `true` means apply its effect
    fn submit(&mut self, kind: OperationKind) -> (OperationHandle, bool) {
        let resource = self.id("op");
        let (status, apply) = if self.hanging.contains(&kind) {
            (OperationStatus::Pending, false)
        } else if let Some(details) = self.failing.get(&kind) {
            (OperationStatus::Failed(details.clone()), false)
        } else {
            (OperationStatus::Succeeded, true)
        };
        self.operations.insert(resource.clone(), status);
        (OperationHandle::new(kind, resource), apply)
    }

    fn vm_mut(&mut self, vm_id: &str) -> Option<&mut StoredVm> {
        self.vms.iter_mut().find(|stored| stored.vm.id == vm_id)
    }
}

/// Shared in-memory platform; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlatform {
    state: Arc<Mutex<State>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("in-memory platform state poisoned")
    }

    /// Open a session without going through the connector
    pub fn session(&self) -> InMemorySession {
        InMemorySession {
            platform: self.clone(),
        }
    }

    pub fn add_vm(&self, name: &str, memory: u64, disks: &[&str]) -> Vm {
        let mut state = self.state();
        let vm = Vm {
            id: state.id("vm"),
            name: name.to_string(),
            memory,
        };
        let disks = disks
            .iter()
            .map(|disk| Disk {
                id: state.id("disk"),
                name: disk.to_string(),
            })
            .collect();
        state.vms.push(StoredVm {
            vm: vm.clone(),
            disks,
            snapshots: Vec::new(),
        });
        vm
    }

    pub fn add_cluster(&self, name: &str) -> Cluster {
        let mut state = self.state();
        let cluster = Cluster {
            id: state.id("cluster"),
            name: name.to_string(),
        };
        state.clusters.push(cluster.clone());
        cluster
    }

    pub fn add_domain(&self, name: &str) -> StorageDomain {
        let mut state = self.state();
        let domain = StorageDomain {
            id: state.id("sd"),
            name: name.to_string(),
        };
        state.domains.push(domain.clone());
        domain
    }

    /// Place a snapshot on an existing VM, as a crashed earlier run would leave it
    pub fn add_snapshot(&self, vm_name: &str, description: &str) -> Option<Snapshot> {
        let mut state = self.state();
        let created_at = state.tick();
        let id = state.id("snap");
        let stored = state.vms.iter_mut().find(|stored| stored.vm.name == vm_name)?;
        let snapshot = Snapshot {
            id,
            vm_id: stored.vm.id.clone(),
            description: description.to_string(),
            created_at,
        };
        let disks = stored.disks.clone();
        stored.snapshots.push(StoredSnapshot {
            snapshot: snapshot.clone(),
            disks,
        });
        Some(snapshot)
    }

    pub fn add_export(
        &self,
        domain_name: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Option<ExportedBackup> {
        let mut state = self.state();
        let domain_id = state
            .domains
            .iter()
            .find(|domain| domain.name == domain_name)?
            .id
            .clone();
        let export = ExportedBackup {
            id: state.id("exp"),
            name: name.to_string(),
            created_at,
        };
        state
            .exports
            .entry(domain_id)
            .or_default()
            .push(export.clone());
        Some(export)
    }

    /// Make every operation of `kind` end in failure
    pub fn fail<D: Into<String>>(&self, kind: OperationKind, details: D) {
        self.state().failing.insert(kind, details.into());
    }

    /// Make every operation of `kind` stay pending forever
    pub fn hang(&self, kind: OperationKind) {
        self.state().hanging.insert(kind);
    }

    /// Make the next call named `call` return `err`
    pub fn fail_next_call(&self, call: &'static str, err: PlatformError) {
        self.state().scripted.entry(call).or_default().push_back(err);
    }

    /// Remove storage domain `domain` when the next call named `call` arrives
    pub fn remove_domain_on(&self, call: &'static str, domain: &str) {
        self.state()
            .domain_removals
            .insert(call, domain.to_string());
    }

    /// Report snapshot creation as successful without the snapshot appearing
    pub fn hide_created_snapshots(&self) {
        self.state().hide_created_snapshots = true;
    }

    /// Make the next call named `call` lose the connection
    pub fn drop_connection_on(&self, call: &'static str) {
        self.fail_next_call(
            call,
            PlatformError::connection("memory://platform", "connection reset by peer"),
        );
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.state()
            .vms
            .iter()
            .map(|stored| stored.vm.name.clone())
            .collect()
    }

    pub fn has_vm(&self, name: &str) -> bool {
        self.state().vms.iter().any(|stored| stored.vm.name == name)
    }

    pub fn snapshots_of(&self, vm_name: &str) -> Vec<Snapshot> {
        self.state()
            .vms
            .iter()
            .find(|stored| stored.vm.name == vm_name)
            .map(|stored| {
                stored
                    .snapshots
                    .iter()
                    .map(|s| s.snapshot.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn exports_in(&self, domain_name: &str) -> Vec<ExportedBackup> {
        let state = self.state();
        state
            .domains
            .iter()
            .find(|domain| domain.name == domain_name)
            .and_then(|domain| state.exports.get(&domain.id))
            .cloned()
            .unwrap_or_default()
    }

    /// Every clone request received, in order
    pub fn clone_requests(&self) -> Vec<CloneRequest> {
        self.state().clone_requests.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }
}

#[async_trait]
impl PlatformConnector for InMemoryPlatform {
    async fn connect(&self, credentials: &Credentials) -> PlatformResult<Box<dyn PlatformSession>> {
        {
            let mut state = self.state();
            state.connects += 1;
            state.record("connect", &credentials.url)?;
        }
        Ok(Box::new(self.session()))
    }
}

/// Session over an [`InMemoryPlatform`]
#[derive(Debug, Clone)]
pub struct InMemorySession {
    platform: InMemoryPlatform,
}

#[async_trait]
impl PlatformSession for InMemorySession {
    async fn find_vm(&self, name: &str) -> PlatformResult<Option<Vm>> {
        let mut state = self.platform.state();
        state.record("find_vm", name)?;
        Ok(state
            .vms
            .iter()
            .find(|stored| stored.vm.name == name)
            .map(|stored| stored.vm.clone()))
    }

    async fn search_vms(&self, prefix: &str) -> PlatformResult<Vec<Vm>> {
        let mut state = self.platform.state();
        state.record("search_vms", prefix)?;
        Ok(state
            .vms
            .iter()
            .filter(|stored| stored.vm.name.starts_with(prefix))
            .map(|stored| stored.vm.clone())
            .collect())
    }

    async fn list_disks(&self, vm: &Vm) -> PlatformResult<Vec<Disk>> {
        let mut state = self.platform.state();
        state.record("list_disks", &vm.name)?;
        state
            .vm_mut(&vm.id)
            .map(|stored| stored.disks.clone())
            .ok_or_else(|| PlatformError::request("list_disks", 404, "VM not found"))
    }

    async fn list_snapshots(&self, vm: &Vm, description: &str) -> PlatformResult<Vec<Snapshot>> {
        let mut state = self.platform.state();
        state.record("list_snapshots", &vm.name)?;
        let stored = state
            .vm_mut(&vm.id)
            .ok_or_else(|| PlatformError::request("list_snapshots", 404, "VM not found"))?;
        Ok(stored
            .snapshots
            .iter()
            .filter(|s| s.snapshot.description == description)
            .map(|s| s.snapshot.clone())
            .collect())
    }

    async fn list_snapshot_disks(&self, snapshot: &Snapshot) -> PlatformResult<Vec<Disk>> {
        let mut state = self.platform.state();
        state.record("list_snapshot_disks", &snapshot.id)?;
        state
            .vm_mut(&snapshot.vm_id)
            .and_then(|stored| {
                stored
                    .snapshots
                    .iter()
                    .find(|s| s.snapshot.id == snapshot.id)
                    .map(|s| s.disks.clone())
            })
            .ok_or_else(|| PlatformError::request("list_snapshot_disks", 404, "snapshot not found"))
    }

    async fn create_snapshot(
        &self,
        vm: &Vm,
        description: &str,
        disks: &[Disk],
    ) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("create_snapshot", &vm.name)?;
        let (handle, apply) = state.submit(OperationKind::CreateSnapshot);
        if apply && !state.hide_created_snapshots {
            let created_at = state.tick();
            let id = state.id("snap");
            let stored = state
                .vm_mut(&vm.id)
                .ok_or_else(|| PlatformError::request("create_snapshot", 404, "VM not found"))?;
            stored.snapshots.push(StoredSnapshot {
                snapshot: Snapshot {
                    id,
                    vm_id: vm.id.clone(),
                    description: description.to_string(),
                    created_at,
                },
                disks: disks.to_vec(),
            });
        }
        Ok(handle)
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("delete_snapshot", &snapshot.id)?;
        let (handle, apply) = state.submit(OperationKind::DeleteSnapshot);
        if apply && let Some(stored) = state.vm_mut(&snapshot.vm_id) {
            stored.snapshots.retain(|s| s.snapshot.id != snapshot.id);
        }
        Ok(handle)
    }

    async fn create_vm_from_snapshot(
        &self,
        request: &CloneRequest,
    ) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("create_vm_from_snapshot", &request.name)?;
        state.clone_requests.push(request.clone());
        if state.vms.iter().any(|stored| stored.vm.name == request.name) {
            return Err(PlatformError::request(
                "create_vm_from_snapshot",
                409,
                format!("VM name {} is already in use", request.name),
            ));
        }
        let (handle, apply) = state.submit(OperationKind::CreateVm);
        if apply {
            let vm = Vm {
                id: state.id("vm"),
                name: request.name.clone(),
                memory: request.memory,
            };
            let disks = request
                .disks
                .iter()
                .map(|target| Disk {
                    id: target.image_id.clone(),
                    name: target.image_id.clone(),
                })
                .collect();
            state.vms.push(StoredVm {
                vm,
                disks,
                snapshots: Vec::new(),
            });
        }
        Ok(handle)
    }

    async fn delete_vm(&self, vm: &Vm) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("delete_vm", &vm.name)?;
        let (handle, apply) = state.submit(OperationKind::DeleteVm);
        if apply {
            state.vms.retain(|stored| stored.vm.id != vm.id);
        }
        Ok(handle)
    }

    async fn export_vm(&self, vm: &Vm, domain: &StorageDomain) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("export_vm", &vm.name)?;
        let (handle, apply) = state.submit(OperationKind::ExportVm);
        if apply {
            let export = ExportedBackup {
                id: state.id("exp"),
                name: vm.name.clone(),
                created_at: state.tick(),
            };
            let exports = state.exports.entry(domain.id.clone()).or_default();
            exports.retain(|existing| existing.name != export.name);
            exports.push(export);
        }
        Ok(handle)
    }

    async fn list_exports(&self, domain: &StorageDomain) -> PlatformResult<Vec<ExportedBackup>> {
        let mut state = self.platform.state();
        state.record("list_exports", &domain.name)?;
        Ok(state.exports.get(&domain.id).cloned().unwrap_or_default())
    }

    async fn delete_export(
        &self,
        domain: &StorageDomain,
        export: &ExportedBackup,
    ) -> PlatformResult<OperationHandle> {
        let mut state = self.platform.state();
        state.record("delete_export", &export.name)?;
        let (handle, apply) = state.submit(OperationKind::DeleteExport);
        if apply && let Some(exports) = state.exports.get_mut(&domain.id) {
            exports.retain(|existing| existing.id != export.id);
        }
        Ok(handle)
    }

    async fn find_storage_domain(&self, name: &str) -> PlatformResult<Option<StorageDomain>> {
        let mut state = self.platform.state();
        state.record("find_storage_domain", name)?;
        Ok(state.domains.iter().find(|d| d.name == name).cloned())
    }

    async fn find_cluster(&self, name: &str) -> PlatformResult<Option<Cluster>> {
        let mut state = self.platform.state();
        state.record("find_cluster", name)?;
        Ok(state.clusters.iter().find(|c| c.name == name).cloned())
    }

    async fn operation_status(&self, handle: &OperationHandle) -> PlatformResult<OperationStatus> {
        let mut state = self.platform.state();
        state.record("operation_status", &handle.resource)?;
        state.operations.get(&handle.resource).cloned().ok_or_else(|| {
            PlatformError::unexpected("operation_status", format!("unknown handle {}", handle.resource))
        })
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        self.platform.state().record("disconnect", "")
    }
}
