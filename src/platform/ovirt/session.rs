// ============================================================================
// File: packages/vm-backup/src/platform/ovirt/session.rs
// ----------------------------------------------------------------------------
// PlatformConnector / PlatformSession implementation for oVirt Engine.
//
// Operations are observed by polling the affected resource:
// - snapshot creation completes when `snapshot_status` becomes `ok`
// - clone completes when the VM leaves `image_locked`
// - export completes when the VM leaves `image_locked` and is listed in the
//   export domain
// - deletions complete when the resource answers 404
// ============================================================================

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Value, json};

use crate::platform::{
    CloneRequest, Cluster, Credentials, Disk, ExportedBackup, OperationHandle, OperationKind,
    OperationStatus, PlatformConnector, PlatformResult, PlatformSession, Snapshot,
    StorageDomain, Vm,
};

use super::api_client::{OvirtApiClient, search_query};
use super::api_types::{
    ClusterList, DiskAttachmentList, DiskList, IdRef, SnapshotList, SnapshotRepr,
    StorageDomainList, VmList, VmRepr,
};

/// Opens [`OvirtSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct OvirtConnector;

impl OvirtConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlatformConnector for OvirtConnector {
    async fn connect(&self, credentials: &Credentials) -> PlatformResult<Box<dyn PlatformSession>> {
        let client = OvirtApiClient::new(credentials)?;

        // The API root answers with product info; it validates URL and credentials.
        let _: Value = client.get("", "connect").await?;
        info!("Connected to {} as {}", client.base_url(), credentials.username);

        Ok(Box::new(OvirtSession { client }))
    }
}

/// Authenticated oVirt API session
#[derive(Debug, Clone)]
pub struct OvirtSession {
    client: OvirtApiClient,
}

impl OvirtSession {
    async fn vms_matching(&self, expression: &str, operation: &'static str) -> PlatformResult<Vec<VmRepr>> {
        let list: VmList = self
            .client
            .get(&format!("/vms?{}", search_query(expression)), operation)
            .await?;
        Ok(list.vm)
    }

    fn snapshot_path(snapshot: &Snapshot) -> String {
        format!("/vms/{}/snapshots/{}", snapshot.vm_id, snapshot.id)
    }

    async fn deletion_status(&self, handle: &OperationHandle) -> PlatformResult<OperationStatus> {
        let remaining: Option<Value> = self
            .client
            .get_optional(&handle.resource, "operation_status")
            .await?;
        Ok(match remaining {
            None => OperationStatus::Succeeded,
            Some(_) => OperationStatus::Pending,
        })
    }
}

/// Progress of a clone or export, judged by the VM it works on
fn lock_status(vm: Option<&VmRepr>) -> OperationStatus {
    match vm {
        None => OperationStatus::Failed("VM disappeared".to_string()),
        Some(vm) if vm.status.as_deref() == Some("image_locked") => OperationStatus::Pending,
        Some(_) => OperationStatus::Succeeded,
    }
}

/// A failed export only unlocks the VM; success means the domain lists it
fn export_status(vm_name: &str, exported: &VmList) -> OperationStatus {
    if exported.vm.iter().any(|vm| vm.name == vm_name) {
        OperationStatus::Succeeded
    } else {
        OperationStatus::Failed(format!("{vm_name} is not listed in the export domain"))
    }
}

#[async_trait]
impl PlatformSession for OvirtSession {
    async fn find_vm(&self, name: &str) -> PlatformResult<Option<Vm>> {
        let vms = self.vms_matching(&format!("name={name}"), "find_vm").await?;
        Ok(vms.into_iter().find(|vm| vm.name == name).map(Vm::from))
    }

    async fn search_vms(&self, prefix: &str) -> PlatformResult<Vec<Vm>> {
        let vms = self.vms_matching(&format!("name={prefix}*"), "search_vms").await?;
        Ok(vms
            .into_iter()
            .filter(|vm| vm.name.starts_with(prefix))
            .map(Vm::from)
            .collect())
    }

    async fn list_disks(&self, vm: &Vm) -> PlatformResult<Vec<Disk>> {
        let attachments: DiskAttachmentList = self
            .client
            .get(&format!("/vms/{}/diskattachments?follow=disk", vm.id), "list_disks")
            .await?;
        Ok(attachments
            .disk_attachment
            .into_iter()
            .map(|attachment| Disk::from(attachment.disk))
            .collect())
    }

    async fn list_snapshots(&self, vm: &Vm, description: &str) -> PlatformResult<Vec<Snapshot>> {
        let list: SnapshotList = self
            .client
            .get(&format!("/vms/{}/snapshots", vm.id), "list_snapshots")
            .await?;
        Ok(list
            .snapshot
            .into_iter()
            .filter(|s| s.description == description)
            .map(|s| s.into_snapshot(&vm.id))
            .collect())
    }

    async fn list_snapshot_disks(&self, snapshot: &Snapshot) -> PlatformResult<Vec<Disk>> {
        let list: DiskList = self
            .client
            .get(
                &format!("{}/disks", Self::snapshot_path(snapshot)),
                "list_snapshot_disks",
            )
            .await?;
        Ok(list.disk.into_iter().map(Disk::from).collect())
    }

    async fn create_snapshot(
        &self,
        vm: &Vm,
        description: &str,
        disks: &[Disk],
    ) -> PlatformResult<OperationHandle> {
        let attachments: Vec<Value> = disks
            .iter()
            .map(|disk| json!({ "disk": IdRef::new(disk.id.as_str()) }))
            .collect();
        let body = json!({
            "description": description,
            "persist_memorystate": false,
            "disk_attachments": { "disk_attachment": attachments },
        });

        let created: SnapshotRepr = self
            .client
            .post(&format!("/vms/{}/snapshots", vm.id), &body, "create_snapshot")
            .await?;
        let snapshot = created.into_snapshot(&vm.id);

        Ok(OperationHandle::new(
            OperationKind::CreateSnapshot,
            Self::snapshot_path(&snapshot),
        ))
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> PlatformResult<OperationHandle> {
        let path = Self::snapshot_path(snapshot);
        self.client.delete(&path, "delete_snapshot").await?;
        Ok(OperationHandle::new(OperationKind::DeleteSnapshot, path))
    }

    async fn create_vm_from_snapshot(
        &self,
        request: &CloneRequest,
    ) -> PlatformResult<OperationHandle> {
        let attachments: Vec<Value> = request
            .disks
            .iter()
            .map(|target| {
                let mut disk = json!({ "image_id": target.image_id });
                if let Some(domain) = &target.storage_domain {
                    disk["storage_domains"] =
                        json!({ "storage_domain": [IdRef::new(domain.id.as_str())] });
                }
                json!({ "disk": disk })
            })
            .collect();
        let body = json!({
            "name": request.name,
            "memory": request.memory,
            "cluster": IdRef::new(request.cluster.id.as_str()),
            "snapshots": { "snapshot": [IdRef::new(request.snapshot.id.as_str())] },
            "disk_attachments": { "disk_attachment": attachments },
        });

        let created: VmRepr = self
            .client
            .post("/vms?clone=true", &body, "create_vm_from_snapshot")
            .await?;
        debug!("Clone {} registered with id {}", created.name, created.id);

        Ok(OperationHandle::new(
            OperationKind::CreateVm,
            format!("/vms/{}", created.id),
        ))
    }

    async fn delete_vm(&self, vm: &Vm) -> PlatformResult<OperationHandle> {
        let path = format!("/vms/{}", vm.id);
        self.client.delete(&path, "delete_vm").await?;
        Ok(OperationHandle::new(OperationKind::DeleteVm, path))
    }

    async fn export_vm(&self, vm: &Vm, domain: &StorageDomain) -> PlatformResult<OperationHandle> {
        let body = json!({
            "storage_domain": IdRef::new(domain.id.as_str()),
            "exclusive": true,
            "discard_snapshots": true,
            "async": true,
        });
        self.client
            .post_action(&format!("/vms/{}/export", vm.id), &body, "export_vm")
            .await?;
        Ok(
            OperationHandle::new(OperationKind::ExportVm, format!("/vms/{}", vm.id))
                .with_outcome(format!("/storagedomains/{}/vms", domain.id)),
        )
    }

    async fn list_exports(&self, domain: &StorageDomain) -> PlatformResult<Vec<ExportedBackup>> {
        let list: VmList = self
            .client
            .get(&format!("/storagedomains/{}/vms", domain.id), "list_exports")
            .await?;
        Ok(list.vm.into_iter().map(ExportedBackup::from).collect())
    }

    async fn delete_export(
        &self,
        domain: &StorageDomain,
        export: &ExportedBackup,
    ) -> PlatformResult<OperationHandle> {
        let path = format!("/storagedomains/{}/vms/{}", domain.id, export.id);
        self.client.delete(&path, "delete_export").await?;
        Ok(OperationHandle::new(OperationKind::DeleteExport, path))
    }

    async fn find_storage_domain(&self, name: &str) -> PlatformResult<Option<StorageDomain>> {
        let list: StorageDomainList = self
            .client
            .get(
                &format!("/storagedomains?{}", search_query(&format!("name={name}"))),
                "find_storage_domain",
            )
            .await?;
        Ok(list.named(name))
    }

    async fn find_cluster(&self, name: &str) -> PlatformResult<Option<Cluster>> {
        let list: ClusterList = self
            .client
            .get(
                &format!("/clusters?{}", search_query(&format!("name={name}"))),
                "find_cluster",
            )
            .await?;
        Ok(list.named(name))
    }

    async fn operation_status(&self, handle: &OperationHandle) -> PlatformResult<OperationStatus> {
        match handle.kind {
            OperationKind::CreateSnapshot => {
                let snapshot: Option<SnapshotRepr> = self
                    .client
                    .get_optional(&handle.resource, "operation_status")
                    .await?;
                Ok(match snapshot {
                    None => OperationStatus::Failed("snapshot disappeared".to_string()),
                    Some(s) => match s.snapshot_status.as_deref() {
                        Some("ok") => OperationStatus::Succeeded,
                        Some("locked") | None => OperationStatus::Pending,
                        Some(other) => {
                            OperationStatus::Failed(format!("snapshot ended in state {other}"))
                        }
                    },
                })
            }
            OperationKind::CreateVm => {
                let vm: Option<VmRepr> = self
                    .client
                    .get_optional(&handle.resource, "operation_status")
                    .await?;
                Ok(lock_status(vm.as_ref()))
            }
            OperationKind::ExportVm => {
                let vm: Option<VmRepr> = self
                    .client
                    .get_optional(&handle.resource, "operation_status")
                    .await?;
                let Some(vm) = vm else {
                    return Ok(lock_status(None));
                };
                match (lock_status(Some(&vm)), &handle.outcome) {
                    (OperationStatus::Succeeded, Some(listing)) => {
                        let exported: VmList = self.client.get(listing, "operation_status").await?;
                        Ok(export_status(&vm.name, &exported))
                    }
                    (status, _) => Ok(status),
                }
            }
            OperationKind::DeleteSnapshot
            | OperationKind::DeleteVm
            | OperationKind::DeleteExport => self.deletion_status(handle).await,
        }
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        // Basic auth keeps no server-side session to tear down.
        debug!("Disconnected from {}", self.client.base_url());
        Ok(())
    }
}
