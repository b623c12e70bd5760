//! oVirt Engine REST API (v4, JSON) request/response types

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::platform::types::{Cluster, Disk, ExportedBackup, Snapshot, StorageDomain, Vm};

/// The engine renders some numbers as JSON strings; accept both
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(i64),
    Text(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => u64::try_from(n).map_err(de::Error::custom),
        Lenient::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

/// Epoch milliseconds to UTC timestamp
fn lenient_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let millis = match Option::<Lenient>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Lenient::Number(n)) => n,
        Some(Lenient::Text(s)) => s.parse::<i64>().map_err(de::Error::custom)?,
    };
    Ok(DateTime::from_timestamp_millis(millis))
}

/// Error body returned with non-2xx responses
#[derive(Debug, Default, Deserialize)]
pub struct Fault {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Fault {
    pub fn message(&self) -> Option<String> {
        match (&self.reason, &self.detail) {
            (Some(reason), Some(detail)) => Some(format!("{reason} {detail}")),
            (Some(text), None) | (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        }
    }
}

/// API: GET /vms, GET /storagedomains/{id}/vms
#[derive(Debug, Default, Deserialize)]
pub struct VmList {
    #[serde(default)]
    pub vm: Vec<VmRepr>,
}

#[derive(Debug, Deserialize)]
pub struct VmRepr {
    pub id: String,
    pub name: String,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub memory: u64,

    /// `down`, `up`, `image_locked`, ...
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient_millis")]
    pub creation_time: Option<DateTime<Utc>>,
}

impl From<VmRepr> for Vm {
    fn from(repr: VmRepr) -> Self {
        Vm {
            id: repr.id,
            name: repr.name,
            memory: repr.memory,
        }
    }
}

impl From<VmRepr> for ExportedBackup {
    fn from(repr: VmRepr) -> Self {
        ExportedBackup {
            id: repr.id,
            name: repr.name,
            created_at: repr.creation_time.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiskRepr {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl From<DiskRepr> for Disk {
    fn from(repr: DiskRepr) -> Self {
        let name = repr.name.or(repr.alias).unwrap_or_else(|| repr.id.clone());
        Disk { id: repr.id, name }
    }
}

/// API: GET /vms/{id}/snapshots/{id}/disks
#[derive(Debug, Default, Deserialize)]
pub struct DiskList {
    #[serde(default)]
    pub disk: Vec<DiskRepr>,
}

#[derive(Debug, Deserialize)]
pub struct DiskAttachmentRepr {
    pub disk: DiskRepr,
}

/// API: GET /vms/{id}/diskattachments?follow=disk
#[derive(Debug, Default, Deserialize)]
pub struct DiskAttachmentList {
    #[serde(default)]
    pub disk_attachment: Vec<DiskAttachmentRepr>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRepr {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, deserialize_with = "lenient_millis")]
    pub date: Option<DateTime<Utc>>,

    /// `ok`, `locked`, `in_preview`
    #[serde(default)]
    pub snapshot_status: Option<String>,
}

impl SnapshotRepr {
    pub fn into_snapshot(self, vm_id: &str) -> Snapshot {
        Snapshot {
            id: self.id,
            vm_id: vm_id.to_string(),
            description: self.description,
            created_at: self.date.unwrap_or_default(),
        }
    }
}

/// API: GET /vms/{id}/snapshots
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotList {
    #[serde(default)]
    pub snapshot: Vec<SnapshotRepr>,
}

#[derive(Debug, Deserialize)]
pub struct NamedRepr {
    pub id: String,
    pub name: String,
}

/// API: GET /clusters
#[derive(Debug, Default, Deserialize)]
pub struct ClusterList {
    #[serde(default)]
    pub cluster: Vec<NamedRepr>,
}

impl ClusterList {
    pub fn named(self, name: &str) -> Option<Cluster> {
        self.cluster
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| Cluster {
                id: c.id,
                name: c.name,
            })
    }
}

/// API: GET /storagedomains
#[derive(Debug, Default, Deserialize)]
pub struct StorageDomainList {
    #[serde(default)]
    pub storage_domain: Vec<NamedRepr>,
}

impl StorageDomainList {
    pub fn named(self, name: &str) -> Option<StorageDomain> {
        self.storage_domain
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| StorageDomain {
                id: d.id,
                name: d.name,
            })
    }
}

/// Reference to an entity by id inside request bodies
#[derive(Debug, Clone, Serialize)]
pub struct IdRef {
    pub id: String,
}

impl IdRef {
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self { id: id.into() }
    }
}
