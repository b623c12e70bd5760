// ============================================================================
// File: packages/vm-backup/src/retention.rs
// ----------------------------------------------------------------------------
// Removal of leftovers from earlier runs and pruning of old exports.
//
// Every operation is idempotent: when nothing matches, nothing is issued
// and the call succeeds.
// ============================================================================

use std::time::Duration;

use log::{debug, info};

use crate::naming::NameGenerator;
use crate::platform::{
    ExportedBackup, OperationHandle, OperationKind, PlatformError, PlatformSession, PollSettings,
    StorageDomain, TerminalStatus, Vm, poll,
};

/// Errors raised while deleting a resource
#[derive(Debug, Clone, thiserror::Error)]
pub enum SweepError {
    /// The platform call itself failed
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The deletion did not reach a terminal state in time
    #[error("{operation} of {resource} did not finish within {}s", after.as_secs())]
    TimedOut {
        operation: OperationKind,
        resource: String,
        after: Duration,
    },

    /// The platform reported the deletion as failed
    #[error("{operation} of {resource} failed: {details}")]
    Failed {
        operation: OperationKind,
        resource: String,
        details: String,
    },
}

/// Result type for sweeper operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Deletes stale clones, stale snapshots and surplus exports
pub struct RetentionSweeper<'a> {
    session: &'a dyn PlatformSession,
    names: &'a NameGenerator,
    poll: PollSettings,
    dry_run: bool,
}

impl<'a> RetentionSweeper<'a> {
    pub fn new(
        session: &'a dyn PlatformSession,
        names: &'a NameGenerator,
        poll: PollSettings,
        dry_run: bool,
    ) -> Self {
        Self {
            session,
            names,
            poll,
            dry_run,
        }
    }

    /// Delete every clone of `vm_name` left by any run, except `spare`
    ///
    /// Returns the number of clones matched.
    pub async fn delete_stale_clone(&self, vm_name: &str, spare: Option<&str>) -> SweepResult<usize> {
        let prefix = self.names.clone_prefix(vm_name);
        let clones: Vec<Vm> = self
            .session
            .search_vms(&prefix)
            .await?
            .into_iter()
            .filter(|vm| self.names.is_clone_of(&vm.name, vm_name))
            .filter(|vm| spare != Some(vm.name.as_str()))
            .collect();

        for clone in &clones {
            if self.dry_run {
                info!("[dry-run] Would delete clone VM {}", clone.name);
                continue;
            }
            info!("Deleting clone VM {}", clone.name);
            let handle = self.session.delete_vm(clone).await?;
            self.wait(&handle, &clone.name).await?;
        }

        if clones.is_empty() {
            debug!("No clone of {vm_name} to delete");
        }
        Ok(clones.len())
    }

    /// Delete every snapshot of `vm` carrying `description`
    ///
    /// Returns the number of snapshots matched.
    pub async fn delete_stale_snapshots(&self, vm: &Vm, description: &str) -> SweepResult<usize> {
        let snapshots = self.session.list_snapshots(vm, description).await?;

        for snapshot in &snapshots {
            if self.dry_run {
                info!(
                    "[dry-run] Would delete snapshot {} of {}",
                    snapshot.id, vm.name
                );
                continue;
            }
            info!("Deleting snapshot {} of {}", snapshot.id, vm.name);
            let handle = self.session.delete_snapshot(snapshot).await?;
            self.wait(&handle, &snapshot.id).await?;
        }

        if snapshots.is_empty() {
            debug!("No snapshot '{description}' on {} to delete", vm.name);
        }
        Ok(snapshots.len())
    }

    /// Keep the `keep_count` newest exports of `vm_name` in `domain`, delete the rest
    ///
    /// Oldest exports go first; exports with equal creation times keep the
    /// domain's listing order. Returns the number of exports matched for
    /// deletion.
    pub async fn prune_old_exports(
        &self,
        vm_name: &str,
        domain: &StorageDomain,
        keep_count: usize,
    ) -> SweepResult<usize> {
        let mut exports: Vec<ExportedBackup> = self
            .session
            .list_exports(domain)
            .await?
            .into_iter()
            .filter(|export| self.names.is_clone_of(&export.name, vm_name))
            .collect();
        exports.sort_by_key(|export| export.created_at);

        let surplus = exports.len().saturating_sub(keep_count);
        debug!(
            "{} exports of {vm_name} in {}, keeping {keep_count}",
            exports.len(),
            domain.name
        );

        for export in &exports[..surplus] {
            if self.dry_run {
                info!(
                    "[dry-run] Would delete export {} from {}",
                    export.name, domain.name
                );
                continue;
            }
            info!("Deleting export {} from {}", export.name, domain.name);
            let handle = self.session.delete_export(domain, export).await?;
            self.wait(&handle, &export.name).await?;
        }

        Ok(surplus)
    }

    async fn wait(&self, handle: &OperationHandle, resource: &str) -> SweepResult<()> {
        match poll(self.session, handle, self.poll).await? {
            TerminalStatus::Succeeded => Ok(()),
            TerminalStatus::Failed(details) => Err(SweepError::Failed {
                operation: handle.kind,
                resource: resource.to_string(),
                details,
            }),
            TerminalStatus::TimedOut(after) => Err(SweepError::TimedOut {
                operation: handle.kind,
                resource: resource.to_string(),
                after,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Local, TimeZone};

    use super::*;
    use crate::naming::RunSuffix;
    use crate::platform::memory::InMemoryPlatform;

    const DESCRIPTION: &str = "Snapshot for backup script";

    fn names() -> NameGenerator {
        let start = Local
            .with_ymd_and_hms(2026, 10, 19, 3, 15, 0)
            .single()
            .expect("unambiguous local time");
        NameGenerator::new("_BACKUP", RunSuffix::from_time(&start), 64)
    }

    fn quick() -> PollSettings {
        PollSettings::new(Duration::from_millis(40), Duration::from_millis(5))
    }

    fn at(secs: i64) -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    #[tokio::test]
    async fn nothing_to_clean_is_not_an_error() {
        let platform = InMemoryPlatform::new();
        let vm = platform.add_vm("web01", 1024, &["root"]);
        let domain = platform.add_domain("export1");
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        for _ in 0..2 {
            assert_eq!(sweeper.delete_stale_clone("web01", None).await.unwrap(), 0);
            assert_eq!(
                sweeper.delete_stale_snapshots(&vm, DESCRIPTION).await.unwrap(),
                0
            );
            assert_eq!(
                sweeper.prune_old_exports("web01", &domain, 2).await.unwrap(),
                0
            );
        }
        assert!(platform.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn stale_clones_of_earlier_runs_are_deleted() {
        let platform = InMemoryPlatform::new();
        platform.add_vm("web01", 1024, &["root"]);
        platform.add_vm("web01_BACKUP_20261018_031500", 1024, &["root"]);
        platform.add_vm("web01_BACKUP_20261019_031500", 1024, &["root"]);
        platform.add_vm("web012_BACKUP_20261018_031500", 1024, &["root"]);
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        let deleted = sweeper
            .delete_stale_clone("web01", Some("web01_BACKUP_20261019_031500"))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(platform.has_vm("web01"));
        assert!(!platform.has_vm("web01_BACKUP_20261018_031500"));
        assert!(platform.has_vm("web01_BACKUP_20261019_031500"));
        assert!(platform.has_vm("web012_BACKUP_20261018_031500"));
    }

    #[tokio::test]
    async fn only_described_snapshots_are_deleted() {
        let platform = InMemoryPlatform::new();
        let vm = platform.add_vm("db01", 1024, &["root", "data"]);
        platform.add_snapshot("db01", DESCRIPTION);
        platform.add_snapshot("db01", DESCRIPTION);
        platform.add_snapshot("db01", "before upgrade");
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        assert_eq!(
            sweeper.delete_stale_snapshots(&vm, DESCRIPTION).await.unwrap(),
            2
        );
        let left = platform.snapshots_of("db01");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].description, "before upgrade");
    }

    #[tokio::test]
    async fn pruning_keeps_the_newest_exports() {
        let platform = InMemoryPlatform::new();
        let domain = platform.add_domain("export1");
        // Listed out of chronological order on purpose.
        for (name, secs) in [
            ("web01_BACKUP_20261016_031500", 30),
            ("web01_BACKUP_20261014_031500", 10),
            ("web01_BACKUP_20261018_031500", 50),
            ("web01_BACKUP_20261015_031500", 20),
            ("web01_BACKUP_20261017_031500", 40),
            ("db01_BACKUP_20261010_031500", 0),
        ] {
            platform.add_export("export1", name, at(secs));
        }
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        assert_eq!(
            sweeper.prune_old_exports("web01", &domain, 2).await.unwrap(),
            3
        );

        let deleted: Vec<String> = platform
            .mutating_calls()
            .into_iter()
            .map(|call| call.target)
            .collect();
        assert_eq!(
            deleted,
            [
                "web01_BACKUP_20261014_031500",
                "web01_BACKUP_20261015_031500",
                "web01_BACKUP_20261016_031500",
            ]
        );

        let mut left: Vec<String> = platform
            .exports_in("export1")
            .into_iter()
            .map(|export| export.name)
            .collect();
        left.sort();
        assert_eq!(
            left,
            [
                "db01_BACKUP_20261010_031500",
                "web01_BACKUP_20261017_031500",
                "web01_BACKUP_20261018_031500",
            ]
        );
    }

    #[tokio::test]
    async fn equal_timestamps_follow_listing_order() {
        let platform = InMemoryPlatform::new();
        let domain = platform.add_domain("export1");
        platform.add_export("export1", "web01_BACKUP_20261015_031500", at(5));
        platform.add_export("export1", "web01_BACKUP_20261014_031500", at(5));
        platform.add_export("export1", "web01_BACKUP_20261016_031500", at(9));
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        sweeper.prune_old_exports("web01", &domain, 1).await.unwrap();

        let deleted: Vec<String> = platform
            .mutating_calls()
            .into_iter()
            .map(|call| call.target)
            .collect();
        assert_eq!(
            deleted,
            ["web01_BACKUP_20261015_031500", "web01_BACKUP_20261014_031500"]
        );
    }

    #[tokio::test]
    async fn stuck_deletion_is_an_operational_error() {
        let platform = InMemoryPlatform::new();
        platform.add_vm("app02_BACKUP_20261018_031500", 1024, &["root"]);
        platform.hang(OperationKind::DeleteVm);
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), false);

        let err = sweeper
            .delete_stale_clone("app02", None)
            .await
            .expect_err("deletion never finishes");
        assert!(matches!(
            err,
            SweepError::TimedOut {
                operation: OperationKind::DeleteVm,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dry_run_only_looks() {
        let platform = InMemoryPlatform::new();
        let vm = platform.add_vm("web01", 1024, &["root"]);
        platform.add_vm("web01_BACKUP_20261018_031500", 1024, &["root"]);
        platform.add_snapshot("web01", DESCRIPTION);
        let domain = platform.add_domain("export1");
        platform.add_export("export1", "web01_BACKUP_20261017_031500", at(1));
        platform.add_export("export1", "web01_BACKUP_20261018_031500", at(2));
        let session = platform.session();
        let names = names();
        let sweeper = RetentionSweeper::new(&session, &names, quick(), true);

        assert_eq!(sweeper.delete_stale_clone("web01", None).await.unwrap(), 1);
        assert_eq!(
            sweeper.delete_stale_snapshots(&vm, DESCRIPTION).await.unwrap(),
            1
        );
        assert_eq!(
            sweeper.prune_old_exports("web01", &domain, 0).await.unwrap(),
            2
        );

        assert!(platform.mutating_calls().is_empty());
        assert!(platform.has_vm("web01_BACKUP_20261018_031500"));
        assert_eq!(platform.exports_in("export1").len(), 2);
    }
}
