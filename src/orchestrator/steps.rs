// ============================================================================
// File: packages/vm-backup/src/orchestrator/steps.rs
// ----------------------------------------------------------------------------
// Per-VM backup sequence:
// - Validate clone name, then remove leftovers of earlier runs
// - Snapshot, clone from the snapshot, drop the snapshot
// - Prune old exports, export the clone, drop the clone
// ============================================================================

use std::fmt;

use log::{debug, error, info, warn};

use crate::platform::{
    CloneRequest, Disk, DiskTarget, OperationHandle, PlatformError, PlatformSession, Snapshot,
    StorageDomain, TerminalStatus, Vm, poll,
};
use crate::report::VmOutcome;
use crate::retention::{RetentionSweeper, SweepError};

use super::BackupOrchestrator;

/// Step of the per-VM sequence, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    Lookup,
    PreClean,
    Snapshot,
    LocateSnapshot,
    Clone,
    PostSnapshotCleanup,
    RetentionPrune,
    Export,
    FinalCleanup,
}

impl BackupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::PreClean => "pre-clean",
            Self::Snapshot => "snapshot",
            Self::LocateSnapshot => "snapshot lookup",
            Self::Clone => "clone",
            Self::PostSnapshotCleanup => "snapshot cleanup",
            Self::RetentionPrune => "retention prune",
            Self::Export => "export",
            Self::FinalCleanup => "clone cleanup",
        }
    }

    /// Report outcome for a VM whose first failure happened in this step
    pub fn outcome(self, details: String) -> VmOutcome {
        match self {
            Self::Lookup | Self::Snapshot | Self::LocateSnapshot => {
                VmOutcome::SnapshotFailed { details }
            }
            Self::Clone => VmOutcome::CloneFailed { details },
            Self::Export => VmOutcome::ExportFailed { details },
            Self::PreClean
            | Self::PostSnapshotCleanup
            | Self::RetentionPrune
            | Self::FinalCleanup => VmOutcome::CleanupFailed { details },
        }
    }
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stops the current VM's sequence without recording an outcome
#[derive(Debug)]
pub(super) enum Interrupt {
    /// Session lost; restart the VM on a new session
    Reconnect(PlatformError),

    /// Abort the whole run
    Fatal {
        step: BackupStep,
        source: PlatformError,
    },
}

/// Result of one step
#[derive(Debug)]
enum Failure {
    /// The step failed; the VM fails, the run continues
    Step { step: BackupStep, details: String },
    Interrupted(Interrupt),
}

impl Failure {
    fn step<D: Into<String>>(step: BackupStep, details: D) -> Self {
        Self::Step {
            step,
            details: details.into(),
        }
    }

    fn platform(step: BackupStep, err: PlatformError) -> Self {
        match err {
            PlatformError::Connection { .. } => Self::Interrupted(Interrupt::Reconnect(err)),
            PlatformError::Request { .. } => Self::step(step, err.to_string()),
            PlatformError::Unexpected { .. } => {
                Self::Interrupted(Interrupt::Fatal { step, source: err })
            }
        }
    }

    fn sweep(step: BackupStep, err: SweepError) -> Self {
        match err {
            SweepError::Platform(err) => Self::platform(step, err),
            other => Self::step(step, other.to_string()),
        }
    }
}

type StepResult<T> = Result<T, Failure>;

/// First failure of the VM being processed
struct Progress<'a> {
    vm_name: &'a str,
    failure: Option<(BackupStep, String)>,
}

impl<'a> Progress<'a> {
    fn new(vm_name: &'a str) -> Self {
        Self {
            vm_name,
            failure: None,
        }
    }

    /// Keep the first step failure; pass interrupts through
    ///
    /// Returns `None` when the step failed.
    fn absorb<T>(&mut self, result: StepResult<T>) -> Result<Option<T>, Interrupt> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(Failure::Interrupted(interrupt)) => Err(interrupt),
            Err(Failure::Step { step, details }) => {
                error!("{}: {step} failed: {details}", self.vm_name);
                if self.failure.is_none() {
                    self.failure = Some((step, details));
                }
                Ok(None)
            }
        }
    }

    fn failed(&self) -> bool {
        self.failure.is_some()
    }

    fn into_failure(self) -> Option<VmOutcome> {
        self.failure.map(|(step, details)| step.outcome(details))
    }
}

/// Snapshot the clone is built from
enum WorkingSnapshot {
    Taken(Snapshot),
    /// Nothing was created because the run is a dry run
    DryRun,
}

impl BackupOrchestrator {
    fn session(&self) -> Result<&dyn PlatformSession, Interrupt> {
        self.session.as_deref().ok_or_else(|| {
            Interrupt::Reconnect(PlatformError::connection(
                &self.policy.credentials().url,
                "not connected",
            ))
        })
    }

    /// Drive one VM through the whole sequence on the current session
    pub(super) async fn backup_vm(&self, vm_name: &str) -> Result<VmOutcome, Interrupt> {
        let session = self.session()?;
        let policy = &self.policy;
        let names = policy.names();
        let sweeper = RetentionSweeper::new(session, names, policy.poll_settings(), policy.dry_run());
        let mut progress = Progress::new(vm_name);

        let clone_name = match names.checked_clone_name(vm_name) {
            Ok(name) => name,
            Err(err) => {
                error!("{vm_name}: {err}, skipping");
                return Ok(VmOutcome::SkippedNameTooLong {
                    clone_name: err.name,
                    length: err.length,
                    max_length: err.max_length,
                });
            }
        };
        debug!("{vm_name}: clone name {clone_name}");

        let found = session
            .find_vm(vm_name)
            .await
            .map_err(|err| Failure::platform(BackupStep::Lookup, err));
        let Some(found) = progress.absorb(found)? else {
            return Ok(progress.into_failure().unwrap_or(VmOutcome::NotFound));
        };
        let Some(vm) = found else {
            error!("{vm_name}: VM no longer exists");
            return Ok(VmOutcome::NotFound);
        };

        info!("{vm_name}: removing leftovers of earlier runs");
        let cleaned = self.pre_clean(&sweeper, &vm).await;
        if progress.absorb(cleaned)?.is_none() {
            return Ok(progress.into_failure().unwrap_or(VmOutcome::NotAttempted));
        }

        info!("{vm_name}: taking snapshot");
        let taken = self.take_snapshot(session, &vm).await;
        let working = progress.absorb(taken)?;

        let mut clone_attempted = false;
        if let Some(working) = &working {
            info!("{vm_name}: creating clone {clone_name}");
            clone_attempted = true;
            let cloned = self
                .clone_from_snapshot(session, &vm, working, &clone_name)
                .await;
            progress.absorb(cloned)?;
        }

        info!("{vm_name}: removing backup snapshot");
        let removed = sweeper
            .delete_stale_snapshots(&vm, policy.snapshot_description())
            .await
            .map_err(|err| Failure::sweep(BackupStep::PostSnapshotCleanup, err));
        progress.absorb(removed)?;

        if !progress.failed() {
            info!("{vm_name}: pruning old exports");
            let pruned = self.prune(&sweeper, vm_name, &clone_name).await;
            progress.absorb(pruned)?;
        }

        if !progress.failed() {
            info!("{vm_name}: exporting {clone_name}");
            let exported = self.export_clone(session, &clone_name).await;
            progress.absorb(exported)?;
        }

        if clone_attempted {
            info!("{vm_name}: removing clone {clone_name}");
            let removed = sweeper
                .delete_stale_clone(vm_name, None)
                .await
                .map_err(|err| Failure::sweep(BackupStep::FinalCleanup, err));
            progress.absorb(removed)?;
        }

        Ok(progress.into_failure().unwrap_or(VmOutcome::Success {
            elapsed: self.started.elapsed(),
        }))
    }

    async fn pre_clean(&self, sweeper: &RetentionSweeper<'_>, vm: &Vm) -> StepResult<()> {
        let sweep = |err| Failure::sweep(BackupStep::PreClean, err);
        sweeper.delete_stale_clone(&vm.name, None).await.map_err(sweep)?;
        sweeper
            .delete_stale_snapshots(vm, self.policy.snapshot_description())
            .await
            .map_err(sweep)?;
        Ok(())
    }

    /// Disks to capture: the configured subset, or all of them
    async fn select_disks(&self, session: &dyn PlatformSession, vm: &Vm) -> StepResult<Vec<Disk>> {
        let disks = session
            .list_disks(vm)
            .await
            .map_err(|err| Failure::platform(BackupStep::Snapshot, err))?;

        let selected: Vec<Disk> = match self.policy.disks_for(&vm.name) {
            None => disks,
            Some(wanted) => {
                for name in wanted {
                    if !disks.iter().any(|disk| &disk.name == name) {
                        warn!("{}: configured disk {name} is not attached", vm.name);
                    }
                }
                disks
                    .into_iter()
                    .filter(|disk| wanted.contains(&disk.name))
                    .collect()
            }
        };

        if selected.is_empty() {
            return Err(Failure::step(BackupStep::Snapshot, "no disks selected"));
        }
        Ok(selected)
    }

    /// Create the backup snapshot and locate it
    async fn take_snapshot(
        &self,
        session: &dyn PlatformSession,
        vm: &Vm,
    ) -> StepResult<WorkingSnapshot> {
        let description = self.policy.snapshot_description();
        let disks = self.select_disks(session, vm).await?;
        let disk_names: Vec<&str> = disks.iter().map(|disk| disk.name.as_str()).collect();

        if self.policy.dry_run() {
            info!(
                "[dry-run] Would snapshot {} with disks {disk_names:?}",
                vm.name
            );
            return Ok(WorkingSnapshot::DryRun);
        }

        debug!("{}: snapshot disks {disk_names:?}", vm.name);
        let handle = session
            .create_snapshot(vm, description, &disks)
            .await
            .map_err(|err| Failure::platform(BackupStep::Snapshot, err))?;
        self.wait(session, &handle, BackupStep::Snapshot).await?;

        let snapshot = session
            .list_snapshots(vm, description)
            .await
            .map_err(|err| Failure::platform(BackupStep::LocateSnapshot, err))?
            .into_iter()
            .max_by_key(|snapshot| snapshot.created_at)
            .ok_or_else(|| {
                Failure::step(
                    BackupStep::LocateSnapshot,
                    format!("no snapshot '{description}' listed after creation"),
                )
            })?;
        debug!("{}: working snapshot {}", vm.name, snapshot.id);
        Ok(WorkingSnapshot::Taken(snapshot))
    }

    async fn clone_from_snapshot(
        &self,
        session: &dyn PlatformSession,
        vm: &Vm,
        working: &WorkingSnapshot,
        clone_name: &str,
    ) -> StepResult<()> {
        let platform = |err| Failure::platform(BackupStep::Clone, err);

        let cluster_name = self.policy.cluster_name();
        let cluster = session
            .find_cluster(cluster_name)
            .await
            .map_err(platform)?
            .ok_or_else(|| {
                Failure::step(BackupStep::Clone, format!("cluster {cluster_name} not found"))
            })?;

        let clone_domain = match self.policy.vm_clone_domain() {
            Some(name) => Some(
                session
                    .find_storage_domain(name)
                    .await
                    .map_err(platform)?
                    .ok_or_else(|| {
                        Failure::step(BackupStep::Clone, format!("storage domain {name} not found"))
                    })?,
            ),
            None => None,
        };

        let snapshot = match working {
            WorkingSnapshot::Taken(snapshot) => snapshot,
            WorkingSnapshot::DryRun => {
                info!(
                    "[dry-run] Would create {clone_name} from the snapshot of {} in cluster {}",
                    vm.name, cluster.name
                );
                return Ok(());
            }
        };

        let disks = session
            .list_snapshot_disks(snapshot)
            .await
            .map_err(platform)?
            .into_iter()
            .map(|disk| DiskTarget {
                image_id: disk.id,
                storage_domain: clone_domain.clone(),
            })
            .collect();

        let request = CloneRequest {
            name: clone_name.to_string(),
            memory: vm.memory,
            cluster,
            snapshot: snapshot.clone(),
            disks,
        };
        let handle = session
            .create_vm_from_snapshot(&request)
            .await
            .map_err(platform)?;
        self.wait(session, &handle, BackupStep::Clone).await
    }

    /// Drop surplus exports and any other clone of this VM
    async fn prune(
        &self,
        sweeper: &RetentionSweeper<'_>,
        vm_name: &str,
        clone_name: &str,
    ) -> StepResult<()> {
        let domain = self.export_domain(BackupStep::RetentionPrune).await?;
        let sweep = |err| Failure::sweep(BackupStep::RetentionPrune, err);

        sweeper
            .prune_old_exports(vm_name, &domain, self.policy.backup_keep_count())
            .await
            .map_err(sweep)?;
        sweeper
            .delete_stale_clone(vm_name, Some(clone_name))
            .await
            .map_err(sweep)?;
        Ok(())
    }

    async fn export_clone(&self, session: &dyn PlatformSession, clone_name: &str) -> StepResult<()> {
        let domain = self.export_domain(BackupStep::Export).await?;
        let clone = session
            .find_vm(clone_name)
            .await
            .map_err(|err| Failure::platform(BackupStep::Export, err))?;

        if self.policy.dry_run() {
            info!("[dry-run] Would export {clone_name} to {}", domain.name);
            return Ok(());
        }

        let clone = clone.ok_or_else(|| {
            Failure::step(BackupStep::Export, format!("clone {clone_name} not found"))
        })?;
        let handle = session
            .export_vm(&clone, &domain)
            .await
            .map_err(|err| Failure::platform(BackupStep::Export, err))?;
        self.wait(session, &handle, BackupStep::Export).await
    }

    async fn export_domain(&self, step: BackupStep) -> StepResult<StorageDomain> {
        let name = self.policy.export_domain();
        self.session()
            .map_err(Failure::Interrupted)?
            .find_storage_domain(name)
            .await
            .map_err(|err| Failure::platform(step, err))?
            .ok_or_else(|| Failure::step(step, format!("storage domain {name} not found")))
    }

    async fn wait(
        &self,
        session: &dyn PlatformSession,
        handle: &OperationHandle,
        step: BackupStep,
    ) -> StepResult<()> {
        let status = poll(session, handle, self.policy.poll_settings())
            .await
            .map_err(|err| Failure::platform(step, err))?;

        match status {
            TerminalStatus::Succeeded => Ok(()),
            TerminalStatus::Failed(details) => Err(Failure::step(
                step,
                format!("{} failed: {details}", handle.kind),
            )),
            TerminalStatus::TimedOut(after) => Err(Failure::step(
                step,
                format!("{} did not finish within {}s", handle.kind, after.as_secs()),
            )),
        }
    }
}
