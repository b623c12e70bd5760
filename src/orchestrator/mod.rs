// ============================================================================
// File: packages/vm-backup/src/orchestrator/mod.rs
// ----------------------------------------------------------------------------
// Backup orchestrator for a batch of VMs.
//
// Owns the platform session for the whole run and drives every configured
// VM through the backup sequence, one at a time:
// - Pre-flight checks before anything is changed
// - Per-VM fault isolation with a report entry for every VM
// - Reconnect and restart of the current VM after connection loss
// - Immediate abort on unexpected platform errors
// ============================================================================

use std::time::Instant;

use chrono::Local;
use log::{debug, error, info, warn};

use crate::config::{BackupPolicy, ConfigError};
use crate::platform::{PlatformConnector, PlatformError, PlatformSession};
use crate::report::{RunReport, VmOutcome};

mod steps;


pub use steps::BackupStep;

use steps::Interrupt;

/// Errors that end a run before every VM was processed
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: PlatformError,
    },

    #[error("Pre-flight check failed: {source}")]
    Preflight {
        #[source]
        source: PlatformError,
    },

    #[error("VM {name} does not exist")]
    PreflightVmMissing { name: String },

    #[error("{kind} {name} does not exist")]
    PreflightResource { kind: &'static str, name: String },

    #[error("Unexpected error during {step} of {vm}: {source}")]
    Fatal {
        vm: String,
        step: BackupStep,
        #[source]
        source: PlatformError,
    },
}

/// Sequential backup of every VM named in a [`BackupPolicy`]
pub struct BackupOrchestrator {
    connector: Box<dyn PlatformConnector>,
    policy: BackupPolicy,
    session: Option<Box<dyn PlatformSession>>,
    report: RunReport,
    started: Instant,
}

impl BackupOrchestrator {
    pub fn new(connector: Box<dyn PlatformConnector>, policy: BackupPolicy) -> Self {
        Self {
            connector,
            policy,
            session: None,
            report: RunReport::new(Local::now()),
            started: Instant::now(),
        }
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    /// Back up every configured VM
    ///
    /// The report holds exactly one entry per configured VM when this
    /// returns, whether the run completed or was aborted.
    ///
    /// # Returns
    /// `Err` when the run was aborted; per-VM failures are only recorded in
    /// the report.
    pub async fn run(&mut self) -> Result<(), RunError> {
        self.started = Instant::now();
        self.report = RunReport::new(Local::now());
        info!(
            "Backup run started for {} VMs, clone suffix {}",
            self.policy.vm_names().len(),
            self.policy.names().suffix()
        );
        if self.policy.dry_run() {
            info!("[dry-run] No snapshot, clone, export or deletion will be issued");
        }

        let result = self.run_vms().await;
        if let Err(err) = &result {
            error!("Backup run aborted: {err}");
        }

        self.report.fill_missing(self.policy.vm_names());
        self.report.finish(self.started.elapsed());
        self.disconnect().await;
        result
    }

    async fn run_vms(&mut self) -> Result<(), RunError> {
        if let Err(source) = self.reconnect().await {
            return Err(RunError::Connect {
                url: self.policy.credentials().url.clone(),
                source,
            });
        }
        self.preflight().await?;

        let vm_names = self.policy.vm_names().to_vec();
        for vm_name in &vm_names {
            info!("{vm_name}: backup started");
            let outcome = self.process_vm(vm_name).await;
            match &outcome {
                Ok(VmOutcome::Success { .. }) => info!("{vm_name}: backup finished"),
                Ok(outcome) => error!("{vm_name}: backup failed, {outcome}"),
                Err(_) => {}
            }
            match outcome {
                Ok(outcome) => self.report.record(vm_name.as_str(), outcome),
                Err(err) => {
                    if let RunError::Fatal { step, source, .. } = &err {
                        self.report.record(
                            vm_name.as_str(),
                            VmOutcome::Aborted {
                                step: step.to_string(),
                                details: source.to_string(),
                            },
                        );
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Verify that every VM and target resource exists before changing anything
    async fn preflight(&mut self) -> Result<(), RunError> {
        let Some(session) = self.session.as_deref() else {
            return Err(RunError::Preflight {
                source: PlatformError::connection(&self.policy.credentials().url, "not connected"),
            });
        };
        let preflight = |source| RunError::Preflight { source };

        let mut missing = Vec::new();
        for vm_name in self.policy.vm_names() {
            if session.find_vm(vm_name).await.map_err(preflight)?.is_none() {
                error!("VM {vm_name} does not exist");
                missing.push(vm_name.clone());
            }
        }
        if let Some(first) = missing.first().cloned() {
            for vm_name in missing {
                self.report.record(vm_name, VmOutcome::NotFound);
            }
            return Err(RunError::PreflightVmMissing { name: first });
        }

        let cluster = self.policy.cluster_name();
        if session.find_cluster(cluster).await.map_err(preflight)?.is_none() {
            return Err(RunError::PreflightResource {
                kind: "Cluster",
                name: cluster.to_string(),
            });
        }

        let mut domains = vec![self.policy.export_domain()];
        domains.extend(self.policy.vm_clone_domain());
        for domain in domains {
            if session
                .find_storage_domain(domain)
                .await
                .map_err(preflight)?
                .is_none()
            {
                return Err(RunError::PreflightResource {
                    kind: "Storage domain",
                    name: domain.to_string(),
                });
            }
        }

        debug!("Pre-flight checks passed");
        Ok(())
    }

    /// Run the sequence for one VM, restarting it after connection loss
    async fn process_vm(&mut self, vm_name: &str) -> Result<VmOutcome, RunError> {
        let max_attempts = self.policy.reconnect_attempts();
        let mut attempts = 0;

        loop {
            let mut lost = match self.backup_vm(vm_name).await {
                Ok(outcome) => return Ok(outcome),
                Err(Interrupt::Fatal { step, source }) => {
                    return Err(RunError::Fatal {
                        vm: vm_name.to_string(),
                        step,
                        source,
                    });
                }
                Err(Interrupt::Reconnect(err)) => err,
            };

            loop {
                if attempts >= max_attempts {
                    return Ok(VmOutcome::ConnectionLost {
                        attempts,
                        details: lost.to_string(),
                    });
                }
                attempts += 1;
                warn!("{vm_name}: {lost}; reconnecting ({attempts} of {max_attempts})");
                match self.reconnect().await {
                    Ok(()) => break,
                    Err(err) => lost = err,
                }
            }
            info!("{vm_name}: restarting backup from the beginning");
        }
    }

    /// Replace the session with a fresh one
    async fn reconnect(&mut self) -> Result<(), PlatformError> {
        self.session = None;
        let session = self.connector.connect(self.policy.credentials()).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(err) = session.disconnect().await
        {
            warn!("Failed to disconnect cleanly: {err}");
        }
    }
}
