// ============================================================================
// File: packages/vm-backup/src/config/mod.rs
// ----------------------------------------------------------------------------
// Backup policy: the immutable, validated configuration of one run.
//
// Settings are collected in a PolicyBuilder (from the TOML file, then CLI
// overrides) and validated once by `build`; the resulting BackupPolicy is
// read-only for the rest of the run.
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::{NameGenerator, RunSuffix};
use crate::platform::{Credentials, PollSettings};

mod errors;
mod file;

pub use errors::{ConfigError, ConfigResult};
pub use file::{load, load_builder};

/// Pause between operation status checks when `poll_interval` is not set
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Restarts of one VM's sequence after connection loss when not configured
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Upper bound for `timeout` and `poll_interval` (30 days)
pub const MAX_WAIT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Immutable configuration of one backup run
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    vm_names: Vec<String>,
    vm_disks: HashMap<String, Vec<String>>,
    names: NameGenerator,
    credentials: Credentials,
    snapshot_description: String,
    cluster_name: String,
    export_domain: String,
    vm_clone_domain: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    backup_keep_count: usize,
    reconnect_attempts: u32,
    dry_run: bool,
    debug: bool,
    log_file: Option<PathBuf>,
}

impl BackupPolicy {
    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        load(path)
    }

    /// VMs to back up, in processing order
    pub fn vm_names(&self) -> &[String] {
        &self.vm_names
    }

    /// Disk subset configured for `vm_name`; `None` means every disk
    pub fn disks_for(&self, vm_name: &str) -> Option<&[String]> {
        self.vm_disks.get(vm_name).map(Vec::as_slice)
    }

    pub fn names(&self) -> &NameGenerator {
        &self.names
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn snapshot_description(&self) -> &str {
        &self.snapshot_description
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn export_domain(&self) -> &str {
        &self.export_domain
    }

    /// Storage domain for clone disks; `None` keeps them on their source domain
    pub fn vm_clone_domain(&self) -> Option<&str> {
        self.vm_clone_domain.as_deref()
    }

    /// Per-operation deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(self.timeout, self.poll_interval)
    }

    pub fn backup_keep_count(&self) -> usize {
        self.backup_keep_count
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Collects settings and validates them into a [`BackupPolicy`]
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    vm_names: Option<Vec<String>>,
    vm_disks: HashMap<String, Vec<String>>,
    vm_middle: Option<String>,
    vm_name_max_length: Option<usize>,
    server: Option<String>,
    username: Option<String>,
    password: Option<String>,
    snapshot_description: Option<String>,
    cluster_name: Option<String>,
    export_domain: Option<String>,
    vm_clone_domain: Option<String>,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    backup_keep_count: Option<usize>,
    reconnect_attempts: Option<u32>,
    dry_run: Option<bool>,
    debug: Option<bool>,
    insecure: Option<bool>,
    log_file: Option<PathBuf>,
    run_suffix: Option<RunSuffix>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vm_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the snapshot of `vm` to the named disks
    pub fn with_vm_disks<V, I, S>(mut self, vm: V, disks: I) -> Self
    where
        V: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vm_disks
            .insert(vm.into(), disks.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_vm_middle<M: Into<String>>(mut self, middle: M) -> Self {
        self.vm_middle = Some(middle.into());
        self
    }

    pub fn with_vm_name_max_length(mut self, max_length: usize) -> Self {
        self.vm_name_max_length = Some(max_length);
        self
    }

    pub fn with_server<S: Into<String>>(mut self, server: S) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_username<U: Into<String>>(mut self, username: U) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password<P: Into<String>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_snapshot_description<D: Into<String>>(mut self, description: D) -> Self {
        self.snapshot_description = Some(description.into());
        self
    }

    pub fn with_cluster_name<C: Into<String>>(mut self, cluster: C) -> Self {
        self.cluster_name = Some(cluster.into());
        self
    }

    pub fn with_export_domain<D: Into<String>>(mut self, domain: D) -> Self {
        self.export_domain = Some(domain.into());
        self
    }

    pub fn with_vm_clone_domain<D: Into<String>>(mut self, domain: D) -> Self {
        self.vm_clone_domain = Some(domain.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_backup_keep_count(mut self, keep: usize) -> Self {
        self.backup_keep_count = Some(keep);
        self
    }

    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    pub fn with_log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Fix the run suffix instead of deriving it from the current time
    pub fn with_run_suffix(mut self, suffix: RunSuffix) -> Self {
        self.run_suffix = Some(suffix);
        self
    }

    /// Validate every setting and freeze the policy
    pub fn build(self) -> ConfigResult<BackupPolicy> {
        let vm_names = required(self.vm_names, "vm_names")?;
        if vm_names.is_empty() {
            return Err(ConfigError::invalid("vm_names", "at least one VM is required"));
        }
        for (index, name) in vm_names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("vm_names", "VM names must not be empty"));
            }
            if vm_names[..index].contains(name) {
                return Err(ConfigError::invalid("vm_names", format!("{name} is listed twice")));
            }
        }
        if let Some(unknown) = self.vm_disks.keys().find(|vm| !vm_names.contains(vm)) {
            return Err(ConfigError::invalid(
                "vm_disks",
                format!("{unknown} is not listed in vm_names"),
            ));
        }

        let middle = required(self.vm_middle, "vm_middle")?;
        let max_length = required(self.vm_name_max_length, "vm_name_max_length")?;
        if max_length == 0 {
            return Err(ConfigError::invalid("vm_name_max_length", "must be greater than 0"));
        }

        let server = required(self.server, "server")?;
        if !(server.starts_with("https://") || server.starts_with("http://")) {
            return Err(ConfigError::invalid("server", format!("{server} is not an http(s) URL")));
        }
        let username = required(self.username, "username")?;
        let password = required(self.password, "password")?;

        let snapshot_description = required(self.snapshot_description, "snapshot_description")?;
        if snapshot_description.is_empty() {
            return Err(ConfigError::invalid("snapshot_description", "must not be empty"));
        }

        let timeout = bounded_wait(required(self.timeout, "timeout")?, "timeout")?;
        let poll_interval = bounded_wait(
            self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            "poll_interval",
        )?;

        Ok(BackupPolicy {
            names: NameGenerator::new(
                middle,
                self.run_suffix.unwrap_or_else(RunSuffix::now),
                max_length,
            ),
            credentials: Credentials {
                url: server,
                username,
                password,
                insecure: self.insecure.unwrap_or(false),
            },
            vm_names,
            vm_disks: self.vm_disks,
            snapshot_description,
            cluster_name: required(self.cluster_name, "cluster_name")?,
            export_domain: required(self.export_domain, "export_domain")?,
            vm_clone_domain: self.vm_clone_domain,
            timeout,
            poll_interval,
            backup_keep_count: required(self.backup_keep_count, "backup_keep_count")?,
            reconnect_attempts: self.reconnect_attempts.unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
            dry_run: required(self.dry_run, "dry_run")?,
            debug: self.debug.unwrap_or(false),
            log_file: self.log_file,
        })
    }
}

fn required<T>(value: Option<T>, key: &'static str) -> ConfigResult<T> {
    value.ok_or(ConfigError::MissingSetting { key })
}

fn bounded_wait(value: Duration, key: &'static str) -> ConfigResult<Duration> {
    if value.is_zero() {
        return Err(ConfigError::invalid(key, "must be greater than 0"));
    }
    if value > MAX_WAIT {
        return Err(ConfigError::invalid(
            key,
            format!("must not exceed {} seconds", MAX_WAIT.as_secs()),
        ));
    }
    Ok(value)
}
