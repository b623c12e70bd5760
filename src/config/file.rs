// ============================================================================
// File: packages/vm-backup/src/config/file.rs
// ----------------------------------------------------------------------------
// On-disk TOML schema for the backup configuration.
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::{ConfigError, ConfigResult};
use super::{BackupPolicy, PolicyBuilder};

/// Whole configuration file; settings live under `[config]`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    config: Option<RawConfig>,
}

/// Flat key set of the `[config]` table, every key optional at this stage
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    pub vm_names: Option<Vec<String>>,
    pub vm_disks: Option<HashMap<String, Vec<String>>>,
    pub vm_middle: Option<String>,
    pub vm_name_max_length: Option<usize>,
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub snapshot_description: Option<String>,
    pub cluster_name: Option<String>,
    pub export_domain: Option<String>,
    pub vm_clone_domain: Option<String>,
    pub timeout: Option<u64>,
    pub backup_keep_count: Option<usize>,
    pub dry_run: Option<bool>,
    pub debug: Option<bool>,
    pub poll_interval: Option<u64>,
    pub reconnect_attempts: Option<u32>,
    pub insecure: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl RawConfig {
    /// Feed every present key into a builder; required-key checks happen in `build`
    pub(crate) fn into_builder(self) -> PolicyBuilder {
        let mut builder = PolicyBuilder::new();

        if let Some(vm_names) = self.vm_names {
            builder = builder.with_vm_names(vm_names);
        }
        for (vm, disks) in self.vm_disks.unwrap_or_default() {
            builder = builder.with_vm_disks(vm, disks);
        }
        if let Some(middle) = self.vm_middle {
            builder = builder.with_vm_middle(middle);
        }
        if let Some(max_length) = self.vm_name_max_length {
            builder = builder.with_vm_name_max_length(max_length);
        }
        if let Some(server) = self.server {
            builder = builder.with_server(server);
        }
        if let Some(username) = self.username {
            builder = builder.with_username(username);
        }
        if let Some(password) = self.password {
            builder = builder.with_password(password);
        }
        if let Some(description) = self.snapshot_description {
            builder = builder.with_snapshot_description(description);
        }
        if let Some(cluster) = self.cluster_name {
            builder = builder.with_cluster_name(cluster);
        }
        if let Some(domain) = self.export_domain {
            builder = builder.with_export_domain(domain);
        }
        if let Some(domain) = self.vm_clone_domain {
            builder = builder.with_vm_clone_domain(domain);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(Duration::from_secs(timeout));
        }
        if let Some(keep) = self.backup_keep_count {
            builder = builder.with_backup_keep_count(keep);
        }
        if let Some(dry_run) = self.dry_run {
            builder = builder.with_dry_run(dry_run);
        }
        if let Some(debug) = self.debug {
            builder = builder.with_debug(debug);
        }
        if let Some(interval) = self.poll_interval {
            builder = builder.with_poll_interval(Duration::from_secs(interval));
        }
        if let Some(attempts) = self.reconnect_attempts {
            builder = builder.with_reconnect_attempts(attempts);
        }
        if let Some(insecure) = self.insecure {
            builder = builder.with_insecure(insecure);
        }
        if let Some(log_file) = self.log_file {
            builder = builder.with_log_file(log_file);
        }

        builder
    }
}

/// Parse configuration text; `path` is only used for error messages
pub(crate) fn parse(text: &str, path: &Path) -> ConfigResult<PolicyBuilder> {
    let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = file
        .config
        .ok_or(ConfigError::MissingSection { section: "config" })?;
    Ok(raw.into_builder())
}

/// Read and parse a configuration file into a builder
pub fn load_builder(path: &Path) -> ConfigResult<PolicyBuilder> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path)
}

/// Read, parse and validate a configuration file
pub fn load(path: &Path) -> ConfigResult<BackupPolicy> {
    load_builder(path)?.build()
}
