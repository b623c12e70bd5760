// ============================================================================
// File: packages/vm-backup/src/report.rs
// ----------------------------------------------------------------------------
// Per-VM outcomes and the run summary.
// ============================================================================

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Final outcome of one VM's backup sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VmOutcome {
    /// Every step finished; `elapsed` is measured from the start of the run
    Success {
        #[serde(rename = "elapsed_secs", serialize_with = "seconds")]
        elapsed: Duration,
    },

    SnapshotFailed {
        details: String,
    },

    CloneFailed {
        details: String,
    },

    ExportFailed {
        details: String,
    },

    /// A snapshot, clone or export could not be removed
    CleanupFailed {
        details: String,
    },

    SkippedNameTooLong {
        clone_name: String,
        length: usize,
        max_length: usize,
    },

    NotFound,

    /// The connection kept dropping after `attempts` restarts
    ConnectionLost {
        attempts: u32,
        details: String,
    },

    /// An unexpected platform error stopped the whole run during this VM
    Aborted {
        step: String,
        details: String,
    },

    /// The run was aborted before this VM was reached
    NotAttempted,
}

impl VmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Stable snake_case label, as used in the JSON report
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::SnapshotFailed { .. } => "snapshot_failed",
            Self::CloneFailed { .. } => "clone_failed",
            Self::ExportFailed { .. } => "export_failed",
            Self::CleanupFailed { .. } => "cleanup_failed",
            Self::SkippedNameTooLong { .. } => "skipped_name_too_long",
            Self::NotFound => "not_found",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Aborted { .. } => "aborted",
            Self::NotAttempted => "not_attempted",
        }
    }
}

impl fmt::Display for VmOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { elapsed } => write!(f, "success ({})", format_duration(*elapsed)),
            Self::SnapshotFailed { details }
            | Self::CloneFailed { details }
            | Self::ExportFailed { details }
            | Self::CleanupFailed { details } => write!(f, "{}: {details}", self.label()),
            Self::SkippedNameTooLong {
                clone_name,
                length,
                max_length,
            } => write!(
                f,
                "{}: {clone_name} has {length} characters, {max_length} allowed",
                self.label()
            ),
            Self::ConnectionLost { attempts, details } => write!(
                f,
                "{} after {attempts} reconnect attempts: {details}",
                self.label()
            ),
            Self::Aborted { step, details } => {
                write!(f, "{} during {step}: {details}", self.label())
            }
            Self::NotFound | Self::NotAttempted => f.write_str(self.label()),
        }
    }
}

/// Report entry for one configured VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmReport {
    pub vm_name: String,
    #[serde(flatten)]
    pub outcome: VmOutcome,
}

/// Outcomes of one run, one entry per configured VM
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    started_at: DateTime<Local>,
    #[serde(rename = "duration_secs", serialize_with = "optional_seconds")]
    duration: Option<Duration>,
    entries: Vec<VmReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            duration: None,
            entries: Vec::new(),
        }
    }

    /// Record the outcome of `vm_name`, replacing any earlier one
    pub fn record<N: Into<String>>(&mut self, vm_name: N, outcome: VmOutcome) {
        let vm_name = vm_name.into();
        match self.entries.iter_mut().find(|entry| entry.vm_name == vm_name) {
            Some(entry) => entry.outcome = outcome,
            None => self.entries.push(VmReport { vm_name, outcome }),
        }
    }

    pub fn get(&self, vm_name: &str) -> Option<&VmOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.vm_name == vm_name)
            .map(|entry| &entry.outcome)
    }

    pub fn entries(&self) -> &[VmReport] {
        &self.entries
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Order entries like `vm_names`, marking every unrecorded VM as not attempted
    pub fn fill_missing(&mut self, vm_names: &[String]) {
        let mut recorded = std::mem::take(&mut self.entries);
        for name in vm_names {
            let outcome = match recorded.iter().position(|entry| &entry.vm_name == name) {
                Some(index) => recorded.remove(index).outcome,
                None => VmOutcome::NotAttempted,
            };
            self.entries.push(VmReport {
                vm_name: name.clone(),
                outcome,
            });
        }
        self.entries.append(&mut recorded);
    }

    pub fn finish(&mut self, duration: Duration) {
        self.duration = Some(duration);
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|entry| !entry.outcome.is_success())
    }

    /// 0 when every VM succeeded, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_failures())
    }

    /// Human-readable summary, one line per VM plus a total
    pub fn summary_lines(&self) -> Vec<String> {
        let width = self
            .entries
            .iter()
            .map(|entry| entry.vm_name.chars().count())
            .max()
            .unwrap_or(0);

        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        for entry in &self.entries {
            lines.push(format!("{:<width$}  {}", entry.vm_name, entry.outcome));
        }

        let succeeded = self
            .entries
            .iter()
            .filter(|entry| entry.outcome.is_success())
            .count();
        let total = match self.duration {
            Some(duration) => format!(" in {}", format_duration(duration)),
            None => String::new(),
        };
        lines.push(format!(
            "{succeeded} of {} VMs backed up{total}",
            self.entries.len()
        ));
        lines
    }
}

/// `M:SS`, minutes unbounded
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

fn optional_seconds<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => seconds(duration, serializer),
        None => serializer.serialize_none(),
    }
}
