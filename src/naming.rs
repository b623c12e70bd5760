// ============================================================================
// File: packages/vm-backup/src/naming.rs
// ----------------------------------------------------------------------------
// Clone VM naming: `<vm_name><middle><suffix>`
// ============================================================================

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// strftime pattern of the per-run suffix, e.g. `_20261019_031500`
pub const SUFFIX_FORMAT: &str = "_%Y%m%d_%H%M%S";

/// Timestamp suffix shared by every clone created during one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSuffix(String);

impl RunSuffix {
    /// Suffix for the given run start time
    pub fn from_time<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(time.format(SUFFIX_FORMAT).to_string())
    }

    /// Suffix for a run starting now, in local time
    pub fn now() -> Self {
        Self::from_time(&Local::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` has the shape of a run suffix
    pub fn matches(candidate: &str) -> bool {
        NaiveDateTime::parse_from_str(candidate, SUFFIX_FORMAT).is_ok()
    }
}

impl fmt::Display for RunSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concatenate `vm_name`, `middle` and `suffix`, in that order
pub fn generate(vm_name: &str, middle: &str, suffix: &str) -> String {
    format!("{vm_name}{middle}{suffix}")
}

/// Length in characters; names at exactly `max_length` are accepted
pub fn validate_length(clone_name: &str, max_length: usize) -> bool {
    clone_name.chars().count() <= max_length
}

/// Derives clone names for one run
#[derive(Debug, Clone)]
pub struct NameGenerator {
    middle: String,
    suffix: RunSuffix,
    max_length: usize,
}

impl NameGenerator {
    pub fn new<M: Into<String>>(middle: M, suffix: RunSuffix, max_length: usize) -> Self {
        Self {
            middle: middle.into(),
            suffix,
            max_length,
        }
    }

    /// Clone name for `vm_name` in this run
    pub fn clone_name(&self, vm_name: &str) -> String {
        generate(vm_name, &self.middle, self.suffix.as_str())
    }

    /// Clone name for `vm_name`, or the offending length if it is too long
    pub fn checked_clone_name(&self, vm_name: &str) -> Result<String, NameTooLong> {
        let name = self.clone_name(vm_name);
        if validate_length(&name, self.max_length) {
            Ok(name)
        } else {
            Err(NameTooLong {
                length: name.chars().count(),
                max_length: self.max_length,
                name,
            })
        }
    }

    /// Search prefix shared by every clone of `vm_name`, across runs
    pub fn clone_prefix(&self, vm_name: &str) -> String {
        format!("{vm_name}{}", self.middle)
    }

    /// Whether `candidate` is a clone of `vm_name` from any run
    ///
    /// Requires the exact `<vm_name><middle>` prefix followed by a
    /// well-formed run suffix, so the source VM and unrelated VMs that
    /// merely share a prefix never match.
    pub fn is_clone_of(&self, candidate: &str, vm_name: &str) -> bool {
        candidate
            .strip_prefix(vm_name)
            .and_then(|rest| rest.strip_prefix(self.middle.as_str()))
            .is_some_and(RunSuffix::matches)
    }

    pub fn suffix(&self) -> &RunSuffix {
        &self.suffix
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

/// Generated clone name exceeds the platform naming limit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Clone name {name} is {length} characters long, {max_length} allowed")]
pub struct NameTooLong {
    pub name: String,
    pub length: usize,
    pub max_length: usize,
}
