// ============================================================================
// File: packages/vm-backup/src/platform/poll.rs
// ----------------------------------------------------------------------------
// Submit-then-poll wait for long-running platform operations.
// ============================================================================

use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use super::errors::PlatformResult;
use super::trait_def::PlatformSession;
use super::types::{OperationHandle, OperationStatus, TerminalStatus};

/// Polling cadence and deadline for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Overall deadline measured from the first status check
    pub timeout: Duration,

    /// Pause between status checks
    pub interval: Duration,
}

impl PollSettings {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Wait until `handle` reaches a terminal state or the deadline passes
///
/// A timeout is reported as [`TerminalStatus::TimedOut`], not as an error;
/// only a failing status query itself yields `Err`. A timeout too large to
/// place on the clock means no deadline.
pub async fn poll(
    session: &dyn PlatformSession,
    handle: &OperationHandle,
    settings: PollSettings,
) -> PlatformResult<TerminalStatus> {
    let deadline = Instant::now().checked_add(settings.timeout);

    loop {
        match session.operation_status(handle).await? {
            OperationStatus::Succeeded => return Ok(TerminalStatus::Succeeded),
            OperationStatus::Failed(details) => return Ok(TerminalStatus::Failed(details)),
            OperationStatus::Pending => {}
        }

        let mut pause = settings.interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Ok(TerminalStatus::TimedOut(settings.timeout));
            }
            pause = pause.min(deadline - now);
        }

        debug!("{} on {} still pending", handle.kind, handle.resource);
        tokio::time::sleep(pause).await;
    }
}
