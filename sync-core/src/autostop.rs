//! Auto-stop of data sync after a quiet period.

use crate::enabled::AutostopAction;
use offgrid_sync_types::SyncError;
use std::time::{Duration, Instant};

/// Longest accepted auto-stop timeout, in milliseconds (largest signed
/// 32-bit timer delay).
pub const MAX_AUTOSTOP_MS: u64 = (1 << 31) - 1;

/// Check an auto-stop timeout: `None` disables auto-stop, otherwise it must
/// be a whole number of milliseconds in `1..=MAX_AUTOSTOP_MS`.
pub fn validate_autostop(after: Option<Duration>) -> Result<Option<Duration>, SyncError> {
    let Some(after) = after else {
        return Ok(None);
    };
    let nanos = after.as_nanos();
    let whole_ms = nanos % 1_000_000 == 0;
    let ms = after.as_millis();
    if !whole_ms || ms == 0 || ms > u128::from(MAX_AUTOSTOP_MS) {
        return Err(SyncError::InvalidAutostopTimeout {
            nanos,
            max_ms: MAX_AUTOSTOP_MS,
        });
    }
    Ok(Some(after))
}

/// Auto-stop timer state.
///
/// The timer is armed while sync is complete and data sync is wanted. It is
/// cancelled whenever the local data "have" count changes, so it only fires
/// after a full quiet period.
#[derive(Debug, Clone, Default)]
pub struct Autostop {
    after: Option<Duration>,
    deadline: Option<Instant>,
    previous_data_have: Option<u64>,
}

impl Autostop {
    /// Auto-stop disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured timeout.
    pub fn after(&self) -> Option<Duration> {
        self.after
    }

    /// Change the timeout. Cancels a running timer; the next evaluation
    /// re-arms it with the new value if appropriate.
    pub fn set_after(&mut self, after: Option<Duration>) {
        self.cancel();
        self.after = after;
    }

    /// Record the current local data "have" count. Any change cancels the
    /// timer. Returns whether the count changed.
    pub fn observe_data_have(&mut self, have: u64) -> bool {
        let changed = self.previous_data_have != Some(have);
        if changed {
            self.cancel();
        }
        self.previous_data_have = Some(have);
        changed
    }

    /// Apply the action from a state-machine evaluation. Arming an already
    /// running timer leaves its deadline untouched.
    pub fn apply(&mut self, action: AutostopAction, now: Instant) {
        match action {
            AutostopAction::Arm => {
                if let (Some(after), None) = (self.after, self.deadline) {
                    self.deadline = Some(now + after);
                }
            }
            AutostopAction::Cancel => self.cancel(),
        }
    }

    /// When the timer fires, if running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is running.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Fire the timer if its deadline has passed. Returns `true` exactly once
    /// per arming.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }
}
