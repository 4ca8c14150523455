//! The sync-enabled state machine.
//!
//! Three inputs decide which namespaces are synced:
//!
//! | wants data | full stop requested | synced | state   | autostop |
//! |------------|---------------------|--------|---------|----------|
//! | no         | no                  | any    | presync | cancel   |
//! | no         | yes                 | no     | presync | cancel   |
//! | no         | yes                 | yes    | none    | cancel   |
//! | yes        | no                  | no     | all     | cancel   |
//! | yes        | no                  | yes    | all     | arm      |
//! | yes        | yes                 | no     | all     | cancel   |
//! | yes        | yes                 | yes    | none    | cancel   |
//!
//! Once a full stop has brought sync to `none`, it stays `none` until the
//! request is rescinded, even if peers later report new data.

use offgrid_sync_types::{SyncEnabledState, SyncType};

/// What to do with the autostop timer after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutostopAction {
    /// Start the timer if configured and not already running.
    Arm,
    /// Stop the timer if running.
    Cancel,
}

/// Result of evaluating the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// New enabled state.
    pub state: SyncEnabledState,
    /// Autostop timer action.
    pub autostop: AutostopAction,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInputs {
    /// The user asked to sync data (`start`) and has not stopped.
    pub wants_to_sync_data: bool,
    /// The app asked for all sync to wind down (e.g. backgrounded).
    pub has_requested_full_stop: bool,
    /// Nothing is left to sync for the current target.
    pub is_synced: bool,
}

impl SyncInputs {
    /// Look up the row for these inputs.
    pub fn evaluate(&self) -> Transition {
        let state = match (
            self.wants_to_sync_data,
            self.has_requested_full_stop,
            self.is_synced,
        ) {
            (_, true, true) => SyncEnabledState::None,
            (false, _, _) => SyncEnabledState::Presync,
            (true, _, _) => SyncEnabledState::All,
        };
        let autostop =
            if self.wants_to_sync_data && !self.has_requested_full_stop && self.is_synced {
                AutostopAction::Arm
            } else {
                AutostopAction::Cancel
            };
        Transition { state, autostop }
    }
}

/// The enabled state plus the user inputs that drive it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enablement {
    wants_to_sync_data: bool,
    has_requested_full_stop: bool,
    current: SyncEnabledState,
}

impl Enablement {
    /// Nothing requested yet; state is `none` until the first evaluation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask to sync data.
    pub fn start(&mut self) {
        self.wants_to_sync_data = true;
    }

    /// Stop syncing data (presync continues unless fully stopped).
    pub fn stop(&mut self) {
        self.wants_to_sync_data = false;
    }

    /// Ask for all sync to wind down once synced.
    pub fn request_full_stop(&mut self) {
        self.has_requested_full_stop = true;
    }

    /// Withdraw a full-stop request.
    pub fn rescind_full_stop(&mut self) {
        self.has_requested_full_stop = false;
    }

    /// Whether data sync has been requested.
    pub fn wants_to_sync_data(&self) -> bool {
        self.wants_to_sync_data
    }

    /// Whether a full stop is pending or in effect.
    pub fn has_requested_full_stop(&self) -> bool {
        self.has_requested_full_stop
    }

    /// The state produced by the last evaluation.
    pub fn current(&self) -> SyncEnabledState {
        self.current
    }

    /// What "synced" is measured against for the next evaluation.
    pub fn target(&self) -> SyncType {
        if self.wants_to_sync_data {
            SyncType::Full
        } else {
            SyncType::Initial
        }
    }

    /// Whether the next evaluation ignores the synced input.
    pub fn is_held(&self) -> bool {
        self.has_requested_full_stop && self.current == SyncEnabledState::None
    }

    /// Evaluate against the synced status of [`Enablement::target`] and
    /// record the new state.
    pub fn evaluate(&mut self, is_synced: bool) -> Transition {
        let transition = if self.is_held() {
            Transition {
                state: SyncEnabledState::None,
                autostop: AutostopAction::Cancel,
            }
        } else {
            SyncInputs {
                wants_to_sync_data: self.wants_to_sync_data,
                has_requested_full_stop: self.has_requested_full_stop,
                is_synced,
            }
            .evaluate()
        };
        self.current = transition.state;
        transition
    }
}
