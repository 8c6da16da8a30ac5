/// Sync orchestrator state machine.
use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No operation running.
    #[default]
    Idle,

    /// Choosing a target peer and sync mode.
    Selecting,

    /// Waiting on headers, bodies, receipts or state from peers.
    ///
    /// An operation whose only candidate peers timed out stays here until a
    /// new peer registers or the operation is cancelled.
    Fetching,

    /// Handing verified blocks to the chain.
    Importing,

    /// Operation aborted on request; nothing further is imported.
    Cancelled,

    /// Operation ended with an error that was reported to the caller.
    Failed,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        match self {
            SyncState::Idle => matches!(target, SyncState::Selecting),
            SyncState::Selecting => matches!(
                target,
                SyncState::Fetching | SyncState::Idle | SyncState::Failed
            ),
            SyncState::Fetching => matches!(
                target,
                SyncState::Importing | SyncState::Cancelled | SyncState::Failed | SyncState::Idle
            ),
            SyncState::Importing => matches!(
                target,
                SyncState::Fetching | SyncState::Idle | SyncState::Cancelled | SyncState::Failed
            ),
            SyncState::Cancelled | SyncState::Failed => matches!(target, SyncState::Idle),
        }
    }
}

/// Shared, lock-protected [`SyncState`] that rejects invalid transitions.
#[derive(Debug, Default)]
pub struct StateCell(Mutex<SyncState>);

impl StateCell {
    pub fn get(&self) -> SyncState {
        *self.0.lock()
    }

    /// Moves to `target` if allowed. A no-op transition to the current state succeeds.
    pub fn transition(&self, target: SyncState) -> bool {
        let mut state = self.0.lock();
        if *state == target {
            return true;
        }
        if !state.can_transition_to(target) {
            warn!(
                from = ?*state,
                to = ?target,
                "Invalid state transition attempted"
            );
            return false;
        }
        debug!(from = ?*state, to = ?target, "Sync state transition");
        *state = target;
        true
    }
}
