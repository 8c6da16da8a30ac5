use serde::{Deserialize, Serialize};

use crate::serde_utils::quoted;

/// Snapshot of what the current (or last) sync operation has achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    #[serde(with = "quoted")]
    pub starting_block: u64,
    #[serde(with = "quoted")]
    pub current_block: u64,
    #[serde(with = "quoted")]
    pub highest_block: u64,
    #[serde(with = "quoted")]
    pub pulled_states: u64,
    #[serde(with = "quoted")]
    pub known_states: u64,
}

impl SyncProgress {
    pub fn starting_at(block: u64) -> Self {
        Self {
            starting_block: block,
            current_block: block,
            highest_block: block,
            ..Self::default()
        }
    }
}
