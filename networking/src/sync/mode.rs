use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SyncMode {
    /// Download and import every block.
    FullSync = 0,
    /// Pull a state snapshot, then import blocks.
    SnapSync = 1,
    /// Headers only.
    LightSync = 2,
}

impl SyncMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncMode::SnapSync,
            2 => SyncMode::LightSync,
            _ => SyncMode::FullSync,
        }
    }

    /// Mode a node actually starts in. Snapshot sync is only useful on an
    /// empty chain, so a node that already holds blocks falls back to full sync.
    pub fn for_chain(requested: SyncMode, head_number: u64) -> SyncMode {
        if requested == SyncMode::SnapSync && head_number > 0 {
            info!(head_number, "Chain not empty, snap sync disabled");
            return SyncMode::FullSync;
        }
        requested
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::FullSync => "full",
            SyncMode::SnapSync => "snap",
            SyncMode::LightSync => "light",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::FullSync),
            "snap" => Ok(SyncMode::SnapSync),
            "light" => Ok(SyncMode::LightSync),
            other => Err(format!("unknown sync mode {other:?} (expected full, snap or light)")),
        }
    }
}

/// Process-wide sync mode, readable from any task without locking.
///
/// The only write is the one-way switch from snap to full sync.
#[derive(Debug)]
pub struct SyncModeFlag(AtomicU8);

impl SyncModeFlag {
    pub fn new(mode: SyncMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> SyncMode {
        SyncMode::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Switches SnapSync to FullSync. Returns true only for the call that flipped it.
    pub fn disable_snap_sync(&self) -> bool {
        self.0
            .compare_exchange(
                SyncMode::SnapSync as u8,
                SyncMode::FullSync as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_only_on_empty_chain() {
        assert_eq!(SyncMode::for_chain(SyncMode::SnapSync, 0), SyncMode::SnapSync);
        assert_eq!(SyncMode::for_chain(SyncMode::SnapSync, 1024), SyncMode::FullSync);
        assert_eq!(SyncMode::for_chain(SyncMode::LightSync, 1024), SyncMode::LightSync);
    }

    #[test]
    fn test_disable_snap_sync_flips_once() {
        let flag = SyncModeFlag::new(SyncMode::SnapSync);
        assert!(flag.disable_snap_sync());
        assert!(!flag.disable_snap_sync());
        assert_eq!(flag.get(), SyncMode::FullSync);
    }

    #[test]
    fn test_disable_snap_sync_leaves_other_modes() {
        let flag = SyncModeFlag::new(SyncMode::LightSync);
        assert!(!flag.disable_snap_sync());
        assert_eq!(flag.get(), SyncMode::LightSync);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Snap".parse::<SyncMode>(), Ok(SyncMode::SnapSync));
        assert!("fast".parse::<SyncMode>().is_err());
    }
}
