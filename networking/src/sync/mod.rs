/// Chain synchronisation against connected peers.
///
/// - **Peer Manager**: Tracks every peer's advertised head and reliability
/// - **Fetcher**: Matches responses to in-flight requests, with per-kind
///   concurrency ceilings and per-request timeouts
/// - **Downloader**: Runs one sync operation: target lookup, common ancestor
///   search, state snapshot, header batches, bodies and receipts
/// - **Sync Service**: Single-flight orchestration and the one-way sync mode flag
///
/// ## State Machine
///
/// - **IDLE**: No operation running
/// - **SELECTING**: Picking the target and checking it is ahead of us
/// - **FETCHING**: Waiting on peers for headers, bodies, receipts or accounts
/// - **IMPORTING**: Handing verified blocks to the chain
/// - **CANCELLED** / **FAILED**: Terminal for one operation, always followed by IDLE
pub mod config;
pub mod downloader;
pub mod fetcher;
pub mod mode;
pub mod peer_manager;
pub mod progress;
pub mod service;
pub mod states;

pub use config::*;
pub use fetcher::{FetchError, FetchKind, FetchRequest, FetchResponse, Fetcher, RequestSender};
pub use mode::{SyncMode, SyncModeFlag};
pub use peer_manager::{PeerManager, SyncPeer};
pub use progress::SyncProgress;
pub use service::{SyncError, SyncOperation, SyncOutcome, SyncService};
pub use states::{StateCell, SyncState};

#[cfg(test)]
mod tests;
