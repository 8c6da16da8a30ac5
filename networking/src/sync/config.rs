/// Sync service configuration constants.
///
/// Operational parameters for synchronization: batch sizes, timeouts, and limits.
use std::time::Duration;

/// Headers requested per batch.
pub const MAX_HEADER_FETCH: u64 = 192;

/// Block bodies requested per message.
pub const MAX_BODY_FETCH: usize = 128;

/// Receipt lists requested per message.
pub const MAX_RECEIPT_FETCH: usize = 256;

/// Snapshot accounts requested per range.
pub const MAX_ACCOUNT_FETCH: u64 = 256;

/// Upper bounds on what we answer to a single peer request.
pub const MAX_HEADERS_SERVE: u64 = 1024;
pub const MAX_BODIES_SERVE: usize = 1024;
pub const MAX_RECEIPTS_SERVE: usize = 1024;
pub const MAX_ACCOUNTS_SERVE: u64 = 1024;

/// Interval between sync target evaluations (in seconds).
pub const SYNC_TICK_INTERVAL_SECS: u64 = 10;

/// Time allowed for hello and status exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout count at which a peer is only used when nobody else can serve.
pub const MAX_PEER_TIMEOUTS: u32 = 3;

/// Consecutive successful responses that work off one timeout.
pub const TIMEOUT_DECAY_SUCCESSES: u32 = 4;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Deadline for a single request, measured from when it was sent.
    pub request_timeout: Duration,
    /// Concurrency ceilings per request kind.
    pub max_header_requests: usize,
    pub max_body_requests: usize,
    pub max_receipt_requests: usize,
    pub max_account_requests: usize,
    pub tick_interval: Duration,
}

impl SyncConfig {
    /// Short timeouts for in-process peers and tests.
    pub fn for_local() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            tick_interval: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_header_requests: 2,
            max_body_requests: 4,
            max_receipt_requests: 4,
            max_account_requests: 2,
            tick_interval: Duration::from_secs(SYNC_TICK_INTERVAL_SECS),
        }
    }
}
