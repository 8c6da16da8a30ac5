pub mod config;
pub mod fork_id;
pub mod generator;
pub mod memory;
pub mod validation;

use alloy_primitives::B256;
use containers::{AccountEntry, AccountRange, Block, BlockBody, ChainHead, Header, Receipt};

pub use config::ChainConfig;
pub use fork_id::{ForkFilter, ForkIdError};
pub use memory::MemoryChain;
pub use validation::{BasicValidator, HeaderValidator, ValidationError};

/// Outcome of handing a block (or header batch) to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResult {
    /// Stored; extends the canonical chain or a lighter side chain.
    Imported,
    KnownAlready,
    /// Stored and became the new canonical head, replacing `depth` blocks.
    Reorg { depth: u64 },
    ValidationError(String),
}

impl ImportResult {
    /// True if the chain now holds data it did not hold before.
    pub fn is_imported(&self) -> bool {
        matches!(self, ImportResult::Imported | ImportResult::Reorg { .. })
    }
}

/// Block storage as seen by the sync core: head queries, lookups used to serve
/// peers, block/header import and the flat account snapshot.
pub trait BlockChain: Send + Sync + 'static {
    fn genesis(&self) -> Header;

    fn current_head(&self) -> ChainHead;

    fn current_header(&self) -> Header;

    fn header_by_hash(&self, hash: &B256) -> Option<Header>;

    /// Canonical header at `number`.
    fn header_by_number(&self, number: u64) -> Option<Header>;

    fn body(&self, hash: &B256) -> Option<BlockBody>;

    fn receipts(&self, hash: &B256) -> Option<Vec<Receipt>>;

    fn insert_block(&self, block: Block) -> ImportResult;

    /// Appends a contiguous header chain to the head without payloads.
    fn insert_headers(&self, headers: &[Header]) -> ImportResult;

    /// Up to `limit` snapshot entries at or after `origin`; empty if the
    /// snapshot for `root` is not held.
    fn account_range(&self, root: &B256, origin: &B256, limit: usize) -> AccountRange;

    /// Stores snapshot entries for `root`, returning how many were new.
    fn write_accounts(&self, root: &B256, accounts: &[AccountEntry]) -> usize;
}
