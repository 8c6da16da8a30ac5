use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{B256, Bytes, U256};
use containers::{
    AccountEntry, AccountRange, Block, BlockBody, ChainHead, Header, Receipt, short_hash,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    BlockChain, ImportResult,
    config::ChainConfig,
    generator::{generate_accounts, generate_blocks},
};

#[derive(Debug)]
struct Inner {
    genesis: Header,
    headers: HashMap<B256, Header>,
    bodies: HashMap<B256, BlockBody>,
    receipts: HashMap<B256, Vec<Receipt>>,
    total_difficulty: HashMap<B256, U256>,
    /// Canonical hashes indexed by block number.
    canonical: Vec<B256>,
    snapshot_root: Option<B256>,
    accounts: BTreeMap<B256, Bytes>,
}

impl Inner {
    fn head_hash(&self) -> B256 {
        // canonical always holds at least the genesis hash
        self.canonical[self.canonical.len() - 1]
    }

    fn head(&self) -> ChainHead {
        let hash = self.head_hash();
        let number = (self.canonical.len() - 1) as u64;
        let td = self.total_difficulty.get(&hash).copied().unwrap_or_default();
        ChainHead::new(hash, number, td)
    }

    /// Makes `hash` the canonical head, rewriting canonical entries back to the
    /// fork point. Returns how many old canonical blocks were replaced.
    fn set_canonical_head(&mut self, hash: B256) -> u64 {
        let old_len = self.canonical.len() as u64;
        let mut branch = Vec::new();
        let mut cursor = hash;

        loop {
            let Some(header) = self.headers.get(&cursor) else {
                break;
            };
            let number = header.number as usize;
            if self.canonical.get(number) == Some(&cursor) {
                break;
            }
            branch.push(cursor);
            cursor = header.parent_hash;
        }

        let fork_point = self.headers.get(&cursor).map(|h| h.number).unwrap_or(0);
        self.canonical.truncate(fork_point as usize + 1);
        self.canonical.extend(branch.into_iter().rev());

        old_len.saturating_sub(fork_point + 1)
    }

    fn store_header(&mut self, header: Header, parent_td: U256) -> B256 {
        let hash = header.hash();
        self.total_difficulty
            .insert(hash, parent_td + header.difficulty);
        self.headers.insert(hash, header);
        hash
    }
}

/// In-memory block chain used by the node binary and tests.
///
/// Keeps every imported block (canonical and side chains), the canonical index
/// by number and one flat account snapshot.
#[derive(Debug)]
pub struct MemoryChain {
    inner: RwLock<Inner>,
}

impl MemoryChain {
    pub fn new(genesis: Header) -> Self {
        let hash = genesis.hash();
        let mut inner = Inner {
            genesis: genesis.clone(),
            headers: HashMap::new(),
            bodies: HashMap::new(),
            receipts: HashMap::new(),
            total_difficulty: HashMap::new(),
            canonical: vec![hash],
            snapshot_root: None,
            accounts: BTreeMap::new(),
        };
        inner.total_difficulty.insert(hash, genesis.difficulty);
        inner.headers.insert(hash, genesis);
        inner.bodies.insert(hash, BlockBody::default());
        inner.receipts.insert(hash, Vec::new());

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self::new(config.genesis.clone())
    }

    /// Chain pre-populated with `count` generated blocks and a matching account
    /// snapshot under the head's state root.
    pub fn with_blocks(config: &ChainConfig, count: u64) -> Self {
        let chain = Self::from_config(config);
        for block in generate_blocks(config, &config.genesis, count) {
            chain.insert_block(block);
        }
        if count > 0 {
            let root = chain.current_header().state_root;
            chain.write_accounts(&root, &generate_accounts(count));
        }
        info!(head = %chain.current_head(), "Seeded in-memory chain");
        chain
    }

    pub fn snapshot_root(&self) -> Option<B256> {
        self.inner.read().snapshot_root
    }

    pub fn account_count(&self) -> usize {
        self.inner.read().accounts.len()
    }

    pub fn has_body(&self, hash: &B256) -> bool {
        self.inner.read().bodies.contains_key(hash)
    }
}

impl BlockChain for MemoryChain {
    fn genesis(&self) -> Header {
        self.inner.read().genesis.clone()
    }

    fn current_head(&self) -> ChainHead {
        self.inner.read().head()
    }

    fn current_header(&self) -> Header {
        let inner = self.inner.read();
        inner
            .headers
            .get(&inner.head_hash())
            .cloned()
            .unwrap_or_else(|| inner.genesis.clone())
    }

    fn header_by_hash(&self, hash: &B256) -> Option<Header> {
        self.inner.read().headers.get(hash).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let inner = self.inner.read();
        let hash = inner.canonical.get(number as usize)?;
        inner.headers.get(hash).cloned()
    }

    fn body(&self, hash: &B256) -> Option<BlockBody> {
        self.inner.read().bodies.get(hash).cloned()
    }

    fn receipts(&self, hash: &B256) -> Option<Vec<Receipt>> {
        self.inner.read().receipts.get(hash).cloned()
    }

    fn insert_block(&self, block: Block) -> ImportResult {
        let hash = block.hash();
        let mut inner = self.inner.write();

        if inner.bodies.contains_key(&hash) {
            return ImportResult::KnownAlready;
        }
        if !block.is_consistent() {
            return ImportResult::ValidationError(format!(
                "block #{} payload does not match header roots",
                block.number()
            ));
        }

        let parent_hash = block.header.parent_hash;
        let (Some(parent), Some(parent_td)) = (
            inner.headers.get(&parent_hash),
            inner.total_difficulty.get(&parent_hash).copied(),
        ) else {
            return ImportResult::ValidationError(format!(
                "block #{} has unknown parent {}",
                block.number(),
                short_hash(&parent_hash)
            ));
        };
        if parent.number + 1 != block.number() {
            return ImportResult::ValidationError(format!(
                "block #{} does not follow parent #{}",
                block.number(),
                parent.number
            ));
        }

        let head = inner.head();
        let Block {
            header,
            body,
            receipts,
        } = block;
        inner.store_header(header, parent_td);
        inner.bodies.insert(hash, body);
        inner.receipts.insert(hash, receipts);

        if parent_hash == head.hash {
            inner.canonical.push(hash);
            return ImportResult::Imported;
        }

        let td = inner.total_difficulty[&hash];
        if td > head.total_difficulty {
            let depth = inner.set_canonical_head(hash);
            info!(
                hash = %short_hash(&hash),
                depth,
                "Chain reorganised"
            );
            return ImportResult::Reorg { depth };
        }

        debug!(hash = %short_hash(&hash), "Stored side-chain block");
        ImportResult::Imported
    }

    fn insert_headers(&self, headers: &[Header]) -> ImportResult {
        let mut inner = self.inner.write();
        let mut parent = inner.head_hash();
        let mut imported = 0usize;

        for header in headers {
            let hash = header.hash();
            if inner.headers.contains_key(&hash) {
                parent = hash;
                continue;
            }
            if header.parent_hash != parent {
                return ImportResult::ValidationError(format!(
                    "header #{} does not extend the local head",
                    header.number
                ));
            }
            let parent_td = inner
                .total_difficulty
                .get(&parent)
                .copied()
                .unwrap_or_default();
            inner.store_header(header.clone(), parent_td);
            inner.canonical.push(hash);
            parent = hash;
            imported += 1;
        }

        if imported == 0 {
            ImportResult::KnownAlready
        } else {
            ImportResult::Imported
        }
    }

    fn account_range(&self, root: &B256, origin: &B256, limit: usize) -> AccountRange {
        let inner = self.inner.read();
        if inner.snapshot_root != Some(*root) || limit == 0 {
            return AccountRange::empty();
        }

        let mut iter = inner.accounts.range(*origin..);
        let accounts: Vec<_> = iter
            .by_ref()
            .take(limit)
            .map(|(hash, data)| AccountEntry::new(*hash, data.clone()))
            .collect();
        let more = iter.next().is_some();

        AccountRange { accounts, more }
    }

    fn write_accounts(&self, root: &B256, accounts: &[AccountEntry]) -> usize {
        let mut inner = self.inner.write();
        if inner.snapshot_root != Some(*root) {
            inner.snapshot_root = Some(*root);
            inner.accounts.clear();
        }

        accounts
            .iter()
            .filter(|entry| {
                inner
                    .accounts
                    .insert(entry.hash, entry.data.clone())
                    .is_none()
            })
            .count()
    }
}
