//! One sync operation: target lookup, common ancestor search, optional state
//! snapshot download, then header batches with their bodies and receipts.
use std::collections::{HashMap, HashSet};

use alloy_primitives::B256;
use chain::{BlockChain, ImportResult};
use containers::{AccountRange, Block, BlockBody, Header, Receipt, receipts_root, short_hash};
use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    config::{MAX_ACCOUNT_FETCH, MAX_BODY_FETCH, MAX_HEADER_FETCH, MAX_RECEIPT_FETCH},
    fetcher::{FetchError, FetchRequest, FetchResponse},
    mode::SyncMode,
    service::{SyncError, SyncOperation, SyncService},
    states::SyncState,
};
use crate::{types::PeerId, wire::HashOrNumber};

pub(super) struct Downloader<'a, C: BlockChain> {
    service: &'a SyncService<C>,
    op: &'a SyncOperation,
    cancel: &'a CancellationToken,
    /// Asked first for headers and state; cleared once it times out.
    primary: Mutex<Option<PeerId>>,
}

impl<'a, C: BlockChain> Downloader<'a, C> {
    pub(super) fn new(
        service: &'a SyncService<C>,
        op: &'a SyncOperation,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            service,
            op,
            cancel,
            primary: Mutex::new(Some(op.peer)),
        }
    }

    /// Returns the number of blocks (or headers, in light mode) imported.
    pub(super) async fn run(&self) -> Result<u64, SyncError> {
        self.service.state.transition(SyncState::Fetching);

        let target = self.fetch_target().await?;
        self.service.progress.lock().highest_block = target.number;
        self.service.metrics.set_highest_block(target.number as i64);

        let ancestor = self.find_common_ancestor(target.number).await?;
        let ancestor = self
            .service
            .chain
            .header_by_number(ancestor)
            .ok_or_else(|| SyncError::InvalidHeader(format!("local header #{ancestor} missing")))?;
        info!(
            peer = %self.op.peer,
            target = target.number,
            ancestor = ancestor.number,
            mode = %self.op.mode,
            "Downloading chain"
        );

        let target_has_snap = self
            .service
            .peers
            .lock()
            .get(&self.op.peer)
            .is_some_and(|peer| peer.has_snap());
        if self.op.mode == SyncMode::SnapSync && target_has_snap {
            self.sync_state(&target).await?;
        }

        let mut headers = HeaderStream::new(ancestor, &target);
        let mut imported = 0;
        while let Some(batch) = headers.next_batch(self).await? {
            imported += match self.op.mode {
                SyncMode::LightSync => self.import_headers(&batch)?,
                _ => self.import_blocks(batch).await?,
            };
        }
        Ok(imported)
    }

    async fn fetch_target(&self) -> Result<Header, SyncError> {
        let head = self.op.head;
        let request = FetchRequest::Headers {
            start: HashOrNumber::Hash(head),
            limit: 1,
            skip: 0,
            reverse: false,
        };
        self.request(true, request, |response| match response {
            FetchResponse::Headers(mut headers) if headers.len() == 1 && headers[0].hash() == head => {
                headers.pop()
            }
            _ => None,
        })
        .await
    }

    async fn remote_header(&self, number: u64) -> Result<Header, SyncError> {
        let request = FetchRequest::Headers {
            start: HashOrNumber::Number(number),
            limit: 1,
            skip: 0,
            reverse: false,
        };
        self.request(true, request, |response| match response {
            FetchResponse::Headers(mut headers)
                if headers.len() == 1 && headers[0].number == number =>
            {
                headers.pop()
            }
            _ => None,
        })
        .await
    }

    fn is_local(&self, header: &Header) -> bool {
        self.service
            .chain
            .header_by_number(header.number)
            .is_some_and(|local| local.hash() == header.hash())
    }

    /// Highest block number both chains share, by binary search over the local
    /// canonical chain. Genesis is shared by construction.
    async fn find_common_ancestor(&self, remote_height: u64) -> Result<u64, SyncError> {
        let local_height = self.service.chain.current_head().number;
        let ceiling = local_height.min(remote_height);
        if ceiling == 0 {
            return Ok(0);
        }
        if self.is_local(&self.remote_header(ceiling).await?) {
            return Ok(ceiling);
        }

        let (mut low, mut high) = (0, ceiling);
        while low + 1 < high {
            let mid = low + (high - low) / 2;
            if self.is_local(&self.remote_header(mid).await?) {
                low = mid;
            } else {
                high = mid;
            }
        }
        debug!(peer = %self.op.peer, ancestor = low, "Common ancestor found");
        Ok(low)
    }

    /// Pulls the account snapshot behind `target`. Skipped with a warning when
    /// no peer serves it.
    async fn sync_state(&self, target: &Header) -> Result<(), SyncError> {
        let root = target.state_root;
        let mut origin = B256::ZERO;

        loop {
            let request = FetchRequest::AccountRange {
                root,
                origin,
                limit: MAX_ACCOUNT_FETCH,
            };
            let range = self
                .request(true, request, |response| match response {
                    FetchResponse::AccountRange(range) if is_usable_range(&range, &origin) => {
                        Some(range)
                    }
                    _ => None,
                })
                .await;
            let range = match range {
                Ok(range) => range,
                Err(SyncError::NoPeers) => {
                    warn!(root = %short_hash(&root), "No peer serves the state snapshot");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            let written = self.service.chain.write_accounts(&root, &range.accounts);
            let pulled = {
                let mut progress = self.service.progress.lock();
                progress.pulled_states += written as u64;
                progress.known_states += range.len() as u64;
                progress.pulled_states
            };
            debug!(accounts = range.len(), written, pulled, "Account range stored");

            match range.next_origin() {
                Some(next) if range.more => origin = next,
                _ => break,
            }
        }

        info!(
            root = %short_hash(&root),
            accounts = self.service.progress.lock().pulled_states,
            "State snapshot downloaded"
        );
        Ok(())
    }

    fn import_headers(&self, headers: &[Header]) -> Result<u64, SyncError> {
        let Some(last) = headers.last() else {
            return Ok(0);
        };
        let imported = match self.service.chain.insert_headers(headers) {
            ImportResult::Imported | ImportResult::Reorg { .. } => headers.len() as u64,
            ImportResult::KnownAlready => 0,
            ImportResult::ValidationError(reason) => {
                return Err(SyncError::ImportRejected {
                    number: headers[0].number,
                    reason,
                });
            }
        };
        self.service.progress.lock().current_block = last.number;
        self.service.metrics.set_current_block(last.number as i64);
        self.service.metrics.inc_imported_blocks(imported);
        Ok(imported)
    }

    async fn import_blocks(&self, headers: Vec<Header>) -> Result<u64, SyncError> {
        let (mut bodies, mut receipts) =
            tokio::try_join!(self.fetch_bodies(&headers), self.fetch_receipts(&headers))?;

        self.service.state.transition(SyncState::Importing);
        let mut imported = 0;
        for header in headers {
            if self.cancel.is_cancelled() {
                self.service.metrics.inc_imported_blocks(imported);
                return Err(SyncError::Cancelled);
            }

            let hash = header.hash();
            let number = header.number;
            let body = bodies.remove(&hash).unwrap_or_default();
            let block_receipts = receipts.remove(&hash).unwrap_or_default();

            match self
                .service
                .chain
                .insert_block(Block::new(header, body, block_receipts))
            {
                ImportResult::Imported => {
                    imported += 1;
                    self.on_block_imported(number);
                }
                ImportResult::Reorg { depth } => {
                    imported += 1;
                    info!(number, depth, hash = %short_hash(&hash), "Reorganised onto downloaded chain");
                    self.on_block_imported(number);
                }
                ImportResult::KnownAlready => {}
                ImportResult::ValidationError(reason) => {
                    self.service.metrics.inc_imported_blocks(imported);
                    return Err(SyncError::ImportRejected { number, reason });
                }
            }

            self.service.progress.lock().current_block = number;
            self.service.metrics.set_current_block(number as i64);
        }

        self.service.metrics.inc_imported_blocks(imported);
        self.service.state.transition(SyncState::Fetching);
        Ok(imported)
    }

    fn on_block_imported(&self, number: u64) {
        if self.service.mode.disable_snap_sync() {
            info!(number, "First block imported, switching to full sync");
            self.service.metrics.set_sync_mode(SyncMode::FullSync as i64);
        }
    }

    async fn fetch_bodies(&self, headers: &[Header]) -> Result<HashMap<B256, BlockBody>, SyncError> {
        let wanted: Vec<&Header> = headers.iter().filter(|h| !h.has_empty_body()).collect();
        let chunks = wanted
            .chunks(MAX_BODY_FETCH)
            .map(|chunk| self.fetch_body_chunk(chunk));
        Ok(try_join_all(chunks).await?.into_iter().flatten().collect())
    }

    async fn fetch_body_chunk(&self, chunk: &[&Header]) -> Result<Vec<(B256, BlockBody)>, SyncError> {
        let mut missing = chunk.to_vec();
        let mut found = Vec::with_capacity(chunk.len());

        while !missing.is_empty() {
            let hashes = missing.iter().map(|header| header.hash()).collect();
            let matched = self
                .request(false, FetchRequest::Bodies(hashes), |response| match response {
                    FetchResponse::Bodies(bodies) => {
                        let matched = associate(&missing, bodies, |body, header| body.matches(header));
                        (!matched.is_empty()).then_some(matched)
                    }
                    _ => None,
                })
                .await?;
            let delivered: HashSet<B256> = matched.iter().map(|(hash, _)| *hash).collect();
            missing.retain(|header| !delivered.contains(&header.hash()));
            found.extend(matched);
        }
        Ok(found)
    }

    async fn fetch_receipts(
        &self,
        headers: &[Header],
    ) -> Result<HashMap<B256, Vec<Receipt>>, SyncError> {
        let wanted: Vec<&Header> = headers.iter().filter(|h| !h.has_empty_receipts()).collect();
        let chunks = wanted
            .chunks(MAX_RECEIPT_FETCH)
            .map(|chunk| self.fetch_receipt_chunk(chunk));
        Ok(try_join_all(chunks).await?.into_iter().flatten().collect())
    }

    async fn fetch_receipt_chunk(
        &self,
        chunk: &[&Header],
    ) -> Result<Vec<(B256, Vec<Receipt>)>, SyncError> {
        let mut missing = chunk.to_vec();
        let mut found = Vec::with_capacity(chunk.len());

        while !missing.is_empty() {
            let hashes = missing.iter().map(|header| header.hash()).collect();
            let matched = self
                .request(false, FetchRequest::Receipts(hashes), |response| match response {
                    FetchResponse::Receipts(receipts) => {
                        let matched = associate(&missing, receipts, |items, header| {
                            receipts_root(items) == header.receipts_root
                        });
                        (!matched.is_empty()).then_some(matched)
                    }
                    _ => None,
                })
                .await?;
            let delivered: HashSet<B256> = matched.iter().map(|(hash, _)| *hash).collect();
            missing.retain(|header| !delivered.contains(&header.hash()));
            found.extend(matched);
        }
        Ok(found)
    }

    /// Sends `request` until some peer answers with something `accept` takes.
    ///
    /// With `use_primary` the operation's primary peer is asked first. Peers that
    /// time out or answer with unusable data are not asked again within this call.
    /// When every peer has been tried and at least one of them timed out, waits for
    /// a new peer to register.
    async fn request<T>(
        &self,
        use_primary: bool,
        request: FetchRequest,
        accept: impl Fn(FetchResponse) -> Option<T>,
    ) -> Result<T, SyncError> {
        let kind = request.kind();
        let mut exclude = HashSet::new();
        let mut timed_out = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            // subscribe before looking so a registration in between is not missed
            let mut joined = self.service.peer_epoch.subscribe();
            let preferred = if use_primary { *self.primary.lock() } else { None };
            let peer = {
                let peers = self.service.peers.lock();
                preferred
                    .filter(|peer| !exclude.contains(peer) && peers.can_serve(peer, kind))
                    .or_else(|| peers.select_peer_for_request(kind, &exclude))
            };
            let Some(peer) = peer else {
                if !timed_out {
                    return Err(SyncError::NoPeers);
                }
                debug!(%kind, "All peers tried, waiting for a new one");
                tokio::select! {
                    _ = joined.changed() => continue,
                    _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                }
            };

            match self.service.fetcher.fetch(peer, request.clone(), self.cancel).await {
                Ok(response) => match accept(response) {
                    Some(value) => return Ok(value),
                    None => {
                        debug!(peer = %peer, %kind, "Unusable response");
                        exclude.insert(peer);
                    }
                },
                Err(FetchError::Cancelled) => return Err(SyncError::Cancelled),
                Err(FetchError::Timeout(_)) => {
                    timed_out = true;
                    exclude.insert(peer);
                    let mut primary = self.primary.lock();
                    if *primary == Some(peer) {
                        debug!(peer = %peer, "Primary peer timed out, spreading requests");
                        *primary = None;
                    }
                }
                Err(err) => {
                    debug!(peer = %peer, %kind, %err, "Request failed");
                    exclude.insert(peer);
                }
            }
        }
    }
}

/// Pairs each item with the first still-open header it commits to.
fn associate<'h, T>(
    headers: &[&'h Header],
    items: Vec<T>,
    matches: impl Fn(&T, &Header) -> bool,
) -> Vec<(B256, T)> {
    let mut open: Vec<&'h Header> = headers.to_vec();
    let mut matched = Vec::new();
    for item in items {
        if let Some(pos) = open.iter().position(|header| matches(&item, header)) {
            let header = open.swap_remove(pos);
            matched.push((header.hash(), item));
        }
    }
    matched
}

fn is_usable_range(range: &AccountRange, origin: &B256) -> bool {
    !range.is_empty()
        && range.accounts[0].hash >= *origin
        && range.accounts.windows(2).all(|pair| pair[0].hash < pair[1].hash)
}

/// Lazily yields validated, contiguous header batches from the ancestor up to the
/// target. Once exhausted it stays exhausted.
struct HeaderStream {
    parent: Header,
    target_number: u64,
    target_hash: B256,
    done: bool,
}

impl HeaderStream {
    fn new(ancestor: Header, target: &Header) -> Self {
        Self {
            parent: ancestor,
            target_number: target.number,
            target_hash: target.hash(),
            done: false,
        }
    }

    async fn next_batch<C: BlockChain>(
        &mut self,
        downloader: &Downloader<'_, C>,
    ) -> Result<Option<Vec<Header>>, SyncError> {
        if self.done || self.parent.number >= self.target_number {
            self.done = true;
            return Ok(None);
        }

        let start = self.parent.number + 1;
        let limit = (self.target_number - self.parent.number).min(MAX_HEADER_FETCH);
        let parent_hash = self.parent.hash();
        let request = FetchRequest::Headers {
            start: HashOrNumber::Number(start),
            limit,
            skip: 0,
            reverse: false,
        };
        let headers = downloader
            .request(true, request, |response| match response {
                FetchResponse::Headers(headers)
                    if headers.len() as u64 == limit && is_linked(&headers, parent_hash) =>
                {
                    Some(headers)
                }
                _ => None,
            })
            .await?;

        let mut parent = &self.parent;
        for header in &headers {
            downloader
                .service
                .validator
                .validate_header(header, parent)
                .map_err(|err| SyncError::InvalidHeader(err.to_string()))?;
            parent = header;
        }

        let Some(last) = headers.last().cloned() else {
            self.done = true;
            return Ok(None);
        };
        if last.number == self.target_number {
            self.done = true;
            if last.hash() != self.target_hash {
                return Err(SyncError::InvalidHeader(format!(
                    "chain ends at {} instead of the announced head",
                    short_hash(&last.hash())
                )));
            }
        }
        debug!(from = start, to = last.number, "Header batch validated");
        self.parent = last;
        Ok(Some(headers))
    }
}

fn is_linked(headers: &[Header], parent_hash: B256) -> bool {
    headers.first().is_some_and(|first| first.parent_hash == parent_hash)
        && headers
            .windows(2)
            .all(|pair| pair[1].parent_hash == pair[0].hash())
}
