use std::{sync::Arc, time::Duration};

use chain::{BlockChain, ChainConfig, MemoryChain};
use pretty_assertions::assert_eq;

use super::{Behaviour, MockPeer, empty_chain, seeded_chain, service_with, wait_until};
use crate::{
    sync::{
        SyncConfig, SyncError, SyncMode, SyncModeFlag, SyncOperation, SyncOutcome, SyncState,
    },
    types::PeerId,
};

fn operation(mode: SyncMode, peer: PeerId, remote: &MemoryChain) -> SyncOperation {
    let head = remote.current_head();
    SyncOperation {
        mode,
        peer,
        head: head.hash,
        total_difficulty: head.total_difficulty,
    }
}

#[tokio::test]
async fn test_service_creation() {
    let service = service_with(empty_chain(), SyncMode::SnapSync, SyncConfig::for_local());
    assert_eq!(service.state(), SyncState::Idle);
    assert_eq!(service.mode(), SyncMode::SnapSync);
    assert_eq!(service.progress().highest_block, 0);
}

#[tokio::test]
async fn test_non_empty_chain_never_starts_in_snap_sync() {
    let local = MemoryChain::with_blocks(&ChainConfig::devnet(), 1024);
    let service = service_with(local, SyncMode::SnapSync, SyncConfig::for_local());
    assert_eq!(service.mode(), SyncMode::FullSync);
}

#[tokio::test]
async fn test_target_is_heaviest_peer_until_it_leaves() {
    let service = service_with(empty_chain(), SyncMode::FullSync, SyncConfig::for_local());
    let short = MockPeer::spawn(&service, seeded_chain(4), Behaviour::Serve, false);
    let long = MockPeer::spawn(&service, seeded_chain(8), Behaviour::Serve, false);

    assert_eq!(service.best_operation().map(|op| op.peer), Some(long.id));

    service.unregister_peer(&long.id);
    assert_eq!(service.best_operation().map(|op| op.peer), Some(short.id));

    service.unregister_peer(&short.id);
    assert_eq!(service.best_operation(), None);
    assert_eq!(service.metrics.peers(), 0);
}

#[tokio::test]
async fn test_full_sync_imports_remote_chain() {
    let service = service_with(empty_chain(), SyncMode::FullSync, SyncConfig::for_local());
    let remote = seeded_chain(12);
    let peer = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, false);

    let outcome = service.synchronise(peer.id, SyncMode::FullSync).await;

    assert_eq!(outcome, Ok(SyncOutcome::Completed { imported: 12 }));
    assert_eq!(service.chain().current_head(), remote.current_head());
    assert_eq!(service.state(), SyncState::Idle);
    let progress = service.progress();
    assert_eq!(progress.current_block, 12);
    assert_eq!(progress.highest_block, 12);
    assert_eq!(service.metrics.imported_blocks(), 12);
    assert_eq!(service.metrics.sync_operations("completed"), 1);
}

#[tokio::test]
async fn test_snap_sync_downloads_state_then_switches_to_full() {
    let service = service_with(empty_chain(), SyncMode::SnapSync, SyncConfig::for_local());
    let remote = seeded_chain(10);
    let _peer = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, true);

    let op = service.best_operation().unwrap();
    assert_eq!(op.mode, SyncMode::SnapSync);

    let outcome = service.do_sync(op).await;

    assert_eq!(outcome, Ok(SyncOutcome::Completed { imported: 10 }));
    assert_eq!(service.mode(), SyncMode::FullSync);
    assert_eq!(service.chain().snapshot_root(), remote.snapshot_root());
    assert_eq!(service.chain().account_count(), 10);
    assert_eq!(service.progress().pulled_states, 10);
    assert_eq!(service.metrics.sync_mode(), SyncMode::FullSync as i64);
}

#[tokio::test]
async fn test_light_sync_stores_headers_only() {
    let service = service_with(empty_chain(), SyncMode::LightSync, SyncConfig::for_local());
    let remote = seeded_chain(8);
    let peer = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let outcome = service.synchronise(peer.id, SyncMode::LightSync).await;

    assert_eq!(outcome, Ok(SyncOutcome::Completed { imported: 8 }));
    let head = service.chain().current_header();
    assert_eq!(head, remote.current_header());
    assert!(!service.chain().has_body(&service.chain().header_by_number(1).unwrap().hash()));
    assert_eq!(service.mode(), SyncMode::LightSync);
}

#[tokio::test]
async fn test_up_to_date_and_unknown_peer() {
    let local = MemoryChain::with_blocks(&ChainConfig::devnet(), 6);
    let service = service_with(local, SyncMode::FullSync, SyncConfig::for_local());
    let peer = MockPeer::spawn(&service, seeded_chain(6), Behaviour::Serve, false);

    assert_eq!(
        service.synchronise(peer.id, SyncMode::FullSync).await,
        Ok(SyncOutcome::UpToDate)
    );
    assert_eq!(service.state(), SyncState::Idle);

    let stranger = PeerId::random();
    assert_eq!(
        service.synchronise(stranger, SyncMode::FullSync).await,
        Err(SyncError::UnknownPeer(stranger))
    );
}

#[tokio::test]
async fn test_invalid_header_fails_operation() {
    let mut config = ChainConfig::devnet();
    config.block_period_secs = 0;
    let remote = Arc::new(MemoryChain::with_blocks(&config, 3));
    let service = service_with(empty_chain(), SyncMode::FullSync, SyncConfig::for_local());
    let peer = MockPeer::spawn(&service, remote, Behaviour::Serve, false);

    let outcome = service.synchronise(peer.id, SyncMode::FullSync).await;

    assert!(matches!(outcome, Err(SyncError::InvalidHeader(_))));
    assert_eq!(service.state(), SyncState::Idle);
    assert_eq!(service.chain().current_head().number, 0);
    assert_eq!(service.metrics.sync_operations("failed"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mode_flag_is_monotonic() {
    let flag = Arc::new(SyncModeFlag::new(SyncMode::SnapSync));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let flag = flag.clone();
            tokio::spawn(async move {
                let mut seen_full = false;
                for _ in 0..2_000 {
                    match flag.get() {
                        SyncMode::FullSync => seen_full = true,
                        SyncMode::SnapSync => assert!(!seen_full, "flag went back to snap"),
                        SyncMode::LightSync => panic!("flag never holds light here"),
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let flag = flag.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                flag.disable_snap_sync()
            })
        })
        .collect();

    let mut flips = 0;
    for writer in writers {
        if writer.await.unwrap() {
            flips += 1;
        }
    }
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(flips, 1);
    assert_eq!(flag.get(), SyncMode::FullSync);
    assert!(!flag.disable_snap_sync());
}

#[tokio::test]
async fn test_timeout_retries_once_on_another_peer() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_millis(100));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let silent = MockPeer::spawn(&service, remote.clone(), Behaviour::Silent, false);
    let _serving = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, false);

    let outcome = service
        .do_sync(operation(SyncMode::FullSync, silent.id, &remote))
        .await;

    assert_eq!(outcome, Ok(SyncOutcome::Completed { imported: 8 }));
    assert_eq!(service.metrics.timeout_count("headers"), 1);
    assert_eq!(service.metrics.timeout_count("bodies"), 0);
    assert_eq!(service.metrics.timeout_count("receipts"), 0);
    assert_eq!(service.peers().lock().get(&silent.id).unwrap().timeouts, 1);
}

#[tokio::test]
async fn test_stalls_until_a_new_peer_registers() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_millis(100));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let silent = MockPeer::spawn(&service, remote.clone(), Behaviour::Silent, false);

    let op = operation(SyncMode::FullSync, silent.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    let metrics = service.metrics.clone();
    wait_until(|| metrics.timeout_count("headers") == 1).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(service.state(), SyncState::Fetching);
    assert!(service.is_running());
    assert_eq!(service.metrics.timeout_count("headers"), 1);

    let _serving = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, false);

    assert_eq!(
        running.await.unwrap(),
        Ok(SyncOutcome::Completed { imported: 8 })
    );
    assert_eq!(service.chain().current_head(), remote.current_head());
}

#[tokio::test]
async fn test_cancel_returns_to_idle_without_partial_import() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_secs(30));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let peer = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let op = operation(SyncMode::FullSync, peer.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    // target and first batch answered, bodies and receipts outstanding
    let watched = service.clone();
    wait_until(|| watched.metrics.in_count("headers") == 2 && watched.fetcher.pending() == 2).await;
    assert_eq!(service.do_sync(op).await, Err(SyncError::Busy));

    service.cancel();

    assert_eq!(running.await.unwrap(), Ok(SyncOutcome::Cancelled));
    assert_eq!(service.state(), SyncState::Idle);
    assert!(!service.is_running());
    assert_eq!(service.chain().current_head().number, 0);
    assert_eq!(service.fetcher.pending(), 0);
    assert_eq!(service.peers().lock().get(&peer.id).unwrap().timeouts, 0);
    assert_eq!(service.metrics.sync_operations("cancelled"), 1);
}

#[tokio::test]
async fn test_target_disconnect_without_fallback_fails() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_secs(30));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let target = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let op = operation(SyncMode::FullSync, target.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    let watched = service.clone();
    wait_until(|| watched.metrics.in_count("headers") == 2 && watched.fetcher.pending() == 2).await;
    service.unregister_peer(&target.id);

    assert_eq!(running.await.unwrap(), Err(SyncError::NoPeers));
    assert_eq!(service.state(), SyncState::Idle);
    assert!(!service.is_running());
    assert_eq!(service.fetcher.pending(), 0);
    assert_eq!(service.chain().current_head().number, 0);
    assert_eq!(service.metrics.sync_operations("failed"), 1);
    assert_eq!(service.metrics.timeout_count("bodies"), 0);
}

#[tokio::test]
async fn test_target_disconnect_moves_requests_to_fallback() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_secs(30));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let target = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let op = operation(SyncMode::FullSync, target.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    let watched = service.clone();
    wait_until(|| watched.metrics.in_count("headers") == 2 && watched.fetcher.pending() == 2).await;
    let fallback = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, false);
    service.unregister_peer(&target.id);

    assert_eq!(
        running.await.unwrap(),
        Ok(SyncOutcome::Completed { imported: 8 })
    );
    assert_eq!(service.chain().current_head(), remote.current_head());
    assert_eq!(service.fetcher.pending(), 0);
    assert_eq!(service.peers().lock().get(&fallback.id).unwrap().timeouts, 0);
}

#[tokio::test]
async fn test_failed_sibling_request_is_released() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_secs(30));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let peer = MockPeer::spawn(&service, remote.clone(), Behaviour::EmptyBodies, false);

    let outcome = service
        .do_sync(operation(SyncMode::FullSync, peer.id, &remote))
        .await;

    // bodies fail fast while the receipts request is still outstanding
    assert_eq!(outcome, Err(SyncError::NoPeers));
    assert_eq!(service.fetcher.pending(), 0);
    let peers = service.peers();
    let peers = peers.lock();
    let tracked = peers.get(&peer.id).unwrap();
    assert_eq!(tracked.requests_in_flight, 0);
    assert_eq!(tracked.timeouts, 0);
}

#[tokio::test]
async fn test_new_peer_wakes_every_stalled_request() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_millis(100));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let target = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let op = operation(SyncMode::FullSync, target.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    let metrics = service.metrics.clone();
    wait_until(|| metrics.timeout_count("bodies") == 1 && metrics.timeout_count("receipts") == 1)
        .await;
    assert_eq!(service.state(), SyncState::Fetching);

    let _serving = MockPeer::spawn(&service, remote.clone(), Behaviour::Serve, false);

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("both stalled requests resume")
        .unwrap();
    assert_eq!(outcome, Ok(SyncOutcome::Completed { imported: 8 }));
    assert_eq!(service.chain().current_head(), remote.current_head());
    assert_eq!(service.peers().lock().get(&target.id).unwrap().timeouts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_right_after_start_is_not_lost() {
    let config = SyncConfig::for_local().with_request_timeout(Duration::from_secs(30));
    let service = service_with(empty_chain(), SyncMode::FullSync, config);
    let remote = seeded_chain(8);
    let peer = MockPeer::spawn(&service, remote.clone(), Behaviour::HeadersOnly, false);

    let op = operation(SyncMode::FullSync, peer.id, &remote);
    let running = {
        let service = service.clone();
        tokio::spawn(async move { service.do_sync(op).await })
    };

    while !service.is_running() {
        tokio::task::yield_now().await;
    }
    service.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("cancelled operation returns")
        .unwrap();
    assert_eq!(outcome, Ok(SyncOutcome::Cancelled));
    assert_eq!(service.state(), SyncState::Idle);
    assert_eq!(service.fetcher.pending(), 0);
}

#[tokio::test]
async fn test_disconnecting_peer_is_not_selected() {
    let service = service_with(empty_chain(), SyncMode::FullSync, SyncConfig::for_local());
    let short = MockPeer::spawn(&service, seeded_chain(4), Behaviour::Serve, false);
    let long = MockPeer::spawn(&service, seeded_chain(8), Behaviour::Serve, false);
    assert_eq!(service.metrics.peers(), 2);

    service.mark_disconnecting(&long.id);

    assert_eq!(service.best_operation().map(|op| op.peer), Some(short.id));
    assert_eq!(service.metrics.peers(), 1);
    let count = service.peers().lock().peer_count();
    assert_eq!((count.connected, count.disconnecting), (1, 1));

    service.unregister_peer(&long.id);
    assert_eq!(service.metrics.peers(), 1);
    assert_eq!(service.peers().lock().len(), 1);
}
