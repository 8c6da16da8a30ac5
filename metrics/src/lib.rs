pub mod server;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    // Downloader
    downloader_in: IntCounterVec,
    downloader_drop: IntCounterVec,
    downloader_timeout: IntCounterVec,
    downloader_throttle: IntCounter,
    downloader_request_time: HistogramVec,
    // Sync
    sync_mode: IntGauge,
    sync_operations: IntCounterVec,
    sync_imported_blocks: IntCounter,
    sync_current_block: IntGauge,
    sync_highest_block: IntGauge,
}

impl Metrics {
    /// Builds and registers every metric.
    ///
    /// Panics only if two metrics share a name, which the fixed definitions below never do.
    pub fn new() -> Self {
        Self::try_new().expect("metric definitions are unique")
    }

    pub fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new("network_peers_connected", "Number of connected peers"))?;
        registry.register(Box::new(peers.clone()))?;

        // Downloader
        let downloader_in = IntCounterVec::new(
            Opts::new("downloader_in_total", "Responses matched to an outstanding request"),
            &["kind"],
        )?;
        registry.register(Box::new(downloader_in.clone()))?;

        let downloader_drop = IntCounterVec::new(
            Opts::new("downloader_drop_total", "Responses with no matching outstanding request"),
            &["kind"],
        )?;
        registry.register(Box::new(downloader_drop.clone()))?;

        let downloader_timeout = IntCounterVec::new(
            Opts::new("downloader_timeout_total", "Requests that passed their deadline"),
            &["kind"],
        )?;
        registry.register(Box::new(downloader_timeout.clone()))?;

        let downloader_throttle = IntCounter::with_opts(Opts::new(
            "downloader_throttle_total",
            "Requests queued because the concurrency ceiling was reached",
        ))?;
        registry.register(Box::new(downloader_throttle.clone()))?;

        let downloader_request_time = HistogramVec::new(
            HistogramOpts::new("downloader_request_seconds", "Round-trip time of answered requests")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["kind"],
        )?;
        registry.register(Box::new(downloader_request_time.clone()))?;

        // Sync
        let sync_mode = IntGauge::with_opts(Opts::new(
            "sync_mode",
            "Current sync mode (0 = full, 1 = snap, 2 = light)",
        ))?;
        registry.register(Box::new(sync_mode.clone()))?;

        let sync_operations = IntCounterVec::new(
            Opts::new("sync_operations_total", "Finished sync operations by result"),
            &["result"],
        )?;
        registry.register(Box::new(sync_operations.clone()))?;

        let sync_imported_blocks = IntCounter::with_opts(Opts::new(
            "sync_imported_blocks_total",
            "Blocks imported by the downloader",
        ))?;
        registry.register(Box::new(sync_imported_blocks.clone()))?;

        let sync_current_block = IntGauge::with_opts(Opts::new("sync_current_block", "Local head block number"))?;
        registry.register(Box::new(sync_current_block.clone()))?;

        let sync_highest_block = IntGauge::with_opts(Opts::new(
            "sync_highest_block",
            "Highest block number known from peers",
        ))?;
        registry.register(Box::new(sync_highest_block.clone()))?;

        Ok(Self {
            registry,
            peers,
            downloader_in,
            downloader_drop,
            downloader_timeout,
            downloader_throttle,
            downloader_request_time,
            sync_mode,
            sync_operations,
            sync_imported_blocks,
            sync_current_block,
            sync_highest_block,
        })
    }

    pub fn gather(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    pub fn peers(&self) -> i64 {
        self.peers.get()
    }

    // Downloader
    pub fn inc_in(&self, kind: &str) {
        self.downloader_in.with_label_values(&[kind]).inc();
    }

    pub fn inc_drop(&self, kind: &str) {
        self.downloader_drop.with_label_values(&[kind]).inc();
    }

    pub fn inc_timeout(&self, kind: &str) {
        self.downloader_timeout.with_label_values(&[kind]).inc();
    }

    pub fn inc_throttle(&self) {
        self.downloader_throttle.inc();
    }

    pub fn observe_request_time(&self, kind: &str, seconds: f64) {
        self.downloader_request_time.with_label_values(&[kind]).observe(seconds);
    }

    pub fn in_count(&self, kind: &str) -> u64 {
        self.downloader_in.with_label_values(&[kind]).get()
    }

    pub fn drop_count(&self, kind: &str) -> u64 {
        self.downloader_drop.with_label_values(&[kind]).get()
    }

    pub fn timeout_count(&self, kind: &str) -> u64 {
        self.downloader_timeout.with_label_values(&[kind]).get()
    }

    pub fn throttle_count(&self) -> u64 {
        self.downloader_throttle.get()
    }

    // Sync
    pub fn set_sync_mode(&self, v: i64) {
        self.sync_mode.set(v);
    }

    pub fn sync_mode(&self) -> i64 {
        self.sync_mode.get()
    }

    pub fn inc_sync_operation(&self, result: &str) {
        self.sync_operations.with_label_values(&[result]).inc();
    }

    pub fn sync_operations(&self, result: &str) -> u64 {
        self.sync_operations.with_label_values(&[result]).get()
    }

    pub fn inc_imported_blocks(&self, count: u64) {
        self.sync_imported_blocks.inc_by(count);
    }

    pub fn imported_blocks(&self) -> u64 {
        self.sync_imported_blocks.get()
    }

    pub fn set_current_block(&self, v: i64) {
        self.sync_current_block.set(v);
    }

    pub fn set_highest_block(&self, v: i64) {
        self.sync_highest_block.set(v);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<Metrics>;
