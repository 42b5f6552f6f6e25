//! Metrics for stream supervision, cron passes and resyncs
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the host
//! installs a recorder.

use crate::lifecycle::ResyncReason;
use crate::providers::StreamKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Register metric descriptions
pub fn init_metrics() {
    // Streaming
    describe_counter!("streaming.start.succeeded", "Stream starts that succeeded, by kind");
    describe_counter!("streaming.start.failed", "Stream starts that failed or were cancelled, by kind");
    describe_counter!("streaming.stop.failed", "Stream stops rejected by the provider, by kind");
    describe_gauge!("streaming.accounts.active", "Accounts with at least one stream flag set");

    // Cron
    describe_counter!("cron.passes", "Completed cron passes");
    describe_counter!("cron.ticks.skipped", "Cron ticks that did no work, by reason");
    describe_counter!("cron.flush.failed", "Per-account flush failures");
    describe_counter!("cron.flush.items", "Pending items flushed, by kind");
    describe_histogram!("cron.pass.duration_ms", "Cron pass duration in milliseconds");

    // Lifecycle
    describe_counter!("lifecycle.resyncs", "Full resyncs triggered, by reason");
    describe_counter!("sync.client.failed", "Client sync failures");
}

pub(crate) fn record_stream_start(kind: StreamKind, succeeded: bool) {
    if succeeded {
        counter!("streaming.start.succeeded", "kind" => kind.as_str()).increment(1);
    } else {
        counter!("streaming.start.failed", "kind" => kind.as_str()).increment(1);
    }
}

pub(crate) fn record_stream_stop_failure(kind: StreamKind) {
    counter!("streaming.stop.failed", "kind" => kind.as_str()).increment(1);
}

pub(crate) fn set_streaming_accounts(count: usize) {
    gauge!("streaming.accounts.active").set(count as f64);
}

pub(crate) fn record_cron_skip(reason: &'static str) {
    counter!("cron.ticks.skipped", "reason" => reason).increment(1);
}

pub(crate) fn record_cron_flush_failure() {
    counter!("cron.flush.failed").increment(1);
}

pub(crate) fn record_cron_flushed(kind: &'static str, items: usize) {
    counter!("cron.flush.items", "kind" => kind).increment(items as u64);
}

pub(crate) fn record_resync(reason: ResyncReason) {
    counter!("lifecycle.resyncs", "reason" => reason.as_str()).increment(1);
}

pub(crate) fn record_sync_failure() {
    counter!("sync.client.failed").increment(1);
}

/// Measures a cron pass and records it on drop
pub(crate) struct PassTimer {
    start: Instant,
}

impl PassTimer {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for PassTimer {
    fn drop(&mut self) {
        counter!("cron.passes").increment(1);
        histogram!("cron.pass.duration_ms").record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
