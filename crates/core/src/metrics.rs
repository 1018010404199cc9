//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "decode_errors_total",
        "Total number of event parameter decoding errors"
    );
    describe_counter!(
        "blocks_indexed_total",
        "Total number of blocks successfully indexed"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to process a block in seconds"
    );
    describe_counter!(
        "handler_errors_total",
        "Total number of handler errors during event processing"
    );
    describe_counter!(
        "block_failures_total",
        "Total number of failed block attempts"
    );
    describe_counter!(
        "entity_writes_total",
        "Total number of projected entity writes committed"
    );
    describe_counter!(
        "multisig_sweeps_total",
        "Total number of multisig proposal deletion sweeps"
    );
    describe_counter!(
        "multisig_proposals_deleted_total",
        "Total number of multisig proposals marked deleted by a sweep"
    );
    describe_counter!(
        "chain_readback_errors_total",
        "Total number of failed live chain storage reads"
    );
}

/// Record an event decoding error.
///
/// # Arguments
/// * `event` - The `Module.method` label of the event
pub fn record_decode_error(event: &str) {
    counter!("decode_errors_total", "event" => event.to_string()).increment(1);
}

/// Record a successfully indexed block.
pub fn record_block_indexed() {
    counter!("blocks_indexed_total").increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(duration_secs: f64) {
    histogram!("block_processing_duration_seconds").record(duration_secs);
}

/// Record a handler error.
///
/// # Arguments
/// * `module` - The event module
/// * `method` - The event method
pub fn record_handler_error(module: &str, method: &str) {
    counter!("handler_errors_total", "module" => module.to_string(), "method" => method.to_string())
        .increment(1);
}

/// Record a failed attempt at indexing a block.
pub fn record_block_failure() {
    counter!("block_failures_total").increment(1);
}

/// Record committed entity writes.
pub fn record_entity_writes(count: u64) {
    counter!("entity_writes_total").increment(count);
}

/// Record a multisig deletion sweep and the proposals it deleted.
pub fn record_multisig_sweep(deleted: u64) {
    counter!("multisig_sweeps_total").increment(1);
    counter!("multisig_proposals_deleted_total").increment(deleted);
}

/// Record a failed live chain storage read.
///
/// # Arguments
/// * `entry` - The `Pallet.Entry` storage item
pub fn record_chain_readback_error(entry: &str) {
    counter!("chain_readback_errors_total", "entry" => entry.to_string()).increment(1);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(duration);
    }
}
