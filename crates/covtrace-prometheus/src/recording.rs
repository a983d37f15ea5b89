// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Covtrace metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "covtrace_presence_writes_total",
        "RecordPresence calls by outcome"
    );
    describe_counter!("covtrace_trace_jobs_total", "Finished trace jobs by outcome");
    describe_counter!(
        "covtrace_contacts_found_total",
        "Candidates with at least one shared presence token"
    );
    describe_counter!(
        "covtrace_missed_days_total",
        "Candidate days skipped because their presence set could not be read"
    );
    describe_counter!("covtrace_messages_sent_total", "Messages delivered by type");
    describe_counter!(
        "covtrace_delivery_failures_total",
        "Gateway deliveries that exhausted their retry budget, by path"
    );
    describe_histogram!(
        "covtrace_delivery_attempts",
        "Gateway attempts used per delivery"
    );
    describe_histogram!(
        "covtrace_trace_duration_seconds",
        "Wall time of a trace job in seconds"
    );
    describe_counter!("covtrace_fanout_sweeps_total", "Completed fan-out sweep cycles");
    describe_counter!("covtrace_fanout_pushes_total", "Fan-out pushes by outcome");
    describe_gauge!("covtrace_memory_heap_bytes", "Allocated heap bytes");
    describe_gauge!("covtrace_memory_resident_bytes", "Resident allocator bytes");
    describe_gauge!("covtrace_memory_rss_bytes", "Process resident set size");
}

/// `outcome` is `ok`, `ephemeral_error` or `durable_error`.
pub fn record_presence_write(outcome: &'static str) {
    metrics::counter!("covtrace_presence_writes_total", "outcome" => outcome).increment(1);
}

/// `outcome` is `done` or `failed`.
pub fn record_trace_job(outcome: &'static str, seconds: f64) {
    metrics::counter!("covtrace_trace_jobs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("covtrace_trace_duration_seconds").record(seconds);
}

pub fn record_contacts_found(count: u64) {
    metrics::counter!("covtrace_contacts_found_total").increment(count);
}

pub fn record_missed_day() {
    metrics::counter!("covtrace_missed_days_total").increment(1);
}

/// Record `count` delivered messages of `message_type` (`DIRECT`, `ALERT`, `BROADCAST`).
pub fn record_messages_sent(message_type: &str, count: u64) {
    metrics::counter!("covtrace_messages_sent_total", "type" => message_type.to_string())
        .increment(count);
}

/// `path` names the delivery path: `direct`, `alert`, `broadcast` or `fanout`.
pub fn record_delivery_failure(path: &'static str) {
    metrics::counter!("covtrace_delivery_failures_total", "path" => path).increment(1);
}

pub fn record_delivery_attempts(attempts: u32) {
    metrics::histogram!("covtrace_delivery_attempts").record(f64::from(attempts));
}

pub fn record_fanout_sweep() {
    metrics::counter!("covtrace_fanout_sweeps_total").increment(1);
}

/// `outcome` is `ok` or `error`.
pub fn record_fanout_push(outcome: &'static str) {
    metrics::counter!("covtrace_fanout_pushes_total", "outcome" => outcome).increment(1);
}

pub fn set_memory_heap(bytes: f64) {
    metrics::gauge!("covtrace_memory_heap_bytes").set(bytes);
}

pub fn set_memory_resident(bytes: f64) {
    metrics::gauge!("covtrace_memory_resident_bytes").set(bytes);
}

pub fn set_memory_rss(bytes: f64) {
    metrics::gauge!("covtrace_memory_rss_bytes").set(bytes);
}
