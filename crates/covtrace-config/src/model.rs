// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Covtrace engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Covtrace configuration.
///
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CovtraceConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Durable store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Shared ephemeral store settings.
    #[serde(default)]
    pub ephemeral: EphemeralConfig,

    /// Geo/time quantization and presence retention.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Contact matcher job settings.
    #[serde(default)]
    pub trace: TraceConfig,

    /// Notification service settings.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Push gateway client settings.
    #[serde(default)]
    pub push: PushConfig,

    /// Distributed push fan-out worker settings.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Prometheus metrics exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Instance name used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "covtrace".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("covtrace").join("covtrace.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("covtrace.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_true() -> bool {
    true
}

/// Ephemeral store configuration.
///
/// Without a `url` every process keeps its own in-memory store, which is only
/// correct when a single process runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EphemeralConfig {
    /// Redis connection URL (`redis://`, `rediss://` or `unix://`).
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix applied to every key and channel name.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reconnect attempts before a command fails.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: default_namespace(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: default_connect_retries(),
        }
    }
}

impl EphemeralConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_namespace() -> String {
    "covtrace".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_connect_retries() -> usize {
    3
}

/// Geo/time quantization and presence retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceConfig {
    /// Size of a geofence box in arc-seconds. Larger boxes raise recall and
    /// lower precision of the contact signal.
    #[serde(default = "default_radius_units")]
    pub radius_units: f64,

    /// Width of a time bucket in minutes.
    #[serde(default = "default_bucket_minutes")]
    pub bucket_minutes: u32,

    /// Days a per-user day set is kept in the ephemeral store.
    #[serde(default = "default_presence_ttl_days")]
    pub ttl_days: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            radius_units: default_radius_units(),
            bucket_minutes: default_bucket_minutes(),
            ttl_days: default_presence_ttl_days(),
        }
    }
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 24 * 60 * 60)
    }
}

fn default_radius_units() -> f64 {
    1.5
}

fn default_bucket_minutes() -> u32 {
    5
}

fn default_presence_ttl_days() -> u32 {
    14
}

/// Contact matcher job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TraceConfig {
    /// Users read per population page.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Candidates scanned concurrently within a page.
    #[serde(default = "default_trace_concurrency")]
    pub concurrency: usize,

    /// Seconds an operation record stays pollable.
    #[serde(default = "default_operation_ttl_secs")]
    pub operation_ttl_secs: u64,

    /// Capacity of the missed-day side channel.
    #[serde(default = "default_side_channel_capacity")]
    pub missed_day_capacity: usize,

    /// Seconds to wait for room on the missed-day side channel before dropping.
    #[serde(default = "default_report_timeout_secs")]
    pub missed_day_timeout_secs: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            concurrency: default_trace_concurrency(),
            operation_ttl_secs: default_operation_ttl_secs(),
            missed_day_capacity: default_side_channel_capacity(),
            missed_day_timeout_secs: default_report_timeout_secs(),
        }
    }
}

impl TraceConfig {
    pub fn operation_ttl(&self) -> Duration {
        Duration::from_secs(self.operation_ttl_secs)
    }

    pub fn missed_day_timeout(&self) -> Duration {
        Duration::from_secs(self.missed_day_timeout_secs)
    }
}

fn default_page_size() -> u64 {
    1000
}

fn default_trace_concurrency() -> usize {
    64
}

fn default_operation_ttl_secs() -> u64 {
    12 * 60 * 60
}

fn default_side_channel_capacity() -> usize {
    256
}

fn default_report_timeout_secs() -> u64 {
    10
}

/// Notification service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Gateway attempts per delivery, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Capacity of the failed-send sink.
    #[serde(default = "default_side_channel_capacity")]
    pub failure_capacity: usize,

    /// Seconds to wait for room on the failed-send sink before dropping a report.
    #[serde(default = "default_report_timeout_secs")]
    pub failure_timeout_secs: u64,

    /// Recipients per broadcast page.
    #[serde(default = "default_page_size")]
    pub broadcast_page_size: u64,

    /// Title of contact alert messages.
    #[serde(default = "default_alert_title")]
    pub alert_title: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            failure_capacity: default_side_channel_capacity(),
            failure_timeout_secs: default_report_timeout_secs(),
            broadcast_page_size: default_page_size(),
            alert_title: default_alert_title(),
        }
    }
}

impl NotifyConfig {
    pub fn failure_timeout(&self) -> Duration {
        Duration::from_secs(self.failure_timeout_secs)
    }
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_alert_title() -> String {
    "Exposure alert".to_string()
}

/// Push gateway client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    /// Gateway send endpoint. Required by `serve`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent with every gateway call.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_push_timeout_secs(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_push_timeout_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

/// Distributed push fan-out worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FanoutConfig {
    /// Run the fan-out worker inside `serve`.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum gateway calls in flight per worker.
    #[serde(default = "default_fanout_concurrency")]
    pub concurrency: usize,

    /// Seconds between `CONTINUE` announcements from the loader.
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,

    /// Users read per page while seeding the backlog.
    #[serde(default = "default_page_size")]
    pub load_page_size: u64,

    /// Fixed notification title pushed on every sweep.
    #[serde(default = "default_fanout_title")]
    pub title: String,

    /// Fixed notification body pushed on every sweep.
    #[serde(default = "default_fanout_body")]
    pub body: String,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: default_fanout_concurrency(),
            announce_interval_secs: default_announce_interval_secs(),
            load_page_size: default_page_size(),
            title: default_fanout_title(),
            body: default_fanout_body(),
        }
    }
}

impl FanoutConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }
}

fn default_fanout_concurrency() -> usize {
    1000
}

fn default_announce_interval_secs() -> u64 {
    180
}

fn default_fanout_title() -> String {
    "Stay safe".to_string()
}

fn default_fanout_body() -> String {
    "Keep location sharing on so we can warn you about exposures.".to_string()
}

/// Prometheus metrics exporter configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Install the Prometheus recorder.
    #[serde(default)]
    pub enabled: bool,
}
