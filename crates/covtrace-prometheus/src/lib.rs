// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics adapter for the Covtrace engine.
//!
//! Components record through the helpers in [`recording`]; the binary
//! installs the Prometheus recorder when `prometheus.enabled` is set.

pub mod recording;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use covtrace_core::{AdapterType, CovtraceError, HealthStatus, PluginAdapter};

pub use recording::{
    record_contacts_found, record_delivery_attempts, record_delivery_failure,
    record_fanout_push, record_fanout_sweep, record_messages_sent, record_missed_day,
    record_presence_write, record_trace_job, register_metrics, set_memory_heap,
    set_memory_resident, set_memory_rss,
};

/// Prometheus metrics adapter.
pub struct PrometheusAdapter {
    handle: PrometheusHandle,
}

impl PrometheusAdapter {
    /// Installs the Prometheus recorder globally. Only one recorder can be
    /// installed per process; a second call returns an error.
    pub fn new() -> Result<Self, CovtraceError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            CovtraceError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[async_trait]
impl PluginAdapter for PrometheusAdapter {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Observability
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        Ok(())
    }
}
