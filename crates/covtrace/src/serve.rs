// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `covtrace serve`: long-running process hosting the fan-out worker and the
//! background sinks until a shutdown signal arrives.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{CovtraceError, HealthStatus};
use covtrace_fanout::PushFanoutWorker;
use covtrace_prometheus::PrometheusAdapter;

use crate::services::Services;
use crate::shutdown;

pub async fn run_serve(config: CovtraceConfig) -> Result<(), CovtraceError> {
    info!(service = %config.service.name, "starting covtrace serve");

    let prometheus = if config.prometheus.enabled {
        Some(PrometheusAdapter::new()?)
    } else {
        debug!("prometheus recorder disabled by configuration");
        None
    };

    let services = Services::from_config(&config).await?;
    for (adapter, status) in services.health().await {
        match status {
            HealthStatus::Healthy => info!(adapter = %adapter, "adapter healthy"),
            HealthStatus::Degraded(reason) => warn!(adapter = %adapter, reason = %reason, "adapter degraded"),
            HealthStatus::Unhealthy(reason) => warn!(adapter = %adapter, reason = %reason, "adapter unhealthy"),
        }
    }

    let cancel = shutdown::install_signal_handler();

    // Failure sinks are drained into the log so reports are never left waiting.
    if let Some(mut failures) = services.notifier.take_failures().await {
        tokio::spawn(async move {
            while let Some(f) = failures.recv().await {
                warn!(phone = %f.phone, kind = %f.message_type, error = %f.error, "alert undeliverable");
            }
        });
    }
    if let Some(mut missed) = services.matcher.take_missed_days().await {
        tokio::spawn(async move {
            while let Some(m) = missed.recv().await {
                warn!(
                    operation_id = ?m.operation_id,
                    phone = %m.phone,
                    date = %m.date,
                    error = %m.error,
                    "trace day skipped"
                );
            }
        });
    }

    {
        let mem_cancel = cancel.clone();
        tokio::spawn(async move {
            memory_monitor(mem_cancel).await;
        });
    }

    let fanout = if config.fanout.enabled {
        let worker = PushFanoutWorker::new(
            services.durable.clone(),
            services.ephemeral.clone(),
            services.gateway.clone(),
            &config.fanout,
        );
        let fan_cancel = cancel.clone();
        info!(concurrency = config.fanout.concurrency, "fan-out worker enabled");
        Some(tokio::spawn(async move { worker.run(fan_cancel).await }))
    } else {
        info!("fan-out worker disabled");
        None
    };

    cancel.cancelled().await;
    info!("shutdown requested");

    if let Some(handle) = fanout {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "fan-out worker exited with error"),
            Err(e) => error!(error = %e, "fan-out worker panicked"),
        }
    }
    services.shutdown().await;

    if let Some(prometheus) = prometheus {
        info!(metrics = %prometheus.render(), "final metrics snapshot");
    }
    info!("covtrace serve shutdown complete");
    Ok(())
}

/// Exports allocator and RSS gauges every 5 seconds.
#[cfg(not(target_env = "msvc"))]
async fn memory_monitor(cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let _ = tikv_jemalloc_ctl::epoch::advance();
                let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
                let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
                let rss = read_rss_bytes().unwrap_or(0);

                covtrace_prometheus::set_memory_heap(allocated as f64);
                covtrace_prometheus::set_memory_resident(resident as f64);
                covtrace_prometheus::set_memory_rss(rss as f64);
            }
            _ = cancel.cancelled() => {
                debug!("memory monitor shutting down");
                break;
            }
        }
    }
}

/// Stub memory monitor for MSVC (no jemalloc).
#[cfg(target_env = "msvc")]
async fn memory_monitor(cancel: CancellationToken) {
    cancel.cancelled().await;
}

/// Read the process RSS in bytes from /proc/self/statm (Linux only).
fn read_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let rss_pages = statm.split_whitespace().nth(1)?.parse::<u64>().ok()?;
        Some(rss_pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` wins over the configured level.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("covtrace={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
