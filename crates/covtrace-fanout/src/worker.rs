// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fan-out worker loop.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use covtrace_config::model::FanoutConfig;
use covtrace_core::{
    CovtraceError, DurableStore, EphemeralStore, Payload, PushGateway, PushNotification,
    PushRequest, UserFilter,
};

use crate::queue::{Backlog, PushQueue, Signal};

/// Counts for one completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub attempted: u64,
    pub failed: u64,
}

pub struct PushFanoutWorker {
    queue: PushQueue,
    durable: Arc<dyn DurableStore>,
    gateway: Arc<dyn PushGateway>,
    notification: PushNotification,
    permits: Arc<Semaphore>,
    announce_interval: Duration,
    load_page_size: u64,
}

impl PushFanoutWorker {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        gateway: Arc<dyn PushGateway>,
        config: &FanoutConfig,
    ) -> Self {
        Self {
            queue: PushQueue::new(ephemeral),
            durable,
            gateway,
            notification: PushNotification {
                title: config.title.clone(),
                body: config.body.clone(),
                payload: Payload::new().with("kind", "fanout"),
            },
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            announce_interval: config.announce_interval(),
            load_page_size: config.load_page_size.max(1),
        }
    }

    pub fn queue(&self) -> &PushQueue {
        &self.queue
    }

    /// Runs until `shutdown` is cancelled or the signal channel closes.
    ///
    /// Subscribes before anything else so a `START` published by this
    /// process, or by a faster peer, is never missed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CovtraceError> {
        let mut signals = self.queue.subscribe().await?;

        if self.queue.claim_loader().await? {
            info!("fan-out loader elected");
            match self.load_backlog().await {
                Ok(loaded) => info!(loaded, "fan-out backlog loaded"),
                Err(e) => error!(error = %e, "fan-out backlog load failed"),
            }
            self.queue.signal(Signal::Start).await?;
            tokio::spawn(announce(
                self.queue.clone(),
                self.announce_interval,
                shutdown.clone(),
            ));
        }

        loop {
            let raw = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = signals.next() => match next {
                    Some(raw) => raw,
                    None => {
                        warn!("fan-out signal channel closed");
                        break;
                    }
                },
            };
            let signal = match raw.parse::<Signal>() {
                Ok(signal) => signal,
                Err(_) => {
                    warn!(message = %raw, "ignoring unknown fan-out signal");
                    continue;
                }
            };
            debug!(%signal, "fan-out woken");

            match self.sweep(&shutdown).await {
                Ok(stats) => info!(attempted = stats.attempted, failed = stats.failed, "fan-out sweep finished"),
                Err(e) => warn!(error = %e, "fan-out sweep interrupted"),
            }

            // Signals that arrived mid-sweep are redundant.
            while let Some(Some(_)) = signals.next().now_or_never() {}
        }

        info!("fan-out worker stopped");
        Ok(())
    }

    /// Pushes every device token in the durable store onto backlog A.
    pub async fn load_backlog(&self) -> Result<u64, CovtraceError> {
        let mut offset = 0;
        let mut loaded = 0u64;
        loop {
            let users = self
                .durable
                .list_users(&[UserFilter::All], offset, self.load_page_size)
                .await?;
            if users.is_empty() {
                break;
            }
            let fetched = users.len() as u64;
            for token in users.into_iter().filter_map(|u| u.device_token) {
                if token.is_empty() {
                    continue;
                }
                self.queue.enqueue(&token).await?;
                loaded += 1;
            }
            offset += fetched;
            if fetched < self.load_page_size {
                break;
            }
        }
        Ok(loaded)
    }

    /// Drains the active list once, then swaps the lists.
    ///
    /// Each token is moved to staging before it is pushed. Send failures are
    /// logged and the token simply waits in staging for the next sweep.
    pub async fn sweep(&self, shutdown: &CancellationToken) -> Result<SweepStats, CovtraceError> {
        let active: Backlog = self.queue.active().await?;
        let mut stats = SweepStats::default();
        let mut sends = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let Some(token) = self.queue.take_next(active).await? else {
                break;
            };
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CovtraceError::Internal(e.to_string()))?;
            let gateway = self.gateway.clone();
            let request = PushRequest::single(token, self.notification.clone());
            sends.spawn(async move {
                let result = gateway.send(&request).await;
                drop(permit);
                match result {
                    Ok(_) => {
                        covtrace_prometheus::record_fanout_push("ok");
                        true
                    }
                    Err(e) => {
                        warn!(token = %request.tokens[0], error = %e, "fan-out push failed");
                        covtrace_prometheus::record_fanout_push("error");
                        covtrace_prometheus::record_delivery_failure("fanout");
                        false
                    }
                }
            });
            stats.attempted += 1;

            while let Some(done) = sends.try_join_next() {
                stats.failed += u64::from(!done.unwrap_or(false));
            }
        }

        while let Some(done) = sends.join_next().await {
            stats.failed += u64::from(!done.unwrap_or(false));
        }

        if shutdown.is_cancelled() {
            return Ok(stats);
        }
        if self.queue.swap(active).await? {
            debug!(from = %active, to = %active.other(), "backlogs swapped");
        }
        covtrace_prometheus::record_fanout_sweep();
        Ok(stats)
    }
}

/// Publishes `CONTINUE` every `period` until cancelled. The first signal goes
/// out one full period after start.
pub async fn announce(queue: PushQueue, period: Duration, shutdown: CancellationToken) {
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                match queue.signal(Signal::Continue).await {
                    Ok(peers) => debug!(peers, "fan-out continue announced"),
                    Err(e) => warn!(error = %e, "fan-out announce failed"),
                }
            }
        }
    }
}

