// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry-with-backoff around single gateway attempts.

use std::time::Duration;

use tracing::{debug, warn};

use covtrace_config::model::{NotifyConfig, PushConfig};
use covtrace_core::{CovtraceError, PushGateway, PushReceipt, PushRequest};

/// Fixed attempt budget with capped exponential backoff. There is no overall
/// deadline; the budget alone bounds a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(notify: &NotifyConfig, push: &PushConfig) -> Self {
        Self {
            attempts: notify.retry_attempts,
            base_delay: Duration::from_millis(push.retry_base_delay_ms),
            max_delay: Duration::from_millis(push.retry_max_delay_ms),
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Sends `request`, retrying transient failures until the budget is spent.
///
/// Permanent failures return immediately. After the last attempt the final
/// error is returned unchanged, so callers can still inspect `is_transient`.
pub async fn deliver(
    gateway: &dyn PushGateway,
    request: &PushRequest,
    policy: RetryPolicy,
) -> Result<PushReceipt, CovtraceError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match gateway.send(request).await {
            Ok(receipt) => {
                debug!(attempt, tokens = request.tokens.len(), "push delivered");
                covtrace_prometheus::record_delivery_attempts(attempt);
                return Ok(receipt);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient push failure, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                covtrace_prometheus::record_delivery_attempts(attempt);
                return Err(e);
            }
        }
    }
}
