// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock push gateway for deterministic delivery tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use covtrace_core::traits::adapter::PluginAdapter;
use covtrace_core::traits::gateway::PushGateway;
use covtrace_core::types::{AdapterType, HealthStatus, PushReceipt, PushRequest};
use covtrace_core::CovtraceError;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transient,
    Permanent,
}

impl Failure {
    fn into_error(self) -> CovtraceError {
        match self {
            Self::Transient => CovtraceError::transient_delivery("mock gateway unavailable"),
            Self::Permanent => CovtraceError::permanent_delivery("mock gateway rejected request"),
        }
    }
}

/// A push gateway that records every call.
///
/// Failures are scripted: queued one-shot failures are consumed first, then
/// the standing failure mode (if any) applies, then calls touching a poisoned
/// token fail. Everything else succeeds with a receipt counting every token.
pub struct MockGateway {
    calls: Mutex<Vec<PushRequest>>,
    queued: Mutex<VecDeque<Failure>>,
    standing: Mutex<Option<Failure>>,
    poisoned: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            standing: Mutex::new(None),
            poisoned: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// The next `n` calls fail, transiently or permanently.
    pub async fn fail_next(&self, n: usize, transient: bool) {
        let failure = if transient {
            Failure::Transient
        } else {
            Failure::Permanent
        };
        let mut queued = self.queued.lock().await;
        queued.extend(std::iter::repeat_n(failure, n));
    }

    /// Every call fails until [`MockGateway::recover`] is called.
    pub async fn fail_always(&self, transient: bool) {
        *self.standing.lock().await = Some(if transient {
            Failure::Transient
        } else {
            Failure::Permanent
        });
    }

    /// Clears the standing failure mode.
    pub async fn recover(&self) {
        *self.standing.lock().await = None;
    }

    /// Calls that include `token` fail permanently.
    pub async fn poison_token(&self, token: impl Into<String>) {
        self.poisoned.lock().await.insert(token.into());
    }

    /// Each call sleeps for `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    /// Every call made so far, including failed attempts.
    pub async fn calls(&self) -> Vec<PushRequest> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Highest number of concurrent `send` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn scripted_failure(&self, request: &PushRequest) -> Option<Failure> {
        if let Some(failure) = self.queued.lock().await.pop_front() {
            return Some(failure);
        }
        if let Some(failure) = *self.standing.lock().await {
            return Some(failure);
        }
        let poisoned = self.poisoned.lock().await;
        request
            .tokens
            .iter()
            .any(|t| poisoned.contains(t))
            .then_some(Failure::Permanent)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockGateway {
    fn name(&self) -> &str {
        "mock-gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        Ok(())
    }
}

#[async_trait]
impl PushGateway for MockGateway {
    async fn send(&self, request: &PushRequest) -> Result<PushReceipt, CovtraceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().await.push(request.clone());
        let outcome = match self.scripted_failure(request).await {
            Some(failure) => Err(failure.into_error()),
            None => Ok(PushReceipt {
                success: request.tokens.len() as u64,
                ..PushReceipt::default()
            }),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
