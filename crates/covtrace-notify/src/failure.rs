// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort failure sink for alert delivery.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::warn;

use covtrace_core::MessageType;

/// An alert that could not be delivered after the retry budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub phone: String,
    pub message_type: MessageType,
    pub error: String,
}

/// Sending half of the failure channel.
///
/// Reports wait at most `timeout` for room in the channel. A report that
/// times out, or finds the receiver gone, is dropped and logged.
#[derive(Clone)]
pub(crate) struct FailureSink {
    tx: mpsc::Sender<DeliveryFailure>,
    timeout: Duration,
}

impl FailureSink {
    pub(crate) fn channel(
        capacity: usize,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<DeliveryFailure>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }

    /// Returns whether the report was accepted.
    pub(crate) async fn report(&self, failure: DeliveryFailure) -> bool {
        match self.tx.send_timeout(failure, self.timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(f)) => {
                warn!(phone = %f.phone, error = %f.error, "failure sink full, report dropped");
                false
            }
            Err(SendTimeoutError::Closed(f)) => {
                warn!(phone = %f.phone, error = %f.error, "failure sink closed, report dropped");
                false
            }
        }
    }
}
