// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Side channel for days a scan could not read.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// A `(candidate, day)` pair skipped during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedDay {
    /// `None` for ad-hoc scans outside a trace job.
    pub operation_id: Option<String>,
    pub phone: String,
    pub date: NaiveDate,
    pub error: String,
}

/// Bounded-wait sender: a full channel is waited on for at most `timeout`,
/// then the entry is dropped.
#[derive(Clone)]
pub(crate) struct MissedDaySink {
    tx: mpsc::Sender<MissedDay>,
    timeout: Duration,
}

impl MissedDaySink {
    pub(crate) fn channel(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<MissedDay>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }

    pub(crate) async fn report(&self, missed: MissedDay) {
        covtrace_prometheus::record_missed_day();
        if let Err(e) = self.tx.send_timeout(missed, self.timeout).await {
            warn!(error = %e, "missed-day entry dropped");
        }
    }
}
