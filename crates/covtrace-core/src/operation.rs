// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-running operation records.
//!
//! Trace jobs and broadcasts return an operation id immediately and run in the
//! background. Their state lives in the ephemeral store under
//! `operation:{id}` with a TTL, and clients poll it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::CovtraceError;
use crate::traits::EphemeralStore;

/// Default retention of operation records (12 hours).
pub const DEFAULT_OPERATION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Trace,
    Broadcast,
}

/// `REQUESTED -> RUNNING -> DONE`, or `RUNNING -> FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Requested,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub state: OperationState,
    /// `true` once the operation reached `DONE` or `FAILED`.
    pub done: bool,
    pub error_detail: Option<String>,
    /// Units of work completed so far (candidates scanned, pages delivered).
    pub progress: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    fn new(kind: OperationKind) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            state: OperationState::Requested,
            done: false,
            error_detail: None,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reads and writes operation records in the ephemeral store.
#[derive(Clone)]
pub struct OperationStore {
    ephemeral: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl OperationStore {
    pub fn new(ephemeral: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { ephemeral, ttl }
    }

    fn key(id: &str) -> String {
        format!("operation:{id}")
    }

    async fn save(&self, op: &Operation) -> Result<(), CovtraceError> {
        let raw = serde_json::to_string(op).map_err(|e| CovtraceError::Internal(e.to_string()))?;
        self.ephemeral.set_ex(&Self::key(&op.id), &raw, self.ttl).await
    }

    /// Creates a `REQUESTED` operation record.
    pub async fn create(&self, kind: OperationKind) -> Result<Operation, CovtraceError> {
        let op = Operation::new(kind);
        self.save(&op).await?;
        debug!(operation_id = %op.id, kind = %kind, "operation created");
        Ok(op)
    }

    /// Fetches an operation. Expired or unknown ids are `NotFound`.
    pub async fn get(&self, id: &str) -> Result<Operation, CovtraceError> {
        let raw = self
            .ephemeral
            .get(&Self::key(id))
            .await?
            .ok_or_else(|| CovtraceError::not_found("operation", id))?;
        serde_json::from_str(&raw).map_err(|e| CovtraceError::Ephemeral {
            source: Box::new(e),
        })
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<Operation, CovtraceError>
    where
        F: FnOnce(&mut Operation) + Send,
    {
        let mut op = self.get(id).await?;
        apply(&mut op);
        op.updated_at = Utc::now();
        self.save(&op).await?;
        Ok(op)
    }

    pub async fn mark_running(&self, id: &str) -> Result<Operation, CovtraceError> {
        self.update(id, |op| op.state = OperationState::Running).await
    }

    pub async fn set_progress(&self, id: &str, progress: u64) -> Result<Operation, CovtraceError> {
        self.update(id, |op| op.progress = progress).await
    }

    pub async fn complete(&self, id: &str) -> Result<Operation, CovtraceError> {
        self.update(id, |op| {
            op.state = OperationState::Done;
            op.done = true;
        })
        .await
    }

    /// Marks the operation `FAILED` with `detail` as the error payload.
    pub async fn fail(&self, id: &str, detail: impl Into<String>) -> Result<Operation, CovtraceError> {
        let detail = detail.into();
        self.update(id, move |op| {
            op.state = OperationState::Failed;
            op.done = true;
            op.error_detail = Some(detail);
        })
        .await
    }
}
