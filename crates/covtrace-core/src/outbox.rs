// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transactional outbox scope for outbound messages.
//!
//! An [`OutboxTx`] runs in two phases around the push call:
//!
//! 1. [`OutboxTx::persist`] writes every staged row with `sent = false` in a
//!    single store transaction. It runs before the gateway is contacted, so a
//!    persistence failure aborts the delivery and a device never receives a
//!    `messageId` that has no row behind it.
//! 2. [`OutboxTx::commit`] flips the rows to `sent = true` once the gateway
//!    accepted the push, or [`OutboxTx::rollback`] deletes them if it did not.
//!
//! A scope dropped between the two phases leaves its rows unsent, which
//! records an attempted delivery without claiming success.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CovtraceError;
use crate::traits::DurableStore;
use crate::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Staging,
    Persisted,
    Finished,
}

pub struct OutboxTx {
    store: Arc<dyn DurableStore>,
    staged: Vec<Message>,
    phase: Phase,
}

impl OutboxTx {
    /// Opens an empty outbox scope against `store`.
    pub fn begin(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            staged: Vec::new(),
            phase: Phase::Staging,
        }
    }

    /// Stages a message row. Rows are validated here so malformed input fails
    /// before anything is written or delivered.
    pub fn stage(&mut self, mut message: Message) -> Result<&Message, CovtraceError> {
        if self.phase != Phase::Staging {
            return Err(CovtraceError::Internal(
                "outbox rows can only be staged before persist".into(),
            ));
        }
        if message.user_phone.trim().is_empty() {
            return Err(CovtraceError::InvalidArgument(
                "message recipient phone is required".into(),
            ));
        }
        if self.staged.iter().any(|m| m.id == message.id) {
            return Err(CovtraceError::Internal(format!(
                "message {} staged twice",
                message.id
            )));
        }
        message.sent = false;
        self.staged.push(message);
        Ok(&self.staged[self.staged.len() - 1])
    }

    pub fn staged(&self) -> &[Message] {
        &self.staged
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    fn ids(&self) -> Vec<String> {
        self.staged.iter().map(|m| m.id.clone()).collect()
    }

    /// Writes every staged row, unsent, in one store transaction.
    pub async fn persist(&mut self) -> Result<(), CovtraceError> {
        if self.phase != Phase::Staging {
            return Err(CovtraceError::Internal("outbox persisted twice".into()));
        }
        if !self.staged.is_empty() {
            self.store.insert_messages(&self.staged).await?;
        }
        self.phase = Phase::Persisted;
        debug!(rows = self.staged.len(), "outbox rows persisted unsent");
        Ok(())
    }

    /// Marks the persisted rows as sent and returns them. Call only after the
    /// gateway accepted delivery.
    pub async fn commit(mut self) -> Result<Vec<Message>, CovtraceError> {
        if self.phase != Phase::Persisted {
            return Err(CovtraceError::Internal(
                "outbox committed before persist".into(),
            ));
        }
        if !self.staged.is_empty() {
            self.store.mark_messages_sent(&self.ids()).await?;
        }
        self.phase = Phase::Finished;
        let mut rows = std::mem::take(&mut self.staged);
        for row in &mut rows {
            row.sent = true;
        }
        debug!(rows = rows.len(), "outbox committed");
        Ok(rows)
    }

    /// Discards the scope. Rows already persisted are deleted.
    pub async fn rollback(mut self) -> Result<(), CovtraceError> {
        let persisted = self.phase == Phase::Persisted;
        self.phase = Phase::Finished;
        let rows = self.staged.len();
        if persisted && rows > 0 {
            self.store.delete_messages(&self.ids()).await?;
        }
        self.staged.clear();
        debug!(rows, persisted, "outbox rolled back");
        Ok(())
    }
}

impl Drop for OutboxTx {
    fn drop(&mut self) {
        match self.phase {
            Phase::Persisted if !self.staged.is_empty() => {
                warn!(rows = self.staged.len(), "outbox dropped after persist, rows left unsent")
            }
            Phase::Staging if !self.staged.is_empty() => {
                debug!(rows = self.staged.len(), "outbox dropped before persist, nothing written")
            }
            _ => {}
        }
    }
}
