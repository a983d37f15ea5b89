// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable store wrapper with switchable message-write failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use covtrace_core::{
    AdapterType, CovtraceError, DurableStore, HealthStatus, InfectionStatus, LocationEvent,
    Message, PluginAdapter, UserFilter, UserRecord,
};

/// Delegates to `inner`, except for the message writes switched to fail.
pub struct FaultyDurable {
    inner: Arc<dyn DurableStore>,
    fail_inserts: AtomicBool,
    fail_mark_sent: AtomicBool,
}

impl FaultyDurable {
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_mark_sent: AtomicBool::new(false),
        }
    }

    /// Makes `insert_messages` fail until switched back.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes `mark_messages_sent` fail until switched back.
    pub fn fail_mark_sent(&self, fail: bool) {
        self.fail_mark_sent.store(fail, Ordering::SeqCst);
    }

    fn injected(op: &str) -> CovtraceError {
        debug!(op, "injected durable failure");
        CovtraceError::Persistence {
            source: format!("injected {op} failure").into(),
        }
    }
}

#[async_trait]
impl PluginAdapter for FaultyDurable {
    fn name(&self) -> &str {
        "faulty-durable"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Durable
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl DurableStore for FaultyDurable {
    async fn initialize(&self) -> Result<(), CovtraceError> {
        self.inner.initialize().await
    }

    async fn close(&self) -> Result<(), CovtraceError> {
        self.inner.close().await
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), CovtraceError> {
        self.inner.upsert_user(user).await
    }

    async fn get_user(&self, phone: &str) -> Result<Option<UserRecord>, CovtraceError> {
        self.inner.get_user(phone).await
    }

    async fn update_infection_status(
        &self,
        phone: &str,
        status: InfectionStatus,
    ) -> Result<(), CovtraceError> {
        self.inner.update_infection_status(phone, status).await
    }

    async fn list_users(
        &self,
        filters: &[UserFilter],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserRecord>, CovtraceError> {
        self.inner.list_users(filters, offset, limit).await
    }

    async fn append_location(&self, event: &LocationEvent) -> Result<i64, CovtraceError> {
        self.inner.append_location(event).await
    }

    async fn locations_on(
        &self,
        date: NaiveDate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LocationEvent>, CovtraceError> {
        self.inner.locations_on(date, offset, limit).await
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), CovtraceError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::injected("insert_messages"));
        }
        self.inner.insert_messages(messages).await
    }

    async fn mark_messages_sent(&self, ids: &[String]) -> Result<(), CovtraceError> {
        if self.fail_mark_sent.load(Ordering::SeqCst) {
            return Err(Self::injected("mark_messages_sent"));
        }
        self.inner.mark_messages_sent(ids).await
    }

    async fn delete_messages(&self, ids: &[String]) -> Result<(), CovtraceError> {
        self.inner.delete_messages(ids).await
    }

    async fn list_messages(&self, phone: &str) -> Result<Vec<Message>, CovtraceError> {
        self.inner.list_messages(phone).await
    }

    async fn mark_message_seen(
        &self,
        phone: &str,
        message_id: &str,
    ) -> Result<(), CovtraceError> {
        self.inner.mark_message_seen(phone, message_id).await
    }
}
