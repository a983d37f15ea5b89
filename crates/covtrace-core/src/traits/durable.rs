// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable relational store: users, the raw location log, and messages.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::CovtraceError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{InfectionStatus, LocationEvent, Message, UserFilter, UserRecord};

/// Adapter for the durable store backing the engine.
///
/// Paginated scans use offset + limit over a stable ordering (users by phone
/// number, locations by insertion order), so a scan that pages to exhaustion
/// visits every row present when it started.
#[async_trait]
pub trait DurableStore: PluginAdapter {
    /// Prepares the backend (connections, migrations).
    async fn initialize(&self) -> Result<(), CovtraceError>;

    /// Flushes pending writes and releases connections.
    async fn close(&self) -> Result<(), CovtraceError>;

    // --- Users ---

    /// Inserts or replaces a user keyed by phone number.
    async fn upsert_user(&self, user: &UserRecord) -> Result<(), CovtraceError>;

    async fn get_user(&self, phone: &str) -> Result<Option<UserRecord>, CovtraceError>;

    /// Sets a user's infection status. Returns `NotFound` for unknown phones.
    async fn update_infection_status(
        &self,
        phone: &str,
        status: InfectionStatus,
    ) -> Result<(), CovtraceError>;

    /// Lists users matching any of `filters`, ordered by phone number.
    /// An empty filter list matches nobody.
    async fn list_users(
        &self,
        filters: &[UserFilter],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserRecord>, CovtraceError>;

    // --- Location log ---

    /// Appends a raw location event. Returns its log sequence number.
    async fn append_location(&self, event: &LocationEvent) -> Result<i64, CovtraceError>;

    /// Reads the location events recorded on `date` (UTC), in log order.
    async fn locations_on(
        &self,
        date: NaiveDate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LocationEvent>, CovtraceError>;

    // --- Messages ---

    /// Writes all messages in one transaction: either every row is stored or none is.
    async fn insert_messages(&self, messages: &[Message]) -> Result<(), CovtraceError>;

    /// Flags the given messages as sent in one transaction.
    async fn mark_messages_sent(&self, ids: &[String]) -> Result<(), CovtraceError>;

    /// Deletes the given messages in one transaction. Rows already marked
    /// sent are kept.
    async fn delete_messages(&self, ids: &[String]) -> Result<(), CovtraceError>;

    /// A user's messages, newest first.
    async fn list_messages(&self, phone: &str) -> Result<Vec<Message>, CovtraceError>;

    /// Flags a message as seen. Returns `NotFound` if the message does not
    /// exist or belongs to another user.
    async fn mark_message_seen(&self, phone: &str, message_id: &str)
    -> Result<(), CovtraceError>;
}
