// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ephemeral key/value store with sets, lists and pub/sub.
//!
//! Every operation is atomic on the backing store. Cross-process coordination
//! (presence sets, push backlogs, loader election) relies on these atomics
//! instead of locks.

use std::collections::HashSet;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::CovtraceError;
use crate::traits::adapter::PluginAdapter;

/// Stream of messages published on a channel after the subscription was made.
pub type Subscription = Pin<Box<dyn Stream<Item = String> + Send>>;

#[async_trait]
pub trait EphemeralStore: PluginAdapter {
    /// Adds `member` to the set at `key`. Returns `true` if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CovtraceError>;

    /// All members of the set at `key` (empty if the key is missing).
    async fn set_members(&self, key: &str) -> Result<HashSet<String>, CovtraceError>;

    /// Union of the sets at `keys`.
    async fn set_union(&self, keys: &[String]) -> Result<HashSet<String>, CovtraceError>;

    /// Sets a time-to-live on an existing key. Returns `false` if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CovtraceError>;

    /// Stores a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CovtraceError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CovtraceError>;

    /// Stores `value` only if the current value equals `expected`
    /// (`None` meaning "key absent"). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, CovtraceError>;

    /// Pushes onto the head of the list at `key`. Returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CovtraceError>;

    /// Atomically pops the tail of `source` and pushes it onto the head of
    /// `destination`. Returns the moved element, or `None` if `source` is empty.
    async fn list_move(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, CovtraceError>;

    async fn list_len(&self, key: &str) -> Result<u64, CovtraceError>;

    /// Publishes on a channel. Returns the number of subscribers reached.
    async fn publish(&self, channel: &str, message: &str) -> Result<u64, CovtraceError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CovtraceError>;
}
