// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ephemeral stores.
//!
//! [`RedisEphemeral`] is the shared store for multi-process deployments.
//! [`MemoryEphemeral`] implements the same [`EphemeralStore`] contract inside
//! one process for tests and single-process runs: string values with TTL,
//! sets, lists with atomic tail-to-head move, compare-and-set, and
//! fire-and-forget pub/sub. Every keyspace operation takes one short critical
//! section, so multi-key operations such as `list_move` and `set_union` are
//! atomic. Expired keys are removed lazily on access.

mod redis_store;

pub use redis_store::RedisEphemeral;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use covtrace_config::model::EphemeralConfig;
use covtrace_core::{
    AdapterType, CovtraceError, EphemeralStore, HealthStatus, PluginAdapter, Subscription,
};

/// Opens the store selected by `config`: Redis when a URL is set,
/// otherwise a fresh in-process store.
pub async fn open(config: &EphemeralConfig) -> Result<Arc<dyn EphemeralStore>, CovtraceError> {
    match config.url {
        Some(_) => Ok(Arc::new(RedisEphemeral::connect(config).await?)),
        None => {
            debug!("no ephemeral.url, using in-process store");
            Ok(Arc::new(MemoryEphemeral::new()))
        }
    }
}

/// Messages buffered per channel for slow subscribers.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Set(_) => "set",
            Self::List(_) => "list",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

type Keyspace = HashMap<String, Entry>;

/// In-process [`EphemeralStore`].
pub struct MemoryEphemeral {
    keys: Mutex<Keyspace>,
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl Default for MemoryEphemeral {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEphemeral {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            channels: DashMap::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>, CovtraceError> {
        self.keys.lock().map_err(|_| CovtraceError::Ephemeral {
            source: "keyspace lock poisoned".into(),
        })
    }

    /// Number of live keys. Purges expired ones as a side effect.
    pub fn key_count(&self) -> Result<usize, CovtraceError> {
        let mut keys = self.lock()?;
        let now = Instant::now();
        keys.retain(|_, entry| entry.live(now));
        Ok(keys.len())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

fn wrong_type(key: &str, expected: &str, found: &Value) -> CovtraceError {
    CovtraceError::Ephemeral {
        source: format!(
            "WRONGTYPE key `{key}` holds a {}, expected a {expected}",
            found.kind()
        )
        .into(),
    }
}

/// Live entry for `key`, dropping it first if it has expired.
fn live_entry<'a>(keys: &'a mut Keyspace, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if keys.get(key).is_some_and(|e| !e.live(now)) {
        keys.remove(key);
    }
    keys.get_mut(key)
}

fn set_ref<'a>(keys: &'a mut Keyspace, key: &str) -> Result<Option<&'a mut HashSet<String>>, CovtraceError> {
    match live_entry(keys, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Set(set),
            ..
        }) => Ok(Some(set)),
        Some(other) => Err(wrong_type(key, "set", &other.value)),
    }
}

fn list_ref<'a>(
    keys: &'a mut Keyspace,
    key: &str,
) -> Result<Option<&'a mut VecDeque<String>>, CovtraceError> {
    match live_entry(keys, key) {
        None => Ok(None),
        Some(Entry {
            value: Value::List(list),
            ..
        }) => Ok(Some(list)),
        Some(other) => Err(wrong_type(key, "list", &other.value)),
    }
}

/// Existing list at `key`, or a new empty one.
fn list_mut<'a>(keys: &'a mut Keyspace, key: &str) -> Result<&'a mut VecDeque<String>, CovtraceError> {
    if list_ref(keys, key)?.is_none() {
        keys.insert(
            key.to_string(),
            Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            },
        );
    }
    list_ref(keys, key)?.ok_or_else(|| CovtraceError::Internal(format!("list `{key}` vanished")))
}

#[async_trait]
impl PluginAdapter for MemoryEphemeral {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ephemeral
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        Ok(match self.keys.lock() {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy("keyspace lock poisoned".into()),
        })
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        // Dropping the senders ends every open subscription stream.
        self.channels.clear();
        debug!("ephemeral store channels closed");
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeral {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CovtraceError> {
        let mut keys = self.lock()?;
        if let Some(set) = set_ref(&mut keys, key)? {
            return Ok(set.insert(member.to_string()));
        }
        keys.insert(
            key.to_string(),
            Entry {
                value: Value::Set(HashSet::from([member.to_string()])),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, CovtraceError> {
        let mut keys = self.lock()?;
        Ok(set_ref(&mut keys, key)?.cloned().unwrap_or_default())
    }

    async fn set_union(&self, keys_to_merge: &[String]) -> Result<HashSet<String>, CovtraceError> {
        let mut keys = self.lock()?;
        let mut union = HashSet::new();
        for key in keys_to_merge {
            if let Some(set) = set_ref(&mut keys, key)? {
                union.extend(set.iter().cloned());
            }
        }
        Ok(union)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CovtraceError> {
        let mut keys = self.lock()?;
        Ok(match live_entry(&mut keys, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CovtraceError> {
        let mut keys = self.lock()?;
        keys.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CovtraceError> {
        let mut keys = self.lock()?;
        match live_entry(&mut keys, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, "string", &other.value)),
        }
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, CovtraceError> {
        let mut keys = self.lock()?;
        let current = match live_entry(&mut keys, key) {
            None => None,
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.as_str()),
            Some(other) => return Err(wrong_type(key, "string", &other.value)),
        };
        if current != expected {
            return Ok(false);
        }
        keys.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CovtraceError> {
        let mut keys = self.lock()?;
        let list = list_mut(&mut keys, key)?;
        list.push_front(value.to_string());
        Ok(list.len() as u64)
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, CovtraceError> {
        let mut keys = self.lock()?;
        // Type-check the destination before popping so a failure loses nothing.
        list_ref(&mut keys, destination)?;
        let Some(item) = list_ref(&mut keys, source)?.and_then(|l| l.pop_back()) else {
            return Ok(None);
        };
        if list_ref(&mut keys, source)?.is_some_and(|l| l.is_empty()) {
            keys.remove(source);
        }
        list_mut(&mut keys, destination)?.push_front(item.clone());
        Ok(Some(item))
    }

    async fn list_len(&self, key: &str) -> Result<u64, CovtraceError> {
        let mut keys = self.lock()?;
        Ok(list_ref(&mut keys, key)?.map_or(0, |l| l.len() as u64))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64, CovtraceError> {
        let Some(sender) = self.channels.get(channel).map(|s| s.clone()) else {
            return Ok(0);
        };
        // No receivers is not an error: pub/sub is fire-and-forget.
        Ok(sender.send(message.to_string()).unwrap_or(0) as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CovtraceError> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = stream::unfold((receiver, channel), |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, (rx, channel))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn set_add_reports_first_insert_only() {
        let store = MemoryEphemeral::new();
        assert!(store.set_add("s", "a").await.unwrap());
        assert!(!store.set_add("s", "a").await.unwrap());
        assert!(store.set_add("s", "b").await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap().len(), 2);
        assert!(store.set_members("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_union_merges_and_deduplicates() {
        let store = MemoryEphemeral::new();
        store.set_add("a", "x").await.unwrap();
        store.set_add("a", "y").await.unwrap();
        store.set_add("b", "y").await.unwrap();
        store.set_add("b", "z").await.unwrap();
        let union = store
            .set_union(&["a".into(), "b".into(), "none".into()])
            .await
            .unwrap();
        assert_eq!(union, HashSet::from(["x".into(), "y".into(), "z".into()]));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let store = MemoryEphemeral::new();
        store.set_ex("k", "v", Duration::from_secs(10)).await.unwrap();
        store.set_add("s", "m").await.unwrap();
        assert!(store.expire("s", Duration::from_secs(5)).await.unwrap());
        assert!(!store.expire("absent", Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn compare_and_set_requires_expected_value() {
        let store = MemoryEphemeral::new();
        assert!(store.compare_and_set("p", None, "a").await.unwrap());
        assert!(!store.compare_and_set("p", None, "b").await.unwrap());
        assert!(!store.compare_and_set("p", Some("b"), "a").await.unwrap());
        assert!(store.compare_and_set("p", Some("a"), "b").await.unwrap());
        assert_eq!(store.get("p").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn list_move_transfers_tail_to_head() {
        let store = MemoryEphemeral::new();
        store.list_push("src", "1").await.unwrap();
        store.list_push("src", "2").await.unwrap();
        assert_eq!(store.list_push("src", "3").await.unwrap(), 3);

        // LPUSH order: head is "3", tail is "1".
        assert_eq!(store.list_move("src", "dst").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.list_move("src", "dst").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.list_len("src").await.unwrap(), 1);
        assert_eq!(store.list_len("dst").await.unwrap(), 2);

        // Draining dst back into src yields the original FIFO order again.
        assert_eq!(store.list_move("dst", "src").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.list_move("missing", "dst").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = MemoryEphemeral::new();
        store.set_add("s", "m").await.unwrap();
        assert!(store.list_push("s", "x").await.is_err());
        assert!(store.get("s").await.is_err());
        assert!(store.list_move("s", "d").await.is_err());
    }

    #[tokio::test]
    async fn publish_reaches_existing_subscribers_only() {
        let store = MemoryEphemeral::new();
        assert_eq!(store.publish("chan", "early").await.unwrap(), 0);

        let mut sub = store.subscribe("chan").await.unwrap();
        assert_eq!(store.publish("chan", "START").await.unwrap(), 1);
        assert_eq!(sub.next().await.as_deref(), Some("START"));
    }

    #[tokio::test]
    async fn open_without_url_is_in_process() {
        let store = open(&EphemeralConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let store = MemoryEphemeral::new();
        let mut sub = store.subscribe("chan").await.unwrap();
        store.shutdown().await.unwrap();
        assert_eq!(sub.next().await, None);
    }
}
