// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redis-backed ephemeral store.
//!
//! Shared by every process pointed at the same server and namespace, so
//! presence sets, fan-out backlogs and loader election coordinate across
//! processes. Each trait operation maps onto one Redis command:
//!
//! - sets: `SADD`, `SMEMBERS`, `SUNION`
//! - strings: `SET PX` (via `PSETEX`), `GET`, `PEXPIRE`
//! - lists: `LPUSH`, `LMOVE RIGHT LEFT`, `LLEN`
//! - pub/sub: `PUBLISH`, and `SUBSCRIBE` on a dedicated connection
//!
//! Compare-and-set runs as a Lua script, which Redis executes atomically.
//!
//! Commands share one [`ConnectionManager`], which reconnects on its own.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, Direction, RedisError, Script};
use tracing::{debug, info, warn};

use covtrace_config::model::EphemeralConfig;
use covtrace_core::{
    AdapterType, CovtraceError, EphemeralStore, HealthStatus, PluginAdapter, Subscription,
};

/// `ARGV[1]` is `"1"` when a current value is expected, `ARGV[2]` that value,
/// `ARGV[3]` the new value.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '0' then
    if current then return 0 end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

fn ephemeral_err(e: RedisError) -> CovtraceError {
    CovtraceError::Ephemeral {
        source: Box::new(e),
    }
}

/// [`EphemeralStore`] on a Redis server.
pub struct RedisEphemeral {
    client: Client,
    conn: ConnectionManager,
    namespace: String,
    cas: Script,
}

impl RedisEphemeral {
    /// Connects to `config.url`.
    pub async fn connect(config: &EphemeralConfig) -> Result<Self, CovtraceError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CovtraceError::Config("ephemeral.url is not set".into()))?;
        let client = Client::open(url)
            .map_err(|e| CovtraceError::Config(format!("invalid ephemeral.url: {e}")))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(config.connect_retries)
            .set_connection_timeout(config.connect_timeout());
        let conn = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(ephemeral_err)?;

        info!(namespace = %config.namespace, "redis ephemeral store connected");
        Ok(Self {
            client,
            conn,
            namespace: config.namespace.clone(),
            cas: Script::new(COMPARE_AND_SET),
        })
    }

    /// Fully qualified name for a key or channel.
    fn scoped(&self, name: &str) -> String {
        scoped_name(&self.namespace, name)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn scoped_name(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

/// Millisecond TTL for Redis, never zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl PluginAdapter for RedisEphemeral {
    fn name(&self) -> &str {
        "redis"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Ephemeral
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        let mut conn = self.conn();
        let reply: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        Ok(match reply {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        // Connections close when the last manager clone drops.
        debug!("redis ephemeral store released");
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeral {
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CovtraceError> {
        let added: u64 = self
            .conn()
            .sadd(self.scoped(key), member)
            .await
            .map_err(ephemeral_err)?;
        Ok(added > 0)
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, CovtraceError> {
        self.conn()
            .smembers(self.scoped(key))
            .await
            .map_err(ephemeral_err)
    }

    async fn set_union(&self, keys: &[String]) -> Result<HashSet<String>, CovtraceError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let scoped: Vec<String> = keys.iter().map(|k| self.scoped(k)).collect();
        self.conn().sunion(scoped).await.map_err(ephemeral_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CovtraceError> {
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        self.conn()
            .pexpire(self.scoped(key), millis)
            .await
            .map_err(ephemeral_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CovtraceError> {
        self.conn()
            .pset_ex(self.scoped(key), value, ttl_millis(ttl))
            .await
            .map_err(ephemeral_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CovtraceError> {
        self.conn()
            .get(self.scoped(key))
            .await
            .map_err(ephemeral_err)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, CovtraceError> {
        let mut conn = self.conn();
        let written: i64 = self
            .cas
            .key(self.scoped(key))
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(ephemeral_err)?;
        Ok(written == 1)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<u64, CovtraceError> {
        self.conn()
            .lpush(self.scoped(key), value)
            .await
            .map_err(ephemeral_err)
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, CovtraceError> {
        self.conn()
            .lmove(
                self.scoped(source),
                self.scoped(destination),
                Direction::Right,
                Direction::Left,
            )
            .await
            .map_err(ephemeral_err)
    }

    async fn list_len(&self, key: &str) -> Result<u64, CovtraceError> {
        self.conn()
            .llen(self.scoped(key))
            .await
            .map_err(ephemeral_err)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u64, CovtraceError> {
        self.conn()
            .publish(self.scoped(channel), message)
            .await
            .map_err(ephemeral_err)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CovtraceError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(ephemeral_err)?;
        let scoped = self.scoped(channel);
        pubsub.subscribe(&scoped).await.map_err(ephemeral_err)?;
        debug!(channel = %scoped, "subscribed");

        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = msg.get_payload::<String>();
            let channel = scoped.clone();
            async move {
                match payload {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(%channel, error = %e, "non-text pub/sub payload skipped");
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
