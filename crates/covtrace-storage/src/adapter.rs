// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the DurableStore trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::OnceCell;
use tracing::debug;

use covtrace_config::model::StorageConfig;
use covtrace_core::{
    AdapterType, CovtraceError, DurableStore, HealthStatus, InfectionStatus, LocationEvent,
    Message, PluginAdapter, UserFilter, UserRecord,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed durable store.
///
/// The database is opened on [`DurableStore::initialize`]; every other call
/// fails until then.
pub struct SqliteStore {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStore {
    /// The database connection is not opened until [`DurableStore::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    fn db(&self) -> Result<&Database, CovtraceError> {
        self.db.get().ok_or_else(|| CovtraceError::Persistence {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    async fn checkpoint(db: &Database) -> Result<(), CovtraceError> {
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)
    }
}

#[async_trait]
impl PluginAdapter for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Durable
    }

    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        let Ok(db) = self.db() else {
            return Ok(HealthStatus::Unhealthy("not initialized".into()));
        };
        let ping = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await;
        Ok(match ping {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        if let Some(db) = self.db.get() {
            Self::checkpoint(db).await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn initialize(&self) -> Result<(), CovtraceError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| CovtraceError::Persistence {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), CovtraceError> {
        Self::checkpoint(self.db()?).await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), CovtraceError> {
        queries::users::upsert_user(self.db()?, user).await
    }

    async fn get_user(&self, phone: &str) -> Result<Option<UserRecord>, CovtraceError> {
        queries::users::get_user(self.db()?, phone).await
    }

    async fn update_infection_status(
        &self,
        phone: &str,
        status: InfectionStatus,
    ) -> Result<(), CovtraceError> {
        queries::users::update_infection_status(self.db()?, phone, status).await
    }

    async fn list_users(
        &self,
        filters: &[UserFilter],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<UserRecord>, CovtraceError> {
        queries::users::list_users(self.db()?, filters, offset, limit).await
    }

    async fn append_location(&self, event: &LocationEvent) -> Result<i64, CovtraceError> {
        queries::locations::append_location(self.db()?, event).await
    }

    async fn locations_on(
        &self,
        date: NaiveDate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LocationEvent>, CovtraceError> {
        queries::locations::locations_on(self.db()?, date, offset, limit).await
    }

    async fn insert_messages(&self, messages: &[Message]) -> Result<(), CovtraceError> {
        queries::messages::insert_messages(self.db()?, messages).await
    }

    async fn mark_messages_sent(&self, ids: &[String]) -> Result<(), CovtraceError> {
        queries::messages::mark_messages_sent(self.db()?, ids).await
    }

    async fn delete_messages(&self, ids: &[String]) -> Result<(), CovtraceError> {
        queries::messages::delete_messages(self.db()?, ids).await
    }

    async fn list_messages(&self, phone: &str) -> Result<Vec<Message>, CovtraceError> {
        queries::messages::list_messages(self.db()?, phone).await
    }

    async fn mark_message_seen(
        &self,
        phone: &str,
        message_id: &str,
    ) -> Result<(), CovtraceError> {
        queries::messages::mark_message_seen(self.db()?, phone, message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_store_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(store.name(), "sqlite");
        assert_eq!(store.version(), semver::Version::new(0, 1, 0));
        assert_eq!(store.adapter_type(), AdapterType::Durable);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let store = SqliteStore::new(make_config(db_path.to_str().unwrap()));

        store.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        assert!(store.initialize().await.is_err(), "second initialize should fail");
    }

    #[tokio::test]
    async fn health_reflects_initialization() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let store = SqliteStore::new(make_config(db_path.to_str().unwrap()));

        assert!(matches!(
            store.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
        store.initialize().await.unwrap();
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn calls_before_initialize_fail() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("no_init.db");
        let store = SqliteStore::new(make_config(db_path.to_str().unwrap()));

        let err = store.get_user("+1").await.unwrap_err();
        assert!(matches!(err, CovtraceError::Persistence { .. }));
    }

    #[tokio::test]
    async fn shutdown_runs_checkpoint() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("shutdown.db");
        let store = SqliteStore::new(make_config(db_path.to_str().unwrap()));
        store.initialize().await.unwrap();
        store
            .upsert_user(&UserRecord {
                phone_number: "+1".into(),
                full_name: "A".into(),
                county: "C".into(),
                infection_status: InfectionStatus::Unknown,
                device_token: None,
            })
            .await
            .unwrap();
        store.shutdown().await.unwrap();
        store.close().await.unwrap();
    }
}
