// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throwaway environment for service-level tests.
//!
//! `TestEnv` owns a temp directory holding a migrated SQLite database, an
//! in-memory ephemeral store and a [`MockGateway`]. Dropping it removes the
//! database file.

use std::sync::Arc;

use covtrace_config::model::{CovtraceConfig, StorageConfig};
use covtrace_core::{
    CovtraceError, DurableStore, EphemeralStore, InfectionStatus, PushGateway, UserRecord,
};
use covtrace_ephemeral::MemoryEphemeral;
use covtrace_storage::SqliteStore;

use crate::mock_gateway::MockGateway;

pub struct TestEnv {
    pub config: CovtraceConfig,
    pub durable: Arc<SqliteStore>,
    pub ephemeral: Arc<MemoryEphemeral>,
    pub gateway: Arc<MockGateway>,
    _temp_dir: tempfile::TempDir,
}

impl TestEnv {
    /// Builds an environment with default configuration.
    pub async fn new() -> Result<Self, CovtraceError> {
        Self::with_config(CovtraceConfig::default()).await
    }

    /// Builds an environment from `config`. The storage section is replaced
    /// with a temp database path.
    pub async fn with_config(mut config: CovtraceConfig) -> Result<Self, CovtraceError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| CovtraceError::Persistence {
            source: Box::new(e),
        })?;
        let db_path = temp_dir.path().join("test.db");
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };

        let durable = SqliteStore::new(config.storage.clone());
        durable.initialize().await?;

        Ok(Self {
            config,
            durable: Arc::new(durable),
            ephemeral: Arc::new(MemoryEphemeral::new()),
            gateway: Arc::new(MockGateway::new()),
            _temp_dir: temp_dir,
        })
    }

    pub fn durable(&self) -> Arc<dyn DurableStore> {
        self.durable.clone()
    }

    pub fn ephemeral(&self) -> Arc<dyn EphemeralStore> {
        self.ephemeral.clone()
    }

    pub fn gateway(&self) -> Arc<dyn PushGateway> {
        self.gateway.clone()
    }

    /// Registers a user. `device_token` of `None` leaves the user unreachable by push.
    pub async fn seed_user(
        &self,
        phone: &str,
        county: &str,
        status: InfectionStatus,
        device_token: Option<&str>,
    ) -> Result<UserRecord, CovtraceError> {
        let user = UserRecord {
            phone_number: phone.to_string(),
            full_name: format!("User {phone}"),
            county: county.to_string(),
            infection_status: status,
            device_token: device_token.map(str::to_string),
        };
        self.durable.upsert_user(&user).await?;
        Ok(user)
    }

    /// Seeds `n` NEGATIVE users with phones `+1555{i:07}` and
    /// tokens `token-{i}`. Returns them in phone order.
    pub async fn seed_population(
        &self,
        n: usize,
        county: &str,
    ) -> Result<Vec<UserRecord>, CovtraceError> {
        let mut users = Vec::with_capacity(n);
        for i in 0..n {
            let phone = format!("+1555{i:07}");
            let token = format!("token-{i}");
            users.push(
                self.seed_user(&phone, county, InfectionStatus::Negative, Some(&token))
                    .await?,
            );
        }
        Ok(users)
    }
}
