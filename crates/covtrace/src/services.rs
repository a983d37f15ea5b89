// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The service container.
//!
//! Built once per process from configuration and passed by reference to
//! every command; there is no global state.

use std::sync::Arc;

use tracing::{info, warn};

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{
    CovtraceError, DurableStore, EphemeralStore, HealthStatus, PluginAdapter, PushGateway,
};
use covtrace_notify::NotificationService;
use covtrace_presence::PresenceStore;
use covtrace_push::HttpPushGateway;
use covtrace_storage::SqliteStore;
use covtrace_trace::ContactMatcher;

pub struct Services {
    pub durable: Arc<SqliteStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub gateway: Arc<dyn PushGateway>,
    pub presence: Arc<PresenceStore>,
    pub notifier: NotificationService,
    pub matcher: ContactMatcher,
}

/// Opens and migrates the durable store.
pub async fn open_durable(config: &CovtraceConfig) -> Result<Arc<SqliteStore>, CovtraceError> {
    let durable = SqliteStore::new(config.storage.clone());
    durable.initialize().await?;
    Ok(Arc::new(durable))
}

impl Services {
    /// Builds the container with the HTTP push gateway from `config.push`.
    pub async fn from_config(config: &CovtraceConfig) -> Result<Self, CovtraceError> {
        let gateway: Arc<dyn PushGateway> = Arc::new(HttpPushGateway::new(&config.push)?);
        Self::build(config, gateway).await
    }

    pub async fn build(
        config: &CovtraceConfig,
        gateway: Arc<dyn PushGateway>,
    ) -> Result<Self, CovtraceError> {
        let durable = open_durable(config).await?;
        let ephemeral = covtrace_ephemeral::open(&config.ephemeral).await?;

        let presence = Arc::new(PresenceStore::from_config(
            durable.clone(),
            ephemeral.clone(),
            &config.presence,
        ));
        let notifier =
            NotificationService::new(durable.clone(), ephemeral.clone(), gateway.clone(), config);
        let matcher = ContactMatcher::new(
            durable.clone(),
            ephemeral.clone(),
            presence.clone(),
            notifier.clone(),
            &config.trace,
        );

        Ok(Self {
            durable,
            ephemeral,
            gateway,
            presence,
            notifier,
            matcher,
        })
    }

    /// Health of every collaborator, by adapter name.
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        vec![
            health_of(self.durable.as_ref()).await,
            health_of(self.ephemeral.as_ref()).await,
            health_of(self.gateway.as_ref()).await,
        ]
    }

    /// Drains background work, then closes every collaborator.
    pub async fn shutdown(&self) {
        self.matcher.close().await;
        self.notifier.close().await;
        if let Err(e) = self.durable.close().await {
            warn!(error = %e, "durable store close failed");
        }
        close_adapter(self.ephemeral.as_ref()).await;
        close_adapter(self.gateway.as_ref()).await;
        info!("services shut down");
    }
}

async fn health_of<A: PluginAdapter + ?Sized>(adapter: &A) -> (String, HealthStatus) {
    let status = adapter
        .health_check()
        .await
        .unwrap_or_else(|e| HealthStatus::Unhealthy(e.to_string()));
    (adapter.name().to_string(), status)
}

async fn close_adapter<A: PluginAdapter + ?Sized>(adapter: &A) {
    if let Err(e) = adapter.shutdown().await {
        warn!(adapter = adapter.name(), error = %e, "adapter shutdown failed");
    }
}
