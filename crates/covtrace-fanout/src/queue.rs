// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backlog lists, the active-list pointer, the loader marker and the wake-up channel.

use std::sync::Arc;

use strum::{Display, EnumString};

use covtrace_core::{CovtraceError, EphemeralStore, Subscription};

pub const INITIALIZED_KEY: &str = "fanout:initialized";
pub const ACTIVE_KEY: &str = "fanout:active";
pub const SIGNAL_CHANNEL: &str = "fanout:signals";

/// One of the two backlog lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Backlog {
    A,
    B,
}

impl Backlog {
    pub fn key(self) -> &'static str {
        match self {
            Self::A => "fanout:backlog:a",
            Self::B => "fanout:backlog:b",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Wake-up signals published on [`SIGNAL_CHANNEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Start,
    Continue,
}

/// Handle on the shared queue structures. Cheap to clone.
#[derive(Clone)]
pub struct PushQueue {
    store: Arc<dyn EphemeralStore>,
}

impl PushQueue {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// Sets the one-time loader marker. Only the first caller across all
    /// processes sharing the store gets `true`.
    pub async fn claim_loader(&self) -> Result<bool, CovtraceError> {
        self.store.set_add(INITIALIZED_KEY, "loader").await
    }

    /// The raw pointer value and the backlog it names (`A` when unset).
    async fn pointer(&self) -> Result<(Option<String>, Backlog), CovtraceError> {
        let raw = self.store.get(ACTIVE_KEY).await?;
        let active = match raw.as_deref() {
            None => Backlog::A,
            Some(s) => s.parse().map_err(|_| CovtraceError::Ephemeral {
                source: format!("corrupt active backlog pointer `{s}`").into(),
            })?,
        };
        Ok((raw, active))
    }

    pub async fn active(&self) -> Result<Backlog, CovtraceError> {
        Ok(self.pointer().await?.1)
    }

    /// Adds a token to the active list.
    pub async fn enqueue(&self, token: &str) -> Result<u64, CovtraceError> {
        let active = self.active().await?;
        self.store.list_push(active.key(), token).await
    }

    /// Moves the next token from `active` to its staging list and returns it.
    pub async fn take_next(&self, active: Backlog) -> Result<Option<String>, CovtraceError> {
        self.store
            .list_move(active.key(), active.other().key())
            .await
    }

    /// Makes the staging list active if `drained` is still the active one.
    /// Returns `false` when a peer already swapped.
    pub async fn swap(&self, drained: Backlog) -> Result<bool, CovtraceError> {
        let (raw, active) = self.pointer().await?;
        if active != drained {
            return Ok(false);
        }
        let next = drained.other().to_string();
        self.store
            .compare_and_set(ACTIVE_KEY, raw.as_deref(), &next)
            .await
    }

    pub async fn len(&self, backlog: Backlog) -> Result<u64, CovtraceError> {
        self.store.list_len(backlog.key()).await
    }

    pub async fn signal(&self, signal: Signal) -> Result<u64, CovtraceError> {
        self.store
            .publish(SIGNAL_CHANNEL, &signal.to_string())
            .await
    }

    pub async fn subscribe(&self) -> Result<Subscription, CovtraceError> {
        self.store.subscribe(SIGNAL_CHANNEL).await
    }
}
