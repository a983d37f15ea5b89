// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Covtrace contact-tracing engine.
//!
//! This crate provides the collaborator traits (durable store, ephemeral
//! store, push gateway), the error taxonomy, the domain types, and the two
//! building blocks shared by the services: the transactional outbox scope and
//! long-running operation records.

pub mod error;
pub mod operation;
pub mod outbox;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{CovtraceError, ErrorCode};
pub use operation::{Operation, OperationKind, OperationState, OperationStore};
pub use outbox::OutboxTx;
pub use types::{
    AdapterType, ContactRecord, HealthStatus, InfectionStatus, LocationEvent, Message,
    MessageType, Payload, PresenceToken, PushNotification, PushReceipt, PushRequest,
    UserFilter, UserRecord,
};

pub use traits::{DurableStore, EphemeralStore, PluginAdapter, PushGateway, Subscription};
