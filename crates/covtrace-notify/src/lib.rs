// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification delivery.
//!
//! Every outbound message goes through an [`OutboxTx`](covtrace_core::OutboxTx):
//! rows are written unsent before the push gateway is called, then flipped to
//! sent once the gateway accepted the call or deleted if it did not. Three
//! modes share that path:
//!
//! - direct sends to one user, failing the caller on error,
//! - streamed contact alerts, reporting failures to a bounded sink,
//! - filtered broadcasts, one outbox scope and one push call per page.

pub mod broadcast;
pub mod failure;
pub mod service;

pub use broadcast::BroadcastRequest;
pub use failure::DeliveryFailure;
pub use service::NotificationService;
