// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions.
//!
//! Every collaborator extends the [`PluginAdapter`] base trait and uses
//! `#[async_trait]` for dynamic dispatch compatibility, so services hold them
//! as `Arc<dyn Trait>`.

pub mod adapter;
pub mod durable;
pub mod ephemeral;
pub mod gateway;

pub use adapter::PluginAdapter;
pub use durable::DurableStore;
pub use ephemeral::{EphemeralStore, Subscription};
pub use gateway::PushGateway;
