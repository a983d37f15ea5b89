// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Continuous push fan-out to the whole device population.
//!
//! Device tokens live in two backlog lists in the ephemeral store. Workers
//! atomically move tokens from the active list to the staging list and push
//! to each one; when the active list runs dry the roles swap and the next
//! sweep starts over. A token is always in exactly one list, so a crashed
//! worker never loses one.
//!
//! One process per cluster wins the `fanout:initialized` marker and becomes
//! the loader: it fills the backlog from the durable store, publishes
//! `START`, and keeps publishing `CONTINUE` on an interval to wake idle peers.

pub mod queue;
pub mod worker;

pub use queue::{Backlog, PushQueue, Signal};
pub use worker::{PushFanoutWorker, SweepStats};
