// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push gateway delivery.
//!
//! [`HttpPushGateway`] performs single delivery attempts against an HTTP push
//! gateway; [`deliver`] wraps any [`PushGateway`](covtrace_core::PushGateway)
//! in a bounded retry-with-backoff loop.

pub mod client;
pub mod retry;

pub use client::HttpPushGateway;
pub use retry::{RetryPolicy, deliver};
