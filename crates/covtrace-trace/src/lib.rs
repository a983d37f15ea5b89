// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact tracing for a positive patient.
//!
//! [`ContactMatcher::start`] validates the request, records a long-running
//! operation and returns its id; the scan itself runs in the background. The
//! worker pages through the user population, scans candidates concurrently
//! under a semaphore, and streams one [`ContactRecord`](covtrace_core::ContactRecord)
//! per candidate into the notifier's alert stream.

pub mod matcher;
pub mod missed;

pub use matcher::{Clock, ContactMatcher};
pub use missed::MissedDay;
