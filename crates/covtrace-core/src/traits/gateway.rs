// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push gateway trait for device notification delivery.

use async_trait::async_trait;

use crate::error::CovtraceError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{PushReceipt, PushRequest};

/// Adapter for a push notification gateway.
///
/// `send` performs exactly one delivery attempt. Failures are reported as
/// [`CovtraceError::Delivery`] with `transient` set when a retry may succeed;
/// retry budgets are applied by the caller.
#[async_trait]
pub trait PushGateway: PluginAdapter {
    async fn send(&self, request: &PushRequest) -> Result<PushReceipt, CovtraceError>;
}
