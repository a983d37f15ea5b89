// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Paged broadcast delivery.
//!
//! Each page of matching users is one outbox scope plus one multi-recipient
//! push. A failed page rolls back its rows and stops the broadcast; pages
//! already committed stay committed.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use covtrace_core::{
    CovtraceError, Message, MessageType, OutboxTx, Payload, PushNotification, PushRequest,
    UserFilter,
};
use covtrace_push::deliver;

use crate::service::NotificationService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    /// Recipients match if they match any filter.
    pub filters: Vec<UserFilter>,
    pub title: String,
    pub body: String,
    pub payload: Payload,
}

impl BroadcastRequest {
    pub fn validate(&self) -> Result<(), CovtraceError> {
        let missing = if self.filters.is_empty() {
            Some("at least one filter")
        } else if self.title.trim().is_empty() {
            Some("title")
        } else if self.body.trim().is_empty() {
            Some("body")
        } else if self.payload.is_empty() {
            Some("payload")
        } else {
            None
        };
        match missing {
            Some(field) => Err(CovtraceError::InvalidArgument(format!(
                "broadcast {field} is required"
            ))),
            None => Ok(()),
        }
    }
}

/// Outcome of one page.
enum PageOutcome {
    Delivered(u64),
    Empty,
}

/// Runs a broadcast to completion, recording the outcome on operation `op_id`.
pub(crate) async fn run_broadcast(svc: &NotificationService, op_id: &str, request: &BroadcastRequest) {
    if let Err(e) = svc.operations.mark_running(op_id).await {
        error!(operation_id = op_id, error = %e, "cannot start broadcast");
        return;
    }

    let page_size = svc.broadcast_page_size;
    let mut offset = 0u64;
    let mut delivered = 0u64;
    loop {
        let users = match svc.durable.list_users(&request.filters, offset, page_size).await {
            Ok(users) => users,
            Err(e) => return fail(svc, op_id, offset, e).await,
        };
        if users.is_empty() {
            break;
        }
        let fetched = users.len() as u64;

        let recipients: Vec<(String, String)> = users
            .into_iter()
            .filter_map(|u| match u.device_token {
                Some(token) if !token.is_empty() => Some((u.phone_number, token)),
                _ => None,
            })
            .collect();

        match deliver_page(svc, request, recipients).await {
            Ok(PageOutcome::Delivered(n)) => {
                delivered += n;
                if let Err(e) = svc.operations.set_progress(op_id, delivered).await {
                    warn!(operation_id = op_id, error = %e, "broadcast progress not saved");
                }
            }
            Ok(PageOutcome::Empty) => {}
            Err(e) => return fail(svc, op_id, offset, e).await,
        }

        offset += fetched;
        if fetched < page_size {
            break;
        }
    }

    match svc.operations.complete(op_id).await {
        Ok(_) => info!(operation_id = op_id, delivered, "broadcast finished"),
        Err(e) => error!(operation_id = op_id, error = %e, "broadcast finished but state not saved"),
    }
}

async fn deliver_page(
    svc: &NotificationService,
    request: &BroadcastRequest,
    recipients: Vec<(String, String)>,
) -> Result<PageOutcome, CovtraceError> {
    if recipients.is_empty() {
        return Ok(PageOutcome::Empty);
    }

    let mut tx = OutboxTx::begin(svc.durable.clone());
    let mut tokens = Vec::with_capacity(recipients.len());
    for (phone, token) in recipients {
        tx.stage(Message::new(
            phone,
            request.title.clone(),
            request.body.clone(),
            request.payload.clone(),
            MessageType::Broadcast,
        ))?;
        tokens.push(token);
    }
    tx.persist().await?;

    let push = PushRequest {
        tokens,
        notification: PushNotification {
            title: request.title.clone(),
            body: request.body.clone(),
            payload: request.payload.clone(),
        },
    };
    let receipt = match deliver(svc.gateway.as_ref(), &push, svc.policy).await {
        Ok(receipt) => receipt,
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                warn!(rows = push.tokens.len(), error = %rb, "broadcast page rollback failed, rows left unsent");
            }
            covtrace_prometheus::record_delivery_failure("broadcast");
            return Err(e);
        }
    };
    if receipt.failure > 0 {
        warn!(
            failed = receipt.failure,
            tokens = ?receipt.failed_tokens,
            "gateway reported undeliverable tokens in broadcast page"
        );
    }

    let rows = tx.commit().await?;
    covtrace_prometheus::record_messages_sent("BROADCAST", rows.len() as u64);
    Ok(PageOutcome::Delivered(rows.len() as u64))
}

async fn fail(svc: &NotificationService, op_id: &str, offset: u64, e: CovtraceError) {
    error!(operation_id = op_id, offset, error = %e, "broadcast page failed, remaining pages aborted");
    if let Err(save) = svc
        .operations
        .fail(op_id, format!("page at offset {offset}: {e}"))
        .await
    {
        error!(operation_id = op_id, error = %save, "broadcast failure state not saved");
    }
}
