// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The notification service: direct sends, contact alerts, inbox access.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{
    ContactRecord, CovtraceError, DurableStore, EphemeralStore, Message, MessageType,
    Operation, OperationKind, OperationStore, OutboxTx, Payload, PushGateway, PushNotification,
    PushRequest,
};
use covtrace_push::{RetryPolicy, deliver};

use crate::broadcast::{BroadcastRequest, run_broadcast};
use crate::failure::{DeliveryFailure, FailureSink};

const ALERT_STREAM_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct NotificationService {
    pub(crate) durable: Arc<dyn DurableStore>,
    pub(crate) gateway: Arc<dyn PushGateway>,
    pub(crate) operations: OperationStore,
    pub(crate) policy: RetryPolicy,
    pub(crate) broadcast_page_size: u64,
    alert_title: String,
    failures: FailureSink,
    failure_rx: Arc<Mutex<Option<mpsc::Receiver<DeliveryFailure>>>>,
    tasks: TaskTracker,
    closing: CancellationToken,
}

impl NotificationService {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        gateway: Arc<dyn PushGateway>,
        config: &CovtraceConfig,
    ) -> Self {
        let (failures, failure_rx) = FailureSink::channel(
            config.notify.failure_capacity,
            config.notify.failure_timeout(),
        );
        Self {
            durable,
            gateway,
            operations: OperationStore::new(ephemeral, config.trace.operation_ttl()),
            policy: RetryPolicy::from_config(&config.notify, &config.push),
            broadcast_page_size: config.notify.broadcast_page_size.max(1),
            alert_title: config.notify.alert_title.clone(),
            failures,
            failure_rx: Arc::new(Mutex::new(Some(failure_rx))),
            tasks: TaskTracker::new(),
            closing: CancellationToken::new(),
        }
    }

    /// Replaces the gateway retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Takes the receiving half of the alert failure sink. Only the first call
    /// gets it; with no receiver taken, reports wait out their timeout and drop.
    pub async fn take_failures(&self) -> Option<mpsc::Receiver<DeliveryFailure>> {
        self.failure_rx.lock().await.take()
    }

    fn ensure_open(&self) -> Result<(), CovtraceError> {
        if self.closing.is_cancelled() {
            return Err(CovtraceError::FailedPrecondition(
                "notification service is shutting down".into(),
            ));
        }
        Ok(())
    }

    /// Sends one message to `phone` and returns the stored row.
    ///
    /// The row is written unsent before the push and flipped to `sent = true`
    /// only if the gateway accepted it. On a failed push the row is deleted;
    /// if the row cannot be written, the gateway is never contacted.
    pub async fn send_direct(
        &self,
        phone: &str,
        title: &str,
        body: &str,
        payload: Payload,
    ) -> Result<Message, CovtraceError> {
        require("phone", phone)?;
        require("title", title)?;
        require("body", body)?;

        let user = self
            .durable
            .get_user(phone)
            .await?
            .ok_or_else(|| CovtraceError::not_found("user", phone))?;
        let token = device_token(&user.device_token, phone)?;

        let message = Message::new(phone, title, body, payload, MessageType::Direct);
        let sent = self.deliver_one(message, token, "direct").await?;
        info!(message_id = %sent.id, phone, "direct message sent");
        Ok(sent)
    }

    /// Sends the templated contact alert for `record`.
    ///
    /// Records with no shared presence are skipped (`Ok(None)`). Failures are
    /// reported to the failure sink and then returned.
    pub async fn alert_contact(
        &self,
        record: &ContactRecord,
    ) -> Result<Option<Message>, CovtraceError> {
        if record.count == 0 {
            debug!(contact = %record.contact_phone, "no shared presence, alert skipped");
            return Ok(None);
        }

        let result: Result<Message, CovtraceError> = async {
            let token = device_token(&record.device_token, &record.contact_phone)?;
            let message = Message::new(
                record.contact_phone.clone(),
                self.alert_title.clone(),
                alert_body(record.count),
                Payload::new()
                    .with("kind", "contact_alert")
                    .with("count", record.count.to_string()),
                MessageType::Alert,
            );
            self.deliver_one(message, token, "alert").await
        }
        .await;

        match result {
            Ok(sent) => {
                debug!(message_id = %sent.id, contact = %record.contact_phone, "contact alerted");
                Ok(Some(sent))
            }
            Err(e) => {
                self.failures
                    .report(DeliveryFailure {
                        phone: record.contact_phone.clone(),
                        message_type: MessageType::Alert,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Opens a stream of contact records to alert on.
    ///
    /// Records are processed in order by a background consumer until every
    /// sender is dropped. Fails once [`Self::close`] has been called.
    pub fn open_alert_stream(&self) -> Result<mpsc::Sender<ContactRecord>, CovtraceError> {
        self.ensure_open()?;
        let (tx, mut rx) = mpsc::channel::<ContactRecord>(ALERT_STREAM_CAPACITY);
        let svc = self.clone();
        self.tasks.spawn(async move {
            let (mut alerted, mut failed) = (0u64, 0u64);
            while let Some(record) = rx.recv().await {
                match svc.alert_contact(&record).await {
                    Ok(Some(_)) => alerted += 1,
                    Ok(None) => {}
                    Err(_) => failed += 1,
                }
            }
            debug!(alerted, failed, "alert stream drained");
        });
        Ok(tx)
    }

    /// Starts a broadcast and returns its operation id immediately.
    ///
    /// Delivery runs in the background; poll [`Self::operation`] for the outcome.
    pub async fn broadcast(&self, request: BroadcastRequest) -> Result<String, CovtraceError> {
        request.validate()?;
        self.ensure_open()?;

        let op = self.operations.create(OperationKind::Broadcast).await?;
        let id = op.id.clone();
        let svc = self.clone();
        self.tasks.spawn(async move {
            run_broadcast(&svc, &op.id, &request).await;
        });
        info!(operation_id = %id, "broadcast accepted");
        Ok(id)
    }

    /// Current state of a trace or broadcast operation.
    pub async fn operation(&self, id: &str) -> Result<Operation, CovtraceError> {
        self.operations.get(id).await
    }

    /// A user's messages, newest first.
    pub async fn list_messages(&self, phone: &str) -> Result<Vec<Message>, CovtraceError> {
        require("phone", phone)?;
        self.durable.list_messages(phone).await
    }

    pub async fn mark_seen(&self, phone: &str, message_id: &str) -> Result<(), CovtraceError> {
        require("phone", phone)?;
        require("message id", message_id)?;
        self.durable.mark_message_seen(phone, message_id).await
    }

    /// Stops accepting alert streams and broadcasts, then waits for running
    /// background work to finish.
    pub async fn close(&self) {
        self.closing.cancel();
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(tasks = self.tasks.len(), "waiting for notification tasks");
        }
        self.tasks.wait().await;
    }

    /// Persists `message` unsent, pushes it to `token` and commits it as sent.
    async fn deliver_one(
        &self,
        message: Message,
        token: &str,
        path: &'static str,
    ) -> Result<Message, CovtraceError> {
        let message_type = message.message_type;
        let mut tx = OutboxTx::begin(self.durable.clone());
        let staged = tx.stage(message)?.clone();
        tx.persist().await?;
        let request = PushRequest::single(token, notification_for(&staged));

        let receipt = match deliver(self.gateway.as_ref(), &request, self.policy).await {
            Ok(receipt) if receipt.success == 0 && receipt.failure > 0 => {
                Err(CovtraceError::permanent_delivery(format!(
                    "gateway could not deliver to device of {}",
                    staged.user_phone
                )))
            }
            other => other,
        };
        if let Err(e) = receipt {
            warn!(path, phone = %staged.user_phone, error = %e, "push failed, outbox rolled back");
            if let Err(rb) = tx.rollback().await {
                warn!(message_id = %staged.id, error = %rb, "outbox rollback failed, row left unsent");
            }
            covtrace_prometheus::record_delivery_failure(path);
            return Err(e);
        }

        let mut rows = tx.commit().await?;
        covtrace_prometheus::record_messages_sent(&message_type.to_string(), 1);
        rows.pop()
            .ok_or_else(|| CovtraceError::Internal("outbox committed no rows".into()))
    }
}

pub(crate) fn notification_for(message: &Message) -> PushNotification {
    PushNotification {
        title: message.title.clone(),
        body: message.body.clone(),
        payload: message.payload.clone().with("messageId", message.id.clone()),
    }
}

fn alert_body(count: u64) -> String {
    let times = if count == 1 { "time" } else { "times" };
    format!("You were in contact {count} {times} with a COVID-positive person.")
}

fn require(field: &str, value: &str) -> Result<(), CovtraceError> {
    if value.trim().is_empty() {
        return Err(CovtraceError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

fn device_token<'a>(token: &'a Option<String>, phone: &str) -> Result<&'a str, CovtraceError> {
    token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CovtraceError::not_found("device", phone))
}
