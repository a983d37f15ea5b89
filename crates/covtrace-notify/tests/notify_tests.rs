// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NotificationService against SQLite, the in-memory ephemeral store and the
//! mock gateway.

use std::sync::Arc;
use std::time::Duration;

use covtrace_config::model::CovtraceConfig;
use covtrace_core::{
    ContactRecord, CovtraceError, DurableStore, InfectionStatus, MessageType, Operation,
    OperationState, Payload, UserFilter,
};
use covtrace_notify::{BroadcastRequest, NotificationService};
use covtrace_push::RetryPolicy;
use covtrace_test_utils::{FaultyDurable, TestEnv};

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
    }
}

fn service(env: &TestEnv) -> NotificationService {
    NotificationService::new(env.durable(), env.ephemeral(), env.gateway(), &env.config)
        .with_retry_policy(fast_retries())
}

async fn wait_for_done(svc: &NotificationService, id: &str) -> Operation {
    for _ in 0..500 {
        let op = svc.operation(id).await.unwrap();
        if op.done {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {id} did not finish");
}

fn broadcast(filters: Vec<UserFilter>) -> BroadcastRequest {
    BroadcastRequest {
        filters,
        title: "T".into(),
        body: "Stay home".into(),
        payload: Payload::new().with("kind", "advisory"),
    }
}

#[tokio::test]
async fn direct_send_commits_one_sent_row() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    let svc = service(&env);

    let msg = svc
        .send_direct("+1", "Hello", "Body", Payload::new())
        .await
        .unwrap();
    assert!(msg.sent);

    let inbox = env.durable.list_messages("+1").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, msg.id);
    assert!(inbox[0].sent);
    assert_eq!(inbox[0].message_type, MessageType::Direct);

    let calls = env.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tokens, vec!["tok-1".to_string()]);
    assert_eq!(calls[0].notification.payload.get("messageId"), Some(msg.id.as_str()));
}

#[tokio::test]
async fn failed_direct_send_leaves_no_row() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    env.gateway.fail_always(false).await;
    let svc = service(&env);

    let err = svc
        .send_direct("+1", "Hello", "Body", Payload::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CovtraceError::Delivery { transient: false, .. }));
    assert!(env.durable.list_messages("+1").await.unwrap().is_empty());
    assert_eq!(env.gateway.call_count().await, 1, "permanent failures are not retried");
}

fn faulty_service(env: &TestEnv) -> (Arc<FaultyDurable>, NotificationService) {
    let durable = Arc::new(FaultyDurable::new(env.durable()));
    let svc = NotificationService::new(durable.clone(), env.ephemeral(), env.gateway(), &env.config)
        .with_retry_policy(fast_retries());
    (durable, svc)
}

#[tokio::test]
async fn unwritable_row_aborts_send_before_any_push() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    let (durable, svc) = faulty_service(&env);
    durable.fail_inserts(true);

    let err = svc
        .send_direct("+1", "Hello", "Body", Payload::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CovtraceError::Persistence { .. }));
    assert_eq!(env.gateway.call_count().await, 0);
    assert!(env.durable.list_messages("+1").await.unwrap().is_empty());
}

#[tokio::test]
async fn delivered_message_keeps_its_row_when_sent_flag_cannot_be_saved() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    let (durable, svc) = faulty_service(&env);
    durable.fail_mark_sent(true);

    assert!(svc.send_direct("+1", "Hello", "Body", Payload::new()).await.is_err());

    let calls = env.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    let pushed_id = calls[0].notification.payload.get("messageId").unwrap().to_string();
    let inbox = env.durable.list_messages("+1").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].id, pushed_id);
    assert!(!inbox[0].sent);
    svc.mark_seen("+1", &pushed_id).await.unwrap();
}

#[tokio::test]
async fn unwritable_broadcast_page_fails_without_pushing() {
    let env = TestEnv::new().await.unwrap();
    env.seed_population(3, "Kisumu").await.unwrap();
    let (durable, svc) = faulty_service(&env);
    durable.fail_inserts(true);

    let id = svc.broadcast(broadcast(vec![UserFilter::All])).await.unwrap();
    let op = wait_for_done(&svc, &id).await;
    assert_eq!(op.state, OperationState::Failed);
    assert_eq!(env.gateway.call_count().await, 0);
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    env.gateway.fail_next(2, true).await;
    let svc = service(&env);

    let msg = svc
        .send_direct("+1", "Hello", "Body", Payload::new())
        .await
        .unwrap();
    assert!(msg.sent);
    assert_eq!(env.gateway.call_count().await, 3);
    assert_eq!(env.durable.list_messages("+1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_budget_fails_the_send() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    env.gateway.fail_always(true).await;
    let svc = service(&env);

    let err = svc
        .send_direct("+1", "Hello", "Body", Payload::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(env.gateway.call_count().await, 3);
    assert!(env.durable.list_messages("+1").await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_send_validates_and_resolves_recipient() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+2", "Kisumu", InfectionStatus::Negative, None)
        .await
        .unwrap();
    let svc = service(&env);

    let err = svc.send_direct("", "T", "B", Payload::new()).await.unwrap_err();
    assert!(matches!(err, CovtraceError::InvalidArgument(_)));
    let err = svc.send_direct("+2", "", "B", Payload::new()).await.unwrap_err();
    assert!(matches!(err, CovtraceError::InvalidArgument(_)));

    let err = svc.send_direct("+404", "T", "B", Payload::new()).await.unwrap_err();
    assert!(matches!(err, CovtraceError::NotFound { ref kind, .. } if kind == "user"));
    let err = svc.send_direct("+2", "T", "B", Payload::new()).await.unwrap_err();
    assert!(matches!(err, CovtraceError::NotFound { ref kind, .. } if kind == "device"));

    assert_eq!(env.gateway.call_count().await, 0);
}

#[tokio::test]
async fn alert_stream_alerts_contacts_with_overlap() {
    let env = TestEnv::new().await.unwrap();
    let svc = service(&env);

    let stream = svc.open_alert_stream().unwrap();
    stream
        .send(ContactRecord {
            patient_phone: "+P".into(),
            contact_phone: "+C".into(),
            device_token: Some("tok-c".into()),
            count: 2,
            contact_points: Vec::new(),
        })
        .await
        .unwrap();
    stream
        .send(ContactRecord {
            patient_phone: "+P".into(),
            contact_phone: "+D".into(),
            device_token: Some("tok-d".into()),
            count: 0,
            contact_points: Vec::new(),
        })
        .await
        .unwrap();
    drop(stream);
    svc.close().await;

    let inbox = env.durable.list_messages("+C").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message_type, MessageType::Alert);
    assert!(inbox[0].body.contains("2 times"));
    assert!(inbox[0].sent);
    assert!(env.durable.list_messages("+D").await.unwrap().is_empty());
    assert_eq!(env.gateway.call_count().await, 1);
}

#[tokio::test]
async fn alert_failures_reach_the_sink() {
    let env = TestEnv::new().await.unwrap();
    env.gateway.fail_always(false).await;
    let svc = service(&env);
    let mut failures = svc.take_failures().await.unwrap();
    assert!(svc.take_failures().await.is_none());

    let record = ContactRecord {
        patient_phone: "+P".into(),
        contact_phone: "+C".into(),
        device_token: Some("tok-c".into()),
        count: 1,
        contact_points: Vec::new(),
    };
    assert!(svc.alert_contact(&record).await.is_err());

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.phone, "+C");
    assert_eq!(failure.message_type, MessageType::Alert);
    assert!(env.durable.list_messages("+C").await.unwrap().is_empty());
}

#[tokio::test]
async fn closed_service_refuses_new_streams_and_broadcasts() {
    let env = TestEnv::new().await.unwrap();
    let svc = service(&env);
    svc.close().await;

    assert!(matches!(
        svc.open_alert_stream(),
        Err(CovtraceError::FailedPrecondition(_))
    ));
    assert!(matches!(
        svc.broadcast(broadcast(vec![UserFilter::All])).await,
        Err(CovtraceError::FailedPrecondition(_))
    ));
}

#[tokio::test]
async fn broadcast_to_all_sends_one_multi_recipient_push() {
    let env = TestEnv::new().await.unwrap();
    let users = env.seed_population(3, "Mombasa").await.unwrap();
    let svc = service(&env);

    let id = svc.broadcast(broadcast(vec![UserFilter::All])).await.unwrap();
    let op = wait_for_done(&svc, &id).await;
    assert_eq!(op.state, OperationState::Done);
    assert_eq!(op.progress, 3);

    let calls = env.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    let mut tokens = calls[0].tokens.clone();
    tokens.sort();
    assert_eq!(tokens, vec!["token-0", "token-1", "token-2"]);
    assert_eq!(calls[0].notification.title, "T");

    for user in &users {
        let inbox = env.durable.list_messages(&user.phone_number).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].sent);
        assert_eq!(inbox[0].message_type, MessageType::Broadcast);
    }
}

#[tokio::test]
async fn failed_page_rolls_back_and_aborts_remaining_pages() {
    let mut config = CovtraceConfig::default();
    config.notify.broadcast_page_size = 2;
    let env = TestEnv::with_config(config).await.unwrap();
    let users = env.seed_population(5, "Mombasa").await.unwrap();
    env.gateway.poison_token("token-2").await;
    let svc = service(&env);

    let id = svc.broadcast(broadcast(vec![UserFilter::All])).await.unwrap();
    let op = wait_for_done(&svc, &id).await;
    assert_eq!(op.state, OperationState::Failed);
    assert!(op.error_detail.unwrap().contains("offset 2"));

    let counts: Vec<usize> = {
        let mut counts = Vec::new();
        for user in &users {
            counts.push(env.durable.list_messages(&user.phone_number).await.unwrap().len());
        }
        counts
    };
    assert_eq!(counts, vec![1, 1, 0, 0, 0]);
    assert_eq!(env.gateway.call_count().await, 2);
}

#[tokio::test]
async fn broadcast_filters_select_recipients() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Nakuru", InfectionStatus::Negative, Some("a"))
        .await
        .unwrap();
    env.seed_user("+2", "Nyeri", InfectionStatus::Suspected, Some("b"))
        .await
        .unwrap();
    env.seed_user("+3", "Nyeri", InfectionStatus::Negative, None)
        .await
        .unwrap();
    let svc = service(&env);

    let id = svc
        .broadcast(broadcast(vec![UserFilter::County("Nyeri".into())]))
        .await
        .unwrap();
    assert_eq!(wait_for_done(&svc, &id).await.state, OperationState::Done);

    let calls = env.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tokens, vec!["b".to_string()]);
    assert!(env.durable.list_messages("+1").await.unwrap().is_empty());
    assert!(env.durable.list_messages("+3").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_broadcast_is_rejected_before_any_work() {
    let env = TestEnv::new().await.unwrap();
    let svc = service(&env);
    let err = svc.broadcast(broadcast(Vec::new())).await.unwrap_err();
    assert!(matches!(err, CovtraceError::InvalidArgument(_)));
    assert_eq!(env.ephemeral.key_count().unwrap(), 0);
}

#[tokio::test]
async fn inbox_lists_and_marks_seen() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+1", "Kisumu", InfectionStatus::Negative, Some("tok-1"))
        .await
        .unwrap();
    let svc = service(&env);
    let msg = svc.send_direct("+1", "T", "B", Payload::new()).await.unwrap();

    svc.mark_seen("+1", &msg.id).await.unwrap();
    let inbox = svc.list_messages("+1").await.unwrap();
    assert!(inbox[0].seen);

    let err = svc.mark_seen("+9", &msg.id).await.unwrap_err();
    assert!(matches!(err, CovtraceError::NotFound { .. }));
}
