// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the complete Covtrace pipeline.
//!
//! The first group wires the services together over a [`TestEnv`]. The second
//! drives the `covtrace` binary against a temp database and a mock HTTP push
//! gateway.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use covtrace_core::{
    DurableStore, InfectionStatus, MessageType, Operation, OperationState, Payload, UserFilter,
};
use covtrace_fanout::PushFanoutWorker;
use covtrace_notify::{BroadcastRequest, NotificationService};
use covtrace_presence::{Location, PresenceStore};
use covtrace_push::RetryPolicy;
use covtrace_test_utils::TestEnv;
use covtrace_trace::ContactMatcher;

const MARKET: Location = Location {
    latitude: -1.2833,
    longitude: 36.8167,
    accuracy: None,
    speed: None,
};

async fn wait_for_done(notifier: &NotificationService, id: &str) -> Operation {
    for _ in 0..500 {
        let op = notifier.operation(id).await.unwrap();
        if op.done {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {id} did not finish");
}

// ---- Library pipeline ----

#[tokio::test]
async fn positive_report_alerts_only_colocated_users() {
    let env = TestEnv::new().await.unwrap();
    env.seed_user("+P", "Nairobi", InfectionStatus::Unknown, Some("tok-p"))
        .await
        .unwrap();
    env.seed_user("+C", "Nairobi", InfectionStatus::Unknown, Some("tok-c"))
        .await
        .unwrap();
    env.seed_user("+F", "Mombasa", InfectionStatus::Unknown, Some("tok-f"))
        .await
        .unwrap();

    let presence = Arc::new(PresenceStore::from_config(
        env.durable(),
        env.ephemeral(),
        &env.config.presence,
    ));
    let notifier =
        NotificationService::new(env.durable(), env.ephemeral(), env.gateway(), &env.config)
            .with_retry_policy(RetryPolicy::once());
    let matcher = ContactMatcher::new(
        env.durable(),
        env.ephemeral(),
        presence.clone(),
        notifier.clone(),
        &env.config.trace,
    )
    .with_clock(Arc::new(|| NaiveDate::from_ymd_opt(2020, 4, 10).unwrap()));

    let morning = Utc.with_ymd_and_hms(2020, 4, 8, 9, 3, 0).unwrap();
    presence.record_presence("+P", MARKET, morning).await.unwrap();
    presence
        .record_presence("+C", MARKET, morning + ChronoDuration::minutes(1))
        .await
        .unwrap();
    presence
        .record_presence("+F", Location::new(-4.0435, 39.6682), morning)
        .await
        .unwrap();

    // Not positive yet.
    let since = NaiveDate::from_ymd_opt(2020, 4, 7).unwrap();
    assert!(matcher.start("+P", since).await.is_err());

    env.durable
        .update_infection_status("+P", InfectionStatus::Positive)
        .await
        .unwrap();
    let id = matcher.start("+P", since).await.unwrap();
    let op = wait_for_done(&notifier, &id).await;
    assert_eq!(op.state, OperationState::Done);
    assert_eq!(op.progress, 2);

    // Alerts run on the service's stream; give them a moment to commit.
    let mut inbox = Vec::new();
    for _ in 0..100 {
        inbox = env.durable.list_messages("+C").await.unwrap();
        if !inbox.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message_type, MessageType::Alert);
    assert!(inbox[0].sent);
    assert_eq!(inbox[0].payload.get("count"), Some("1"));
    assert!(env.durable.list_messages("+F").await.unwrap().is_empty());
    assert!(env.durable.list_messages("+P").await.unwrap().is_empty());

    matcher.close().await;
    notifier.close().await;
}

#[tokio::test]
async fn broadcast_then_fanout_reaches_every_device() {
    let env = TestEnv::new().await.unwrap();
    let users = env.seed_population(5, "Kisumu").await.unwrap();

    let notifier =
        NotificationService::new(env.durable(), env.ephemeral(), env.gateway(), &env.config);
    let id = notifier
        .broadcast(BroadcastRequest {
            filters: vec![UserFilter::County("Kisumu".into())],
            title: "Curfew".into(),
            body: "Stay home after 7pm".into(),
            payload: Payload::new().with("kind", "advisory"),
        })
        .await
        .unwrap();
    let op = wait_for_done(&notifier, &id).await;
    assert_eq!(op.state, OperationState::Done);
    for user in &users {
        let inbox = env.durable.list_messages(&user.phone_number).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message_type, MessageType::Broadcast);
    }
    let broadcast_calls = env.gateway.call_count().await;
    assert_eq!(broadcast_calls, 1);

    let worker = PushFanoutWorker::new(
        env.durable(),
        env.ephemeral(),
        env.gateway(),
        &covtrace_config::model::FanoutConfig {
            enabled: true,
            ..Default::default()
        },
    );
    assert_eq!(worker.load_backlog().await.unwrap(), 5);
    let stats = worker.sweep(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.attempted, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(env.gateway.call_count().await, broadcast_calls + 5);

    notifier.close().await;
}

// ---- Binary ----

fn write_config(dir: &Path, endpoint: &str) -> std::path::PathBuf {
    let db = dir.join("covtrace.db");
    let config = format!(
        "[storage]\ndatabase_path = \"{}\"\n\n[push]\nendpoint = \"{endpoint}\"\n\n[prometheus]\nenabled = false\n",
        db.display()
    );
    let path = dir.join("covtrace.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn covtrace(config: &Path, args: &[&str]) -> serde_json::Value {
    let output = Command::new(env!("CARGO_BIN_EXE_covtrace"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "covtrace {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn covtrace_fails(config: &Path, args: &[&str]) -> String {
    let output = Command::new(env!("CARGO_BIN_EXE_covtrace"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap();
    assert!(!output.status.success(), "covtrace {args:?} should fail");
    String::from_utf8_lossy(&output.stderr).into_owned()
}

async fn gateway() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": 1,
            "failure": 0
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn cli_trace_alerts_contact_and_inbox_lists_it() {
    let server = gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &format!("{}/send", server.uri()));
    let config = config.as_path();

    let user = covtrace(
        config,
        &["register", "+254700000001", "--name", "Pat", "--county", "Nairobi", "--token", "tok-p"],
    );
    assert_eq!(user["infectionStatus"], "UNKNOWN");
    covtrace(
        config,
        &["register", "+254700000002", "--county", "Nairobi", "--token", "tok-c"],
    );

    let yesterday = Utc::now().date_naive() - ChronoDuration::days(1);
    let at = format!("{yesterday}T10:00:00Z");
    for phone in ["+254700000001", "+254700000002"] {
        let event = covtrace(
            config,
            &["locate", phone, "--lat", "-1.2833", "--lng", "36.8167", "--at", &at],
        );
        assert_eq!(event["timeBucketId"], "120");
    }

    let since = yesterday.to_string();
    let err = covtrace_fails(config, &["trace", "+254700000001", "--since", &since]);
    assert!(err.contains("failed precondition"), "{err}");

    let patient = covtrace(config, &["set-status", "+254700000001", "positive"]);
    assert_eq!(patient["infectionStatus"], "POSITIVE");

    let op = covtrace(config, &["trace", "+254700000001", "--since", &since]);
    assert_eq!(op["state"], "DONE");
    assert_eq!(op["kind"], "TRACE");

    let inbox = covtrace(config, &["messages", "+254700000002"]);
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["messageType"], "ALERT");
    assert_eq!(inbox[0]["seen"], false);

    let id = inbox[0]["id"].as_str().unwrap().to_string();
    let inbox = covtrace(config, &["messages", "+254700000002", "--mark-seen", &id]);
    assert_eq!(inbox[0]["seen"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial_test::serial]
async fn cli_send_and_broadcast_persist_sent_messages() {
    let server = gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &format!("{}/send", server.uri()));
    let config = config.as_path();

    covtrace(config, &["register", "+1", "--county", "Kent", "--token", "t1"]);
    covtrace(config, &["register", "+2", "--county", "Essex", "--token", "t2"]);

    let message = covtrace(
        config,
        &["send", "+1", "--title", "Hi", "--body", "Test", "--data", "kind=direct"],
    );
    assert_eq!(message["sent"], true);
    assert_eq!(message["payload"]["kind"], "direct");

    let op = covtrace(
        config,
        &["broadcast", "--title", "News", "--body", "b", "--data", "kind=news", "--county", "Essex"],
    );
    assert_eq!(op["state"], "DONE");
    assert_eq!(covtrace(config, &["messages", "+1"]).as_array().unwrap().len(), 1);
    assert_eq!(covtrace(config, &["messages", "+2"]).as_array().unwrap().len(), 1);

    let err = covtrace_fails(config, &["broadcast", "--title", "x", "--body", "y"]);
    assert!(err.contains("invalid argument"), "{err}");
}
