// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redis store against a live server.
//!
//! Skipped unless `COVTRACE_TEST_REDIS_URL` points at a Redis 6.2+ server.
//! Each test uses a fresh namespace, so runs never see each other's keys.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;

use covtrace_config::model::EphemeralConfig;
use covtrace_core::{EphemeralStore, HealthStatus, PluginAdapter};
use covtrace_ephemeral::RedisEphemeral;

fn test_config() -> Option<EphemeralConfig> {
    let url = std::env::var("COVTRACE_TEST_REDIS_URL").ok()?;
    Some(EphemeralConfig {
        url: Some(url),
        namespace: format!("covtrace-test-{}", uuid::Uuid::new_v4()),
        ..EphemeralConfig::default()
    })
}

macro_rules! redis_or_skip {
    () => {
        match test_config() {
            Some(config) => config,
            None => {
                eprintln!("COVTRACE_TEST_REDIS_URL not set, skipping");
                return;
            }
        }
    };
}

#[tokio::test]
async fn sets_strings_and_lists_behave_like_the_in_process_store() {
    let config = redis_or_skip!();
    let store = RedisEphemeral::connect(&config).await.unwrap();
    assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);

    assert!(store.set_add("a", "x").await.unwrap());
    assert!(!store.set_add("a", "x").await.unwrap());
    store.set_add("b", "y").await.unwrap();
    let union = store.set_union(&["a".into(), "b".into(), "none".into()]).await.unwrap();
    assert_eq!(union, HashSet::from(["x".to_string(), "y".to_string()]));
    assert!(store.set_union(&[]).await.unwrap().is_empty());
    assert!(store.expire("a", Duration::from_secs(60)).await.unwrap());
    assert!(!store.expire("absent", Duration::from_secs(60)).await.unwrap());

    store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    assert_eq!(store.get("missing").await.unwrap(), None);

    store.list_push("src", "1").await.unwrap();
    assert_eq!(store.list_push("src", "2").await.unwrap(), 2);
    assert_eq!(store.list_move("src", "dst").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.list_len("src").await.unwrap(), 1);
    assert_eq!(store.list_len("dst").await.unwrap(), 1);
    assert_eq!(store.list_move("missing", "dst").await.unwrap(), None);
}

#[tokio::test]
async fn compare_and_set_elects_one_writer_across_connections() {
    let config = redis_or_skip!();
    let first = RedisEphemeral::connect(&config).await.unwrap();
    let second = RedisEphemeral::connect(&config).await.unwrap();

    let (a, b) = tokio::join!(
        first.compare_and_set("loader", None, "first"),
        second.compare_and_set("loader", None, "second"),
    );
    assert!(a.unwrap() ^ b.unwrap(), "exactly one connection wins");

    let winner = second.get("loader").await.unwrap().unwrap();
    assert!(!first.compare_and_set("loader", Some("other"), "x").await.unwrap());
    assert!(first.compare_and_set("loader", Some(&winner), "next").await.unwrap());
    assert_eq!(second.get("loader").await.unwrap().as_deref(), Some("next"));
}

#[tokio::test]
async fn publish_reaches_subscribers_on_other_connections() {
    let config = redis_or_skip!();
    let publisher = RedisEphemeral::connect(&config).await.unwrap();
    let listener = RedisEphemeral::connect(&config).await.unwrap();

    let mut sub = listener.subscribe("signals").await.unwrap();
    assert_eq!(publisher.publish("signals", "START").await.unwrap(), 1);
    let got = tokio::time::timeout(Duration::from_secs(5), sub.next()).await.unwrap();
    assert_eq!(got.as_deref(), Some("START"));
}

#[tokio::test]
async fn namespaces_do_not_share_keys() {
    let config = redis_or_skip!();
    let other = EphemeralConfig {
        namespace: format!("{}-other", config.namespace),
        ..config.clone()
    };
    let a = RedisEphemeral::connect(&config).await.unwrap();
    let b = RedisEphemeral::connect(&other).await.unwrap();

    a.set_ex("k", "a", Duration::from_secs(60)).await.unwrap();
    assert_eq!(b.get("k").await.unwrap(), None);
}
