// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Operation records stored in the in-process ephemeral store.

use std::sync::Arc;
use std::time::Duration;

use covtrace_core::{CovtraceError, OperationKind, OperationState, OperationStore};
use covtrace_ephemeral::MemoryEphemeral;

fn store(ttl: Duration) -> OperationStore {
    OperationStore::new(Arc::new(MemoryEphemeral::new()), ttl)
}

#[tokio::test]
async fn operation_walks_requested_running_done() {
    let ops = store(Duration::from_secs(60));
    let op = ops.create(OperationKind::Trace).await.unwrap();
    assert_eq!(op.state, OperationState::Requested);
    assert!(!op.done);

    ops.mark_running(&op.id).await.unwrap();
    ops.set_progress(&op.id, 42).await.unwrap();
    let running = ops.get(&op.id).await.unwrap();
    assert_eq!(running.state, OperationState::Running);
    assert_eq!(running.progress, 42);

    let done = ops.complete(&op.id).await.unwrap();
    assert_eq!(done.state, OperationState::Done);
    assert!(done.done);
    assert_eq!(done.error_detail, None);
}

#[tokio::test]
async fn failed_operation_records_error_detail() {
    let ops = store(Duration::from_secs(60));
    let op = ops.create(OperationKind::Broadcast).await.unwrap();
    ops.mark_running(&op.id).await.unwrap();
    ops.fail(&op.id, "gateway rejected page 3").await.unwrap();

    let failed = ops.get(&op.id).await.unwrap();
    assert_eq!(failed.kind, OperationKind::Broadcast);
    assert_eq!(failed.state, OperationState::Failed);
    assert!(failed.done);
    assert_eq!(failed.error_detail.as_deref(), Some("gateway rejected page 3"));
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let ops = store(Duration::from_secs(60));
    let err = ops.get("nope").await.unwrap_err();
    assert!(matches!(err, CovtraceError::NotFound { .. }), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn operation_expires_after_ttl() {
    let ops = store(Duration::from_secs(12 * 60 * 60));
    let op = ops.create(OperationKind::Trace).await.unwrap();

    tokio::time::advance(Duration::from_secs(11 * 60 * 60)).await;
    assert!(ops.get(&op.id).await.is_ok());

    tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
    assert!(ops.get(&op.id).await.is_err());
}
