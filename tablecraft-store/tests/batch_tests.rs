mod common;

use common::{TABLE, fast_retry, item, key, memory_store};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tablecraft_store::{
    BatchCoordinator, BatchOperation, MemoryStore, Operation, RetryPolicy, SharedTransport,
    StoreClient, StoreConfig, StoreError, TransportError,
};
use tablecraft_types::{ErrorKind, Item};

fn coordinator(store: &std::sync::Arc<MemoryStore>) -> BatchCoordinator {
    let transport: SharedTransport = store.clone();
    BatchCoordinator::new(transport).with_retry(fast_retry())
}

fn row(n: usize) -> Item {
    let pk = format!("row#{n}");
    item(&[("pk", pk.as_str()), ("payload", "x")])
}

fn puts(count: usize) -> Vec<BatchOperation> {
    (1..=count).map(|n| BatchOperation::put(TABLE, row(n))).collect()
}

fn is_row(n: usize) -> impl Fn(&str, &Item) -> bool + Send + Sync + 'static {
    let pk = format!("row#{n}");
    move |_: &str, item: &Item| item.get("pk").and_then(|v| v.as_s()) == Some(pk.as_str())
}

// ── Writes ──────────────────────────────────────────────────────

#[tokio::test]
async fn writes_are_chunked() {
    common::init_tracing();
    let store = memory_store();

    let result = coordinator(&store).execute_batch(puts(60), 25).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.succeeded.len(), 60);
    assert_eq!(result.rounds, 1);
    assert_eq!(result.requests, 3);
    assert_eq!(store.calls(Operation::BatchWrite).await, 3);
    assert_eq!(store.items(TABLE).await.len(), 60);
}

#[tokio::test]
async fn persistently_unprocessed_item_is_reported_failed() {
    let store = memory_store();
    store.leave_writes_unprocessed(is_row(26), None).await;

    let result = coordinator(&store).execute_batch(puts(30), 25).await.unwrap();

    assert_eq!(result.succeeded.len(), 29);
    assert_eq!(result.failed, vec![BatchOperation::put(TABLE, row(26))]);
    assert!(!result.is_complete());
    // first round plus max_rounds resubmissions
    assert_eq!(result.rounds, 6);
    assert_eq!(store.items(TABLE).await.len(), 29);
}

#[tokio::test]
async fn unprocessed_item_recovers_in_later_round() {
    let store = memory_store();
    store.leave_writes_unprocessed(is_row(3), Some(2)).await;

    let result = coordinator(&store).execute_batch(puts(5), 25).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.succeeded.len(), 5);
    assert_eq!(result.rounds, 3);
    assert_eq!(store.calls(Operation::BatchWrite).await, 3);
    assert_eq!(store.items(TABLE).await.len(), 5);
}

#[tokio::test]
async fn no_resubmission_without_rounds() {
    let store = memory_store();
    store.leave_writes_unprocessed(is_row(1), None).await;
    let transport: SharedTransport = store.clone();
    let coordinator = BatchCoordinator::new(transport).with_retry(RetryPolicy::none());

    let result = coordinator.execute_batch(puts(3), 25).await.unwrap();

    assert_eq!(result.rounds, 1);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.succeeded.len(), 2);
}

#[tokio::test]
async fn deletes_go_through_batch_write() {
    let store = memory_store();
    store.seed(TABLE, row(1)).await.unwrap();
    store.seed(TABLE, row(2)).await.unwrap();

    let ops = vec![
        BatchOperation::delete(TABLE, key("row#1")),
        BatchOperation::put(TABLE, row(3)),
    ];
    let result = coordinator(&store).execute_batch(ops, 25).await.unwrap();

    assert!(result.is_complete());
    let keys: Vec<_> = store
        .items(TABLE)
        .await
        .into_iter()
        .map(|i| i["pk"].as_s().unwrap().to_string())
        .collect();
    assert_eq!(keys, vec!["row#2", "row#3"]);
}

#[tokio::test(start_paused = true)]
async fn rounds_back_off_exponentially() {
    let store = memory_store();
    store.leave_writes_unprocessed(is_row(1), Some(3)).await;
    let transport: SharedTransport = store.clone();
    let coordinator = BatchCoordinator::new(transport);

    let started = tokio::time::Instant::now();
    let result = coordinator.execute_batch(puts(2), 25).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.rounds, 4);
    // 50 + 100 + 200 ms between the four rounds
    assert_eq!(started.elapsed(), Duration::from_millis(350));
}

// ── Throttling and aborts ───────────────────────────────────────

#[tokio::test]
async fn throttled_request_is_retried() {
    let store = memory_store();
    store
        .inject_failure(Operation::BatchWrite, TransportError::throttling("slow down"), 2)
        .await;

    let result = coordinator(&store).execute_batch(puts(3), 25).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.requests, 1);
    assert_eq!(store.calls(Operation::BatchWrite).await, 3);
}

#[tokio::test]
async fn failed_first_chunk_aborts() {
    let store = memory_store();
    store
        .inject_failure(Operation::BatchWrite, TransportError::validation("bad item"), 1)
        .await;

    let err = coordinator(&store).execute_batch(puts(30), 25).await.unwrap_err();

    match &err {
        StoreError::BatchAborted {
            round,
            chunk_index,
            succeeded,
            ..
        } => {
            assert_eq!((*round, *chunk_index, *succeeded), (0, 0, 0));
        }
        other => panic!("expected BatchAborted, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.calls(Operation::BatchWrite).await, 1);
    assert!(store.items(TABLE).await.is_empty());
}

#[tokio::test]
async fn abort_after_first_chunk_keeps_applied_writes() {
    let store = memory_store();

    // a duplicate key inside the second chunk is rejected by the store
    let mut ops = puts(25);
    ops.push(BatchOperation::put(TABLE, row(26)));
    ops.push(BatchOperation::put(TABLE, row(26)));

    let err = coordinator(&store).execute_batch(ops, 25).await.unwrap_err();

    let StoreError::BatchAborted {
        round,
        chunk_index,
        succeeded,
        source,
    } = err
    else {
        panic!("expected BatchAborted");
    };
    assert_eq!((round, chunk_index, succeeded), (0, 1, 25));
    assert_eq!(source.kind(), ErrorKind::Validation);
    assert_eq!(store.items(TABLE).await.len(), 25);
}

#[tokio::test]
async fn exhausted_throttling_aborts_as_throttling() {
    let store = memory_store();
    store
        .inject_failure(Operation::BatchWrite, TransportError::throttling("slow down"), 10)
        .await;

    let err = coordinator(&store).execute_batch(puts(3), 25).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Throttling);
    assert_eq!(store.calls(Operation::BatchWrite).await, 5);
}

// ── Gets ────────────────────────────────────────────────────────

#[tokio::test]
async fn gets_return_existing_items() {
    let store = memory_store();
    for n in 1..=3 {
        store.seed(TABLE, row(n)).await.unwrap();
    }
    let ops = (1..=4)
        .map(|n| BatchOperation::get(TABLE, key(&format!("row#{n}"))))
        .collect();

    let result = coordinator(&store).execute_batch(ops, 2).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.succeeded.len(), 4);
    assert_eq!(result.items.len(), 3);
    assert_eq!(result.requests, 2);
}

#[tokio::test]
async fn unprocessed_keys_are_resubmitted() {
    let store = memory_store();
    store.seed(TABLE, row(1)).await.unwrap();
    store.leave_gets_unprocessed(is_row(1), Some(1)).await;

    let ops = vec![BatchOperation::get(TABLE, key("row#1"))];
    let result = coordinator(&store).execute_batch(ops, 100).await.unwrap();

    assert_eq!(result.rounds, 2);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].item, row(1));
}

#[tokio::test]
async fn gets_run_before_writes() {
    let store = memory_store();
    store.seed(TABLE, row(1)).await.unwrap();
    let ops = vec![
        BatchOperation::delete(TABLE, key("row#1")),
        BatchOperation::get(TABLE, key("row#1")),
    ];

    let result = coordinator(&store).execute_batch(ops, 25).await.unwrap();

    assert_eq!(result.items.len(), 1);
    assert!(store.items(TABLE).await.is_empty());
}

// ── Validation ──────────────────────────────────────────────────

#[tokio::test]
async fn chunk_size_limits() {
    let store = memory_store();
    let batch = coordinator(&store);

    for (ops, size) in [(puts(3), 0), (puts(3), 26)] {
        let err = batch.execute_batch(ops, size).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    let gets: Vec<_> = (1..=3)
        .map(|n| BatchOperation::get(TABLE, key(&format!("row#{n}"))))
        .collect();
    assert!(batch.execute_batch(gets.clone(), 100).await.is_ok());
    let err = batch.execute_batch(gets, 101).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(store.calls(Operation::BatchWrite).await, 0);
}

#[tokio::test]
async fn client_uses_configured_chunk_sizes() {
    let store = memory_store();
    let config = StoreConfig {
        batch_write_chunk_size: 10,
        batch_get_chunk_size: 5,
        retry: fast_retry(),
        ..StoreConfig::default()
    };
    let client = StoreClient::new(store.clone(), config).unwrap();

    let written = client.execute_batch(puts(30)).await.unwrap();
    assert_eq!(written.requests, 3);

    let gets = (1..=30)
        .map(|n| BatchOperation::get(TABLE, key(&format!("row#{n}"))))
        .collect();
    let read = client.execute_batch(gets).await.unwrap();
    assert_eq!(read.requests, 6);
    assert_eq!(read.items.len(), 30);
}
