mod common;

use async_trait::async_trait;
use common::{Profile, TABLE, fast_retry, key, memory_store, profile, profile_schema, profiles};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tablecraft_model::{ItemInput, MergePolicy, QueryOp};
use tablecraft_store::{
    BatchGet, BatchGetOutput, BatchWrite, BatchWriteOutput, DeleteItem, EntityStore, GetItem,
    MemoryStore, Operation, PutItem, Query, QueryOptions, QueryOutput, RetryPolicy,
    SharedTransport, StoreClient, StoreConfig, StoreError, StoreTransport, TransactGet,
    TransactWrite, TransportError, TransportResult, UpdateItem,
};
use tablecraft_types::{AttributeValue, ErrorKind, Expression, Item, Patch};
use tokio::sync::Mutex;

fn s(value: &str) -> AttributeValue {
    AttributeValue::from(value)
}

async fn stored(store: &MemoryStore, pk: &str) -> Option<Item> {
    store
        .items(TABLE)
        .await
        .into_iter()
        .find(|i| i.get("pk").and_then(AttributeValue::as_s) == Some(pk))
}

async fn seed_org(store: &EntityStore<Profile>) {
    for n in 1..=5 {
        let (id, status) = (format!("p{n}"), format!("s{n}"));
        store.save(&profile(&id, "acme", Some(status.as_str()))).await.unwrap();
    }
    store.save(&profile("p6", "acme", None)).await.unwrap();
    store.save(&profile("p7", "globex", Some("s1"))).await.unwrap();
}

fn ids(page: &tablecraft_store::QueryPage<Profile>) -> Vec<String> {
    page.items.iter().map(|h| h.entity.id.clone()).collect()
}

/// Lands a queued write from another client right after the next read.
struct RacingWriter {
    store: Arc<MemoryStore>,
    pending: Mutex<Option<PutItem>>,
}

impl RacingWriter {
    fn new(store: Arc<MemoryStore>, write: Item) -> Self {
        let pending = PutItem {
            table: TABLE.into(),
            item: write,
            condition: None,
        };
        Self {
            store,
            pending: Mutex::new(Some(pending)),
        }
    }
}

#[async_trait]
impl StoreTransport for RacingWriter {
    fn name(&self) -> &'static str {
        "racing"
    }

    async fn get_item(&self, request: GetItem) -> TransportResult<Option<Item>> {
        let read = self.store.get_item(request).await?;
        if let Some(write) = self.pending.lock().await.take() {
            self.store.put_item(write).await?;
        }
        Ok(read)
    }

    async fn put_item(&self, request: PutItem) -> TransportResult<()> {
        self.store.put_item(request).await
    }

    async fn update_item(&self, request: UpdateItem) -> TransportResult<Item> {
        self.store.update_item(request).await
    }

    async fn delete_item(&self, request: DeleteItem) -> TransportResult<Option<Item>> {
        self.store.delete_item(request).await
    }

    async fn query(&self, request: Query) -> TransportResult<QueryOutput> {
        self.store.query(request).await
    }

    async fn batch_get(&self, request: BatchGet) -> TransportResult<BatchGetOutput> {
        self.store.batch_get(request).await
    }

    async fn batch_write(&self, request: BatchWrite) -> TransportResult<BatchWriteOutput> {
        self.store.batch_write(request).await
    }

    async fn transact_write(&self, request: TransactWrite) -> TransportResult<()> {
        self.store.transact_write(request).await
    }

    async fn transact_get(&self, request: TransactGet) -> TransportResult<Vec<Option<Item>>> {
        self.store.transact_get(request).await
    }
}

fn racing(store: &Arc<MemoryStore>, write: Item) -> EntityStore<Profile> {
    let transport: SharedTransport = Arc::new(RacingWriter::new(store.clone(), write));
    EntityStore::new(transport, profile_schema(), TABLE).with_retry(fast_retry())
}

// ── Save and load ───────────────────────────────────────────────

#[tokio::test]
async fn save_writes_entity_and_index_attributes() {
    common::init_tracing();
    let store = memory_store();
    let entities = profiles(&store);

    let item = entities.save(&profile("123", "acme", Some("active"))).await.unwrap();

    assert_eq!(item["pk"], s("user#123#profile#123"));
    assert_eq!(item["gsi1_pk"], s("org#acme"));
    assert_eq!(item["gsi1_sk"], s("status#active"));
    assert_eq!(item["age"], AttributeValue::from(30i64));
    assert_eq!(stored(&store, "user#123#profile#123").await, Some(item));
}

#[tokio::test]
async fn sparse_index_attribute_is_omitted() {
    let store = memory_store();
    let item = profiles(&store).save(&profile("123", "acme", None)).await.unwrap();

    assert!(!item.contains_key("gsi1_sk"));
    assert!(!item.contains_key("status"));
}

#[tokio::test]
async fn get_hydrates_the_entity() {
    let store = memory_store();
    let entities = profiles(&store);
    let original = profile("123", "acme", Some("active"));
    entities.save(&original).await.unwrap();

    let loaded = entities.get(&original).await.unwrap().unwrap();

    assert_eq!(loaded.entity, original);
    assert!(loaded.unmapped.is_empty());
    assert!(entities.get(&profile("404", "acme", None)).await.unwrap().is_none());
}

#[tokio::test]
async fn unmapped_attributes_come_back_separately() {
    let store = memory_store();
    let entities = profiles(&store);
    let mut raw = entities.codec().to_store_item(&profile("123", "acme", None)).unwrap();
    raw.insert("legacy_flag".into(), AttributeValue::from(true));
    entities.put(ItemInput::Raw(raw), None).await.unwrap();

    let loaded = entities.get_by_key(key("user#123#profile#123")).await.unwrap().unwrap();

    assert_eq!(loaded.entity.id, "123");
    assert_eq!(loaded.unmapped.get("legacy_flag"), Some(&AttributeValue::from(true)));
}

#[tokio::test]
async fn save_if_absent_refuses_to_overwrite() {
    let store = memory_store();
    let entities = profiles(&store);
    entities.save_if_absent(&profile("123", "acme", None)).await.unwrap();

    let err = entities
        .save_if_absent(&profile("123", "acme", Some("changed")))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConditionalCheckFailed);
    assert_eq!(err.code(), "CONDITIONAL_CHECK_FAILED");
    let kept = stored(&store, "user#123#profile#123").await.unwrap();
    assert!(!kept.contains_key("status"));
}

#[tokio::test]
async fn missing_partition_value_fails_before_any_call() {
    let store = memory_store();
    let err = profiles(&store).save(&profile("", "acme", None)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingParameter);
    assert_eq!(store.calls(Operation::PutItem).await, 0);
}

#[tokio::test]
async fn delete_returns_the_old_item() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", None);
    entities.save(&p).await.unwrap();

    let old = entities.delete(&p).await.unwrap().unwrap();
    assert_eq!(old["pk"], s("user#123#profile#123"));
    assert!(entities.delete(&p).await.unwrap().is_none());
    assert!(store.items(TABLE).await.is_empty());
}

#[tokio::test]
async fn client_resolves_table_per_entity_type() {
    let store = std::sync::Arc::new(
        MemoryStore::new()
            .with_table("profiles", "pk", None)
            .with_table("fallback", "pk", None),
    );
    let mut config = StoreConfig {
        table: Some("fallback".into()),
        ..StoreConfig::default()
    };
    config.tables.insert("profile".into(), "profiles".into());
    let client = StoreClient::new(store.clone(), config).unwrap();

    let entities = client.entities(profile_schema()).unwrap();
    assert_eq!(entities.table(), "profiles");
    let debug = format!("{entities:?}");
    assert!(debug.contains("table: \"profiles\""), "{debug}");
    assert!(debug.contains("entity_type: \"profile\""), "{debug}");
    entities.save(&profile("1", "acme", None)).await.unwrap();
    assert_eq!(store.items("profiles").await.len(), 1);
    assert!(store.items("fallback").await.is_empty());

    let bare = StoreClient::new(store.clone(), StoreConfig::default()).unwrap();
    let err = bare.entities(profile_schema()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingParameter);
}

// ── Queries ─────────────────────────────────────────────────────

#[tokio::test]
async fn query_pages_through_secondary_index() {
    let store = memory_store();
    let entities = profiles(&store);
    seed_org(&entities).await;
    let source = profile("", "acme", None);
    let options = QueryOptions {
        limit: Some(2),
        ..QueryOptions::default()
    };

    let first = entities
        .query("by_org", &source, QueryOp::PartitionOnly, options.clone())
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["p1", "p2"]);
    let cursor = first.last_evaluated_key.clone().unwrap();
    assert_eq!(cursor["gsi1_sk"], s("status#s2"));

    let second = entities
        .query(
            "by_org",
            &source,
            QueryOp::PartitionOnly,
            QueryOptions {
                exclusive_start_key: Some(cursor),
                ..options.clone()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(&second), vec!["p3", "p4"]);

    let third = entities
        .query(
            "by_org",
            &source,
            QueryOp::PartitionOnly,
            QueryOptions {
                exclusive_start_key: second.last_evaluated_key,
                ..options
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(&third), vec!["p5"]);
    assert!(third.last_evaluated_key.is_none());
}

#[tokio::test]
async fn query_sort_conditions() {
    let store = memory_store();
    let entities = profiles(&store);
    seed_org(&entities).await;
    let source = profile("", "acme", Some("s"));

    let prefixed = entities
        .query("by_org", &source, QueryOp::BeginsWith, QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(prefixed.items.len(), 5);

    let between = entities
        .query(
            "by_org",
            &source,
            QueryOp::Between {
                low: "2".into(),
                high: "4".into(),
            },
            QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(ids(&between), vec!["p2", "p3", "p4"]);

    let backwards = entities
        .query(
            "by_org",
            &source,
            QueryOp::BeginsWith,
            QueryOptions {
                scan_forward: false,
                limit: Some(1),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(&backwards), vec!["p5"]);
}

#[tokio::test]
async fn query_filter_applies_after_key_condition() {
    let store = memory_store();
    let entities = profiles(&store);
    seed_org(&entities).await;
    let mut older = profile("p3", "acme", Some("s3"));
    older.age = Some(41);
    entities.save(&older).await.unwrap();

    let page = entities
        .query(
            "by_org",
            &profile("", "acme", None),
            QueryOp::PartitionOnly,
            QueryOptions {
                filter: Some(Expression::new("#age > :age").name("#age", "age").value(":age", 40i64)),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(ids(&page), vec!["p3"]);
}

#[tokio::test]
async fn query_primary_index_by_entity_key() {
    let store = memory_store();
    let entities = profiles(&store);
    seed_org(&entities).await;

    let page = entities
        .query("primary", &profile("p6", "", None), QueryOp::PartitionOnly, QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&page), vec!["p6"]);
}

#[tokio::test]
async fn projected_reads_hydrate_partial_entities() {
    let store = memory_store();
    let entities = profiles(&store);
    seed_org(&entities).await;

    let loaded = entities
        .get_projected(&profile("p1", "acme", None), &["id", "org", "name"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.entity.name.as_deref(), Some("user p1"));
    assert_eq!(loaded.entity.age, None);
    assert_eq!(loaded.entity.status, None);

    let page = entities
        .query(
            "by_org",
            &profile("", "acme", None),
            QueryOp::PartitionOnly,
            QueryOptions {
                projection: Some(vec!["id".into(), "org".into()]),
                limit: Some(2),
                ..QueryOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["p1", "p2"]);
    assert!(page.items.iter().all(|h| h.entity.name.is_none()));
    assert!(page.last_evaluated_key.is_some());
}

#[tokio::test]
async fn projection_missing_required_fields_fails_to_hydrate() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("1", "acme", None);
    entities.save(&p).await.unwrap();

    let err = entities.get_projected(&p, &["name"]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ModelMapping);
}

#[tokio::test]
async fn query_unknown_index_is_invalid() {
    let store = memory_store();
    let err = profiles(&store)
        .query("nope", &profile("1", "acme", None), QueryOp::PartitionOnly, QueryOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(store.calls(Operation::Query).await, 0);
}

// ── Merge updates ───────────────────────────────────────────────

#[tokio::test]
async fn update_merge_keeps_values_under_null_patch_by_default() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", Some("active"));
    entities.save(&p).await.unwrap();

    let patch = Patch::new().null("name").set("age", 31i64);
    let merged = entities.update_merge(&p, &patch, None).await.unwrap();

    assert_eq!(merged.entity.name.as_deref(), Some("user 123"));
    assert_eq!(merged.entity.age, Some(31));
    let item = stored(&store, "user#123#profile#123").await.unwrap();
    assert_eq!(item["age"], AttributeValue::from(31i64));
}

#[tokio::test]
async fn update_merge_policies() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", Some("active"));
    entities.save(&p).await.unwrap();

    let patch = Patch::new().null("name").set("age", 50i64);

    let existing = entities
        .update_merge(&p, &patch, Some(MergePolicy::ExistingWins))
        .await
        .unwrap();
    assert_eq!(existing.entity, p);

    let updates = entities
        .update_merge(&p, &patch, Some(MergePolicy::UpdatesWin))
        .await
        .unwrap();
    assert_eq!(updates.entity.name, None);
    assert_eq!(updates.entity.age, Some(50));
    let item = stored(&store, "user#123#profile#123").await.unwrap();
    assert!(!item.contains_key("name"));
}

#[tokio::test]
async fn store_default_merge_policy_applies() {
    let store = memory_store();
    let entities = profiles(&store).with_merge_policy(MergePolicy::UpdatesWin);
    let p = profile("123", "acme", None);
    entities.save(&p).await.unwrap();

    let merged = entities
        .update_merge(&p, &Patch::new().null("name"), None)
        .await
        .unwrap();

    assert_eq!(merged.entity.name, None);
}

#[tokio::test]
async fn update_merge_recomputes_index_attributes() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", Some("active"));
    entities.save(&p).await.unwrap();

    entities
        .update_merge(&p, &Patch::new().set("status", "suspended"), None)
        .await
        .unwrap();

    let item = stored(&store, "user#123#profile#123").await.unwrap();
    assert_eq!(item["gsi1_sk"], s("status#suspended"));
}

#[tokio::test]
async fn update_merge_preserves_unmapped_attributes() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", None);
    let mut raw = entities.codec().to_store_item(&p).unwrap();
    raw.insert("legacy_flag".into(), AttributeValue::from(true));
    store.seed(TABLE, raw).await.unwrap();

    entities
        .update_merge(&p, &Patch::new().set("age", 44i64), None)
        .await
        .unwrap();

    let item = stored(&store, "user#123#profile#123").await.unwrap();
    assert_eq!(item["legacy_flag"], AttributeValue::from(true));
    assert_eq!(item["age"], AttributeValue::from(44i64));
}

#[tokio::test]
async fn update_merge_detects_a_concurrent_change() {
    let store = memory_store();
    let p = profile("123", "acme", Some("active"));
    profiles(&store).save(&p).await.unwrap();
    let mut theirs = p.clone();
    theirs.name = Some("concurrent".into());
    let write = profiles(&store).codec().to_store_item(&theirs).unwrap();

    let err = racing(&store, write)
        .update_merge(&p, &Patch::new().set("age", 31i64), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConditionalCheckFailed);
    let kept = stored(&store, "user#123#profile#123").await.unwrap();
    assert_eq!(kept["name"], s("concurrent"));
    assert_eq!(kept["age"], AttributeValue::from(30i64));

    // a fresh read merges over the other writer's change
    let merged = profiles(&store)
        .update_merge(&p, &Patch::new().set("age", 31i64), None)
        .await
        .unwrap();
    assert_eq!(merged.entity.name.as_deref(), Some("concurrent"));
    assert_eq!(merged.entity.age, Some(31));
}

#[tokio::test]
async fn update_merge_detects_a_concurrently_added_attribute() {
    let store = memory_store();
    let p = profile("123", "acme", None);
    profiles(&store).save(&p).await.unwrap();
    let write = profiles(&store)
        .codec()
        .to_store_item(&profile("123", "acme", Some("suspended")))
        .unwrap();

    let err = racing(&store, write)
        .update_merge(&p, &Patch::new().set("age", 31i64), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ConditionalCheckFailed { .. }));
    let kept = stored(&store, "user#123#profile#123").await.unwrap();
    assert_eq!(kept["status"], s("suspended"));
}

#[tokio::test]
async fn update_merge_of_missing_item_is_not_found() {
    let store = memory_store();
    let err = profiles(&store)
        .update_merge(&profile("404", "acme", None), &Patch::new().set("age", 1i64), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.calls(Operation::PutItem).await, 0);
}

#[tokio::test]
async fn update_merge_cannot_move_the_primary_key() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("123", "acme", None);
    entities.save(&p).await.unwrap();

    let err = entities
        .update_merge(&p, &Patch::new().set("id", "456"), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    assert_eq!(store.items(TABLE).await.len(), 1);
}

// ── Retries ─────────────────────────────────────────────────────

#[tokio::test]
async fn throttled_write_succeeds_within_attempts() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::throttling("slow down"), 2)
        .await;

    profiles(&store).save(&profile("1", "acme", None)).await.unwrap();

    assert_eq!(store.calls(Operation::PutItem).await, 3);
    assert_eq!(store.items(TABLE).await.len(), 1);
}

#[tokio::test]
async fn throttling_past_the_last_attempt_is_surfaced() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::throttling("slow down"), 10)
        .await;

    let err = profiles(&store).save(&profile("1", "acme", None)).await.unwrap_err();

    assert!(matches!(err, StoreError::Throttled { attempts: 5, .. }));
    assert_eq!(err.kind(), ErrorKind::Throttling);
    assert!(err.is_transient());
    assert_eq!(store.calls(Operation::PutItem).await, 5);
}

#[tokio::test]
async fn writes_are_not_retried_on_other_errors() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::connection("reset"), 1)
        .await;

    let err = profiles(&store).save(&profile("1", "acme", None)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(store.calls(Operation::PutItem).await, 1);
}

#[tokio::test]
async fn reads_are_retried_on_connection_errors() {
    let store = memory_store();
    let entities = profiles(&store);
    let p = profile("1", "acme", None);
    entities.save(&p).await.unwrap();
    store
        .inject_failure(Operation::GetItem, TransportError::connection("reset"), 2)
        .await;

    assert!(entities.get(&p).await.unwrap().is_some());
    assert_eq!(store.calls(Operation::GetItem).await, 3);
}

#[tokio::test]
async fn no_retry_policy_makes_one_attempt() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::throttling("slow down"), 1)
        .await;
    let entities = profiles(&store).with_retry(RetryPolicy::none());

    let err = entities.save(&profile("1", "acme", None)).await.unwrap_err();

    assert!(matches!(err, StoreError::Throttled { attempts: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn throttle_backoff_doubles_each_attempt() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::throttling("slow down"), 3)
        .await;
    let transport: SharedTransport = store.clone();
    let entities = EntityStore::new(transport, profile_schema(), TABLE);

    let started = tokio::time::Instant::now();
    entities.save(&profile("1", "acme", None)).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(50 + 100 + 200));
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let store = memory_store();
    store
        .inject_failure(Operation::PutItem, TransportError::throttling("slow down"), 4)
        .await;
    let transport: SharedTransport = store.clone();
    let entities = EntityStore::new(transport, profile_schema(), TABLE).with_retry(RetryPolicy {
        max_attempts: 5,
        base_delay_ms: 100,
        multiplier: 3,
        max_delay_ms: 500,
        ..RetryPolicy::default()
    });

    let started = tokio::time::Instant::now();
    entities.save(&profile("1", "acme", None)).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(100 + 300 + 500 + 500));
}
