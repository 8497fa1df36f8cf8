//! Shared fixtures for store tests.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tablecraft_model::{AttributeKind, EntitySchema, IndexDescriptor, KeyTemplate};
use tablecraft_store::{EntityStore, MemoryStore, RetryPolicy, SharedTransport};
use tablecraft_types::{AttributeValue, Item};
use tracing_subscriber::EnvFilter;

pub const TABLE: &str = "app";

/// Routes store logs to the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub org: String,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub status: Option<String>,
}

pub fn profile(id: &str, org: &str, status: Option<&str>) -> Profile {
    Profile {
        id: id.into(),
        org: org.into(),
        name: Some(format!("user {id}")),
        age: Some(30),
        status: status.map(str::to_string),
    }
}

/// Primary key `user#<id>#profile#<id>`; `by_org` is keyed by org and
/// sorted by status, so profiles without a status stay out of it.
pub fn profile_schema() -> Arc<EntitySchema<Profile>> {
    let schema = EntitySchema::builder("profile")
        .attribute("id", AttributeKind::String)
        .attribute("org", AttributeKind::String)
        .attribute("name", AttributeKind::String)
        .attribute("age", AttributeKind::Integer)
        .attribute("status", AttributeKind::String)
        .primary(IndexDescriptor::primary(
            KeyTemplate::new("pk")
                .pair("user", |p: &Profile| p.id.as_str().into())
                .pair("profile", |p: &Profile| p.id.as_str().into()),
        ))
        .secondary(
            IndexDescriptor::secondary(
                "by_org",
                KeyTemplate::new("gsi1_pk").pair("org", |p: &Profile| p.org.as_str().into()),
            )
            .with_sort(KeyTemplate::new("gsi1_sk").pair("status", |p: &Profile| p.status.clone().into())),
        )
        .build()
        .unwrap();
    Arc::new(schema)
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new()
            .with_table(TABLE, "pk", None)
            .with_index(TABLE, "by_org", "gsi1_pk", Some("gsi1_sk")),
    )
}

/// Retries without waiting, so tests don't depend on the clock.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 0,
        max_delay_ms: 0,
        ..RetryPolicy::default()
    }
}

pub fn profiles(store: &Arc<MemoryStore>) -> EntityStore<Profile> {
    let transport: SharedTransport = store.clone();
    EntityStore::new(transport, profile_schema(), TABLE).with_retry(fast_retry())
}

pub fn item(pairs: &[(&str, &str)]) -> Item {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), AttributeValue::from(*v)))
        .collect()
}

pub fn key(pk: &str) -> Item {
    item(&[("pk", pk)])
}
