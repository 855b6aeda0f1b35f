//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
pub use tessera::{
    Adapter, AdapterError, AdapterResult, Document, ModelDef, RelationshipOptions, Resource,
    ResourceIdentifier, Schema, Snapshot, Store, StoreConfig,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Install a tracing subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Schemas
// ============================================================================

/// post / comment (sync both ways), post.author async -> person
pub fn blog_schema() -> Schema {
    Schema::builder()
        .model(
            ModelDef::new("post")
                .attr("title")
                .attr_with_default("published", false)
                .has_many("comments", "comment", RelationshipOptions::sync())
                .belongs_to("author", "person", RelationshipOptions::async_()),
        )
        .model(ModelDef::new("comment").attr("body").belongs_to(
            "post",
            "post",
            RelationshipOptions::sync(),
        ))
        .model(
            ModelDef::new("person")
                .attr("name")
                .has_many("posts", "post", RelationshipOptions::async_())
                .has_many("groups", "group", RelationshipOptions::sync()),
        )
        .model(ModelDef::new("group").attr("name").has_many(
            "people",
            "person",
            RelationshipOptions::sync(),
        ))
        .build()
        .expect("blog schema is valid")
}

/// Store over `adapter` with default configuration
pub fn store_with(adapter: &MockAdapter) -> Store {
    store_with_config(adapter, StoreConfig::default())
}

/// Store over `adapter` with `config`
pub fn store_with_config(adapter: &MockAdapter, config: StoreConfig) -> Store {
    init_tracing();
    Store::builder()
        .schema(blog_schema())
        .adapter(adapter.clone())
        .config(config)
        .build()
        .expect("store builds")
}

/// Resource helper: `res("post", "1", &[("title", "A")])`
pub fn res(record_type: &str, id: &str, attrs: &[(&str, &str)]) -> Resource {
    attrs
        .iter()
        .fold(Resource::new(record_type, id), |r, (k, v)| r.attr(*k, *v))
}

/// Identifier helper
pub fn rid(record_type: &str, id: &str) -> ResourceIdentifier {
    ResourceIdentifier::new(record_type, id)
}

// ============================================================================
// MockAdapter - scripted in-memory server
// ============================================================================

/// A request the store made
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FindRecord(String, String),
    FindMany(String, Vec<String>),
    FindAll(String),
    Query(String, Value),
    Create(String),
    Update(String),
    Delete(String),
}

#[derive(Default)]
struct Server {
    /// Records served by finds, keyed by `(type, id)`
    records: BTreeMap<(String, String), Resource>,
    /// Scripted responses for saves, consumed in order
    saves: VecDeque<AdapterResult<Option<Document>>>,
    /// Scripted responses for queries, consumed in order
    queries: VecDeque<AdapterResult<Document>>,
    /// Fail every find with this error
    find_error: Option<AdapterError>,
    calls: Vec<Call>,
}

/// In-memory adapter with a call log
///
/// Finds are answered from the records added with [`serve`](Self::serve).
/// Saves succeed by default (creates get ids `srv-1`, `srv-2`, ...) unless a
/// response was scripted with [`script_save`](Self::script_save). Every
/// request yields once before answering so concurrent callers interleave.
#[derive(Clone, Default)]
pub struct MockAdapter {
    server: Arc<Mutex<Server>>,
    next_id: Arc<AtomicU64>,
    coalescing: bool,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter that answers `find_many` with one response
    pub fn coalescing() -> Self {
        Self {
            coalescing: true,
            ..Self::default()
        }
    }

    /// Make a record available to finds
    pub fn serve(&self, resource: Resource) {
        let key = (resource.record_type.clone(), resource.id.clone());
        self.server.lock().records.insert(key, resource);
    }

    /// Stop serving a record
    pub fn forget(&self, record_type: &str, id: &str) {
        self.server
            .lock()
            .records
            .remove(&(record_type.to_string(), id.to_string()));
    }

    pub fn script_save(&self, response: AdapterResult<Option<Document>>) {
        self.server.lock().saves.push_back(response);
    }

    pub fn script_query(&self, response: AdapterResult<Document>) {
        self.server.lock().queries.push_back(response);
    }

    pub fn fail_finds(&self, error: Option<AdapterError>) {
        self.server.lock().find_error = error;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.server.lock().calls.clone()
    }

    pub fn find_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::FindRecord(..) | Call::FindMany(..)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.server.lock().calls.clear();
    }

    fn record(&self, call: Call) {
        self.server.lock().calls.push(call);
    }

    fn lookup(&self, record_type: &str, id: &str) -> AdapterResult<Resource> {
        let server = self.server.lock();
        if let Some(err) = &server.find_error {
            return Err(err.clone());
        }
        server
            .records
            .get(&(record_type.to_string(), id.to_string()))
            .cloned()
            .ok_or(AdapterError::NotFound)
    }

    fn next_save(&self) -> Option<AdapterResult<Option<Document>>> {
        self.server.lock().saves.pop_front()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn find_record(&self, record_type: &str, id: &str) -> AdapterResult<Document> {
        self.record(Call::FindRecord(record_type.to_string(), id.to_string()));
        tokio::task::yield_now().await;
        self.lookup(record_type, id).map(Document::single)
    }

    async fn find_many(&self, record_type: &str, ids: &[String]) -> AdapterResult<Document> {
        if !self.coalescing {
            let mut found = Vec::new();
            for id in ids {
                if let Ok(doc) = self.find_record(record_type, id).await {
                    found.extend(doc.primary().into_iter().cloned());
                }
            }
            return Ok(Document::many(found));
        }
        self.record(Call::FindMany(record_type.to_string(), ids.to_vec()));
        tokio::task::yield_now().await;
        let found = ids
            .iter()
            .filter_map(|id| self.lookup(record_type, id).ok())
            .collect();
        Ok(Document::many(found))
    }

    async fn find_all(&self, record_type: &str) -> AdapterResult<Document> {
        self.record(Call::FindAll(record_type.to_string()));
        tokio::task::yield_now().await;
        let server = self.server.lock();
        let found = server
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect();
        Ok(Document::many(found))
    }

    async fn query(&self, record_type: &str, query: &Value) -> AdapterResult<Document> {
        self.record(Call::Query(record_type.to_string(), query.clone()));
        tokio::task::yield_now().await;
        self.server
            .lock()
            .queries
            .pop_front()
            .unwrap_or_else(|| Ok(Document::many(Vec::new())))
    }

    async fn create_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        self.record(Call::Create(snapshot.record_type().to_string()));
        tokio::task::yield_now().await;
        if let Some(scripted) = self.next_save() {
            return scripted;
        }
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(Some(Document::single(Resource::new(snapshot.record_type(), id))))
    }

    async fn update_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        let id = snapshot.id().unwrap_or_default().to_string();
        self.record(Call::Update(id));
        tokio::task::yield_now().await;
        self.next_save().unwrap_or(Ok(None))
    }

    async fn delete_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        let id = snapshot.id().unwrap_or_default().to_string();
        self.record(Call::Delete(id));
        tokio::task::yield_now().await;
        self.next_save().unwrap_or(Ok(None))
    }
}
