use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use appdb_bus::{ChangeBus, EventKind, Scope, Subscription};
use appdb_schema::{ComputeEngine, Decorated, SchemaRegistry, Validator};
use appdb_store::{StorageBackend, StoreError, StoreResult};
use appdb_types::{merge_fields, AppId, Document, DocumentKey, Fields, ItemKey, KeyRange, Partition};

use crate::error::{DocError, DocResult};

/// Schema-validated, change-notifying document storage.
///
/// Cloning is cheap; clones share the backend, the registry, and the bus.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<dyn SchemaRegistry>,
    validator: Validator,
    compute: ComputeEngine,
    bus: ChangeBus,
    writes: Arc<WriteLocks>,
}

const WRITE_STRIPES: usize = 64;

/// Striped locks over document keys. A writer holds the stripe of its key
/// from the backend commit until the event is published, so events of one
/// key leave in commit order.
struct WriteLocks {
    stripes: Vec<Mutex<()>>,
}

impl WriteLocks {
    fn new() -> Self {
        Self {
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, key: &DocumentKey) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock().await
    }
}

impl DocumentStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<dyn SchemaRegistry>,
        bus: ChangeBus,
    ) -> Self {
        Self {
            validator: Validator::new(Arc::clone(&registry)),
            compute: ComputeEngine::new(Arc::clone(&registry)),
            backend,
            registry,
            bus,
            writes: Arc::new(WriteLocks::new()),
        }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Fetch one document with its computed fields.
    ///
    /// Derivation failures do not fail the read; they are attached to the
    /// returned [`Decorated`].
    pub async fn get(&self, key: &DocumentKey) -> DocResult<Decorated> {
        let document = self.fetch(key).await?;
        debug!(key = %key, "get");
        Ok(self.compute.decorate(document).await)
    }

    /// Like [`get`](Self::get), but any derivation failure is an error.
    pub async fn get_complete(&self, key: &DocumentKey) -> DocResult<Document> {
        self.get(key)
            .await?
            .into_complete()
            .map_err(|failures| DocError::Computation {
                key: key.clone(),
                failures,
            })
    }

    /// Every document of `partition` strictly inside `range`, ascending by
    /// key, each with its computed fields.
    pub async fn list(&self, partition: &Partition, range: &KeyRange) -> DocResult<Vec<Decorated>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let (target, bounds) = (partition.clone(), range.clone());
        let documents = self
            .blocking(move |backend| backend.range(&target, &bounds))
            .await?;
        debug!(partition = %partition, count = documents.len(), "list");
        Ok(self.compute.decorate_all(documents).await)
    }

    /// Replace the document at `key` with `value`, creating it if absent.
    ///
    /// The value is validated before anything is written. On success an
    /// [`EventKind::Upserted`] event is published and the stored document is
    /// returned without computed fields. Events for one key are published
    /// in the order their writes committed.
    pub async fn set(&self, key: &DocumentKey, value: Fields) -> DocResult<Document> {
        let validated = self.validator.validate(&key.app, &key.model, value).await?;

        let target = key.clone();
        let _write = self.writes.lock(key).await;
        let stored = self
            .blocking(move |backend| backend.upsert(&target, &validated))
            .await?;

        let delivered = self.bus.publish(EventKind::Upserted, stored.clone());
        debug!(key = %key, delivered, "set");
        Ok(stored)
    }

    /// Store `value` under a freshly generated key in `partition`.
    pub async fn add(&self, partition: &Partition, value: Fields) -> DocResult<ItemKey> {
        let key = partition.key(ItemKey::generate());
        self.set(&key, value).await?;
        Ok(key.key)
    }

    /// Merge `partial` into the stored value of `key` and write the result.
    ///
    /// Fields in `partial` overwrite stored fields of the same name; others
    /// are kept. The read and the write are separate steps with no lock
    /// between them, so two concurrent updates of one key can lose one
    /// side's fields.
    pub async fn update(&self, key: &DocumentKey, partial: Fields) -> DocResult<Document> {
        let base = self.fetch(key).await?;
        let merged = merge_fields(base.value, partial);
        self.set(key, merged).await
    }

    /// Hard-delete `key` and publish an [`EventKind::Deleted`] tombstone.
    ///
    /// Deleting an absent key succeeds and still publishes the tombstone.
    pub async fn delete(&self, key: &DocumentKey) -> DocResult<()> {
        let target = key.clone();
        let _write = self.writes.lock(key).await;
        let existed = self
            .blocking(move |backend| backend.delete(&target))
            .await?;

        let delivered = self
            .bus
            .publish(EventKind::Deleted, Document::tombstone(key.clone()));
        debug!(key = %key, existed, delivered, "delete");
        Ok(())
    }

    /// Observe every change committed inside `scope` from now on.
    pub fn subscribe(&self, scope: Scope) -> Subscription {
        self.bus.subscribe(scope)
    }

    /// Drop any cached model definitions of `app`; the next access
    /// re-resolves them.
    pub fn invalidate_app(&self, app: &AppId) {
        self.registry.invalidate(app);
        debug!(app = %app, "schema cache invalidated");
    }

    async fn fetch(&self, key: &DocumentKey) -> DocResult<Document> {
        let target = key.clone();
        self.blocking(move |backend| backend.get(&target))
            .await?
            .ok_or_else(|| DocError::NotFound(key.clone()))
    }

    /// Run a backend call on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> DocResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageBackend) -> StoreResult<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || op(backend.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
            .map_err(DocError::from)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    use appdb_bus::{BusConfig, OverflowPolicy, TryRecvError};
    use appdb_schema::{
        AppManifest, CachingRegistry, DerivationSpec, FieldKind, ModelSchema, StaticManifests,
        ValidatedFields,
    };
    use appdb_store::{InMemoryBackend, SqliteBackend};
    use appdb_types::{fields_from_value, Value};
    use serde_json::json;

    use super::*;

    const APP: &str = "https://apps.example/todo.json";

    fn item_model() -> ModelSchema {
        ModelSchema::builder("item".parse().unwrap())
            .required("title", FieldKind::String)
            .optional("x", FieldKind::Integer)
            .optional("y", FieldKind::Integer)
            .optional("tags", FieldKind::Array)
            .computed(
                "tag_count",
                DerivationSpec::Length {
                    field: "tags".into(),
                },
            )
            .build()
            .unwrap()
    }

    fn registry() -> Arc<CachingRegistry<StaticManifests>> {
        let manifest = AppManifest::new(APP.parse().unwrap()).with_model(item_model());
        Arc::new(CachingRegistry::new(StaticManifests::new().with(manifest)))
    }

    fn store_on(backend: Arc<dyn StorageBackend>, bus: BusConfig) -> DocumentStore {
        DocumentStore::new(backend, registry(), ChangeBus::new(bus))
    }

    fn store() -> DocumentStore {
        store_on(Arc::new(InMemoryBackend::new()), BusConfig::default())
    }

    fn partition() -> Partition {
        Partition::parse("w1", APP, "item").unwrap()
    }

    fn key(k: &str) -> DocumentKey {
        partition().key(k.parse().unwrap())
    }

    fn fields(v: Value) -> Fields {
        fields_from_value(v).unwrap()
    }

    fn scope() -> Scope {
        Scope::partition(&partition())
    }

    // -----------------------------------------------------------------------
    // Reads and writes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn set_then_get_overlays_computed_fields() {
        let store = store();
        let stored = store
            .set(&key("k1"), fields(json!({"title": "milk", "tags": ["a", "b"]})))
            .await
            .unwrap();
        assert!(!stored.value.contains_key("tag_count"));

        let read = store.get(&key("k1")).await.unwrap();
        assert!(read.is_complete());
        assert_eq!(read.document.value["title"], json!("milk"));
        assert_eq!(read.document.value["tag_count"], json!(2));
        assert_eq!(read.document.created_at, stored.created_at);
    }

    #[tokio::test]
    async fn set_replaces_whole_value() {
        let store = store();
        store
            .set(&key("k1"), fields(json!({"title": "a", "x": 1})))
            .await
            .unwrap();
        store
            .set(&key("k1"), fields(json!({"title": "b", "y": 2})))
            .await
            .unwrap();

        let read = store.get(&key("k1")).await.unwrap().document;
        assert_eq!(read.value["title"], json!("b"));
        assert_eq!(read.value["y"], json!(2));
        assert!(!read.value.contains_key("x"));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = store();
        store
            .set(&key("k1"), fields(json!({"title": "a", "x": 1})))
            .await
            .unwrap();
        let updated = store
            .update(&key("k1"), fields(json!({"y": 2})))
            .await
            .unwrap();

        assert_eq!(
            Value::Object(updated.value),
            json!({"title": "a", "x": 1, "y": 2})
        );
    }

    #[tokio::test]
    async fn update_of_missing_key_is_not_found() {
        let err = store()
            .update(&key("nope"), fields(json!({"y": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::NotFound(_)));
    }

    #[tokio::test]
    async fn add_generates_distinct_keys() {
        let store = store();
        let a = store
            .add(&partition(), fields(json!({"title": "a"})))
            .await
            .unwrap();
        let b = store
            .add(&partition(), fields(json!({"title": "b"})))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 10);
        let read = store.get(&partition().key(a)).await.unwrap();
        assert_eq!(read.document.value["title"], json!("a"));
    }

    #[tokio::test]
    async fn list_uses_exclusive_bounds() {
        let store = store();
        for k in ["a", "b", "c", "d", "e"] {
            store
                .set(&key(k), fields(json!({"title": k})))
                .await
                .unwrap();
        }

        let listed: Vec<String> = store
            .list(&partition(), &KeyRange::from_bounds("b", "e"))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.document.key.key.to_string())
            .collect();
        assert_eq!(listed, vec!["c", "d"]);

        let all = store.list(&partition(), &KeyRange::all()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(store
            .list(&partition(), &KeyRange::from_bounds("e", "a"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn get_reports_computation_failures() {
        let store = store();
        store
            .set(&key("k1"), fields(json!({"title": "no tags"})))
            .await
            .unwrap();

        let read = store.get(&key("k1")).await.unwrap();
        assert_eq!(read.failures.len(), 1);
        assert_eq!(read.document.value["title"], json!("no tags"));

        let err = store.get_complete(&key("k1")).await.unwrap_err();
        assert!(matches!(err, DocError::Computation { ref failures, .. } if failures.len() == 1));
    }

    // -----------------------------------------------------------------------
    // Delete and notification
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn delete_then_get_is_not_found_and_tombstone_published() {
        let store = store();
        store
            .set(&key("k1"), fields(json!({"title": "a"})))
            .await
            .unwrap();
        let mut sub = store.subscribe(scope());

        store.delete(&key("k1")).await.unwrap();

        let err = store.get(&key("k1")).await.unwrap_err();
        assert!(matches!(err, DocError::NotFound(_)));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Deleted);
        assert_eq!(event.document.key, key("k1"));
        assert!(event.document.is_tombstone());
    }

    #[tokio::test]
    async fn delete_of_absent_key_succeeds_and_notifies() {
        let store = store();
        let mut sub = store.subscribe(scope());

        store.delete(&key("ghost")).await.unwrap();
        store.delete(&key("ghost")).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Deleted);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Deleted);
    }

    #[tokio::test]
    async fn set_publishes_stored_document() {
        let store = store();
        let mut sub = store.subscribe(scope());
        let mut other_wallet = store.subscribe(Scope::app("w2".parse().unwrap(), APP.parse().unwrap()));

        let stored = store
            .set(&key("k1"), fields(json!({"title": "a"})))
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Upserted);
        assert_eq!(event.document, stored);
        assert_eq!(other_wallet.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn validation_rejection_keeps_prior_value() {
        let store = store();
        store
            .set(&key("k1"), fields(json!({"title": "ok", "x": 1})))
            .await
            .unwrap();
        let mut sub = store.subscribe(scope());

        let err = store
            .set(&key("k1"), fields(json!({"title": 5})))
            .await
            .unwrap_err();
        match err {
            DocError::Validation {
                ref model,
                ref value,
                ref reasons,
            } => {
                assert_eq!(model.as_str(), "item");
                assert_eq!(*value, json!({"title": 5}));
                assert!(!reasons.is_empty());
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let read = store.get(&key("k1")).await.unwrap().document;
        assert_eq!(read.value["title"], json!("ok"));
        assert_eq!(sub.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn unknown_app_is_schema_resolution_error() {
        let store = store();
        let foreign = DocumentKey::parse("w1", "https://apps.example/other.json", "item", "k").unwrap();

        let err = store
            .set(&foreign, fields(json!({"title": "a"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::SchemaResolution(_)));

        let err = store.get(&foreign).await.unwrap_err();
        assert!(matches!(err, DocError::NotFound(_)));
    }

    struct FailingBackend;

    impl StorageBackend for FailingBackend {
        fn get(&self, _: &DocumentKey) -> StoreResult<Option<Document>> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        fn upsert(&self, _: &DocumentKey, _: &ValidatedFields) -> StoreResult<Document> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        fn range(&self, _: &Partition, _: &KeyRange) -> StoreResult<Vec<Document>> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        fn delete(&self, _: &DocumentKey) -> StoreResult<bool> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn storage_errors_propagate_and_nothing_is_published() {
        let store = store_on(Arc::new(FailingBackend), BusConfig::default());
        let mut sub = store.subscribe(scope());

        let set = store.set(&key("k1"), fields(json!({"title": "a"}))).await;
        assert!(matches!(set, Err(DocError::Storage(_))));
        let delete = store.delete(&key("k1")).await;
        assert!(matches!(delete, Err(DocError::Storage(_))));
        let list = store.list(&partition(), &KeyRange::all()).await;
        assert!(matches!(list, Err(DocError::Storage(_))));

        assert_eq!(sub.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn slow_subscriber_does_not_delay_writers() {
        for overflow in [OverflowPolicy::DropOldest, OverflowPolicy::DropNewest] {
            let store = store_on(
                Arc::new(InMemoryBackend::new()),
                BusConfig {
                    capacity: 4,
                    overflow,
                },
            );
            let mut idle = store.subscribe(scope());

            let writes = async {
                for i in 0..20 {
                    store
                        .set(&key(&format!("k{i:02}")), fields(json!({"title": "t"})))
                        .await
                        .unwrap();
                }
            };
            tokio::time::timeout(Duration::from_secs(5), writes)
                .await
                .expect("writers must not wait on a subscriber");

            let first = idle.try_recv().unwrap();
            assert_eq!(idle.dropped(), 16);
            match overflow {
                OverflowPolicy::DropOldest => assert_eq!(first.seq, 17),
                OverflowPolicy::DropNewest => assert_eq!(first.seq, 1),
            }
        }
    }

    /// Holds every `get` until two callers are inside it.
    struct RendezvousBackend {
        inner: InMemoryBackend,
        gate: Barrier,
        reads: AtomicUsize,
    }

    impl StorageBackend for RendezvousBackend {
        fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
            let found = self.inner.get(key);
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.gate.wait();
            found
        }

        fn upsert(&self, key: &DocumentKey, value: &ValidatedFields) -> StoreResult<Document> {
            self.inner.upsert(key, value)
        }

        fn range(&self, partition: &Partition, range: &KeyRange) -> StoreResult<Vec<Document>> {
            self.inner.range(partition, range)
        }

        fn delete(&self, key: &DocumentKey) -> StoreResult<bool> {
            self.inner.delete(key)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_updates_can_lose_one_side() {
        let backend = Arc::new(RendezvousBackend {
            inner: InMemoryBackend::new(),
            gate: Barrier::new(2),
            reads: AtomicUsize::new(0),
        });
        let store = store_on(backend.clone(), BusConfig::default());
        store
            .set(&key("k1"), fields(json!({"title": "t", "x": 0, "y": 0})))
            .await
            .unwrap();

        let k1 = key("k1");
        let (a, b) = tokio::join!(
            store.update(&k1, fields(json!({"x": 1}))),
            store.update(&k1, fields(json!({"y": 1}))),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(backend.reads.load(Ordering::SeqCst), 2);

        let value = backend.inner.get(&key("k1")).unwrap().unwrap().value;
        let x_won = value["x"] == json!(1) && value["y"] == json!(0);
        let y_won = value["x"] == json!(0) && value["y"] == json!(1);
        assert!(x_won ^ y_won, "exactly one update survives, got {value:?}");
    }

    /// Stalls after committing a document whose title is `slow_title`.
    struct SlowCommitBackend {
        inner: InMemoryBackend,
        slow_title: &'static str,
    }

    impl StorageBackend for SlowCommitBackend {
        fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
            self.inner.get(key)
        }

        fn upsert(&self, key: &DocumentKey, value: &ValidatedFields) -> StoreResult<Document> {
            let stored = self.inner.upsert(key, value)?;
            if stored.value["title"] == json!(self.slow_title) {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(stored)
        }

        fn range(&self, partition: &Partition, range: &KeyRange) -> StoreResult<Vec<Document>> {
            self.inner.range(partition, range)
        }

        fn delete(&self, key: &DocumentKey) -> StoreResult<bool> {
            self.inner.delete(key)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn events_of_one_key_follow_commit_order() {
        let backend = Arc::new(SlowCommitBackend {
            inner: InMemoryBackend::new(),
            slow_title: "first",
        });
        let store = store_on(backend.clone(), BusConfig::default());
        let mut sub = store.subscribe(scope());

        let slow = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set(&key("k1"), fields(json!({"title": "first"})))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        store
            .set(&key("k1"), fields(json!({"title": "second"})))
            .await
            .unwrap();
        slow.await.unwrap().unwrap();

        let committed = backend.inner.get(&key("k1")).unwrap().unwrap();
        let first = sub.recv().await.unwrap();
        let last = sub.recv().await.unwrap();
        assert_eq!(first.document.value["title"], json!("first"));
        assert_eq!(last.document.value, committed.value);
        assert!(first.seq < last.seq);
    }

    #[tokio::test]
    async fn delete_after_set_publishes_in_order() {
        let store = store();
        let mut sub = store.subscribe(scope());
        store
            .set(&key("k1"), fields(json!({"title": "a"})))
            .await
            .unwrap();
        store.delete(&key("k1")).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Upserted);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Deleted);
    }

    // -----------------------------------------------------------------------
    // Durable backend and cache
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn works_over_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteBackend::open(&dir.path().join("appdb.sqlite")).unwrap());
        let store = store_on(backend, BusConfig::default());

        let k = store
            .add(&partition(), fields(json!({"title": "a", "tags": [1]})))
            .await
            .unwrap();
        store
            .update(&partition().key(k.clone()), fields(json!({"x": 3})))
            .await
            .unwrap();

        let read = store.get(&partition().key(k.clone())).await.unwrap();
        assert_eq!(read.document.value["x"], json!(3));
        assert_eq!(read.document.value["tag_count"], json!(1));

        store.delete(&partition().key(k)).await.unwrap();
        assert!(store.list(&partition(), &KeyRange::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidate_app_refetches_manifest() {
        let registry = registry();
        let store = DocumentStore::new(
            Arc::new(InMemoryBackend::new()),
            registry.clone(),
            ChangeBus::default(),
        );
        store
            .set(&key("k1"), fields(json!({"title": "a"})))
            .await
            .unwrap();
        assert_eq!(registry.cached_apps(), 1);

        store.invalidate_app(&APP.parse().unwrap());
        assert_eq!(registry.cached_apps(), 0);
    }
}
