use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use appdb_schema::ValidatedFields;
use appdb_types::{Document, DocumentKey, Fields, ItemKey, KeyRange, Partition};

use crate::error::{StoreError, StoreResult};
use crate::traits::StorageBackend;

#[derive(Clone, Debug)]
struct Record {
    value: Fields,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Record {
    fn to_document(&self, key: DocumentKey) -> Document {
        Document {
            key,
            value: self.value.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

type Partitions = BTreeMap<Partition, BTreeMap<ItemKey, Record>>;

/// In-memory, `BTreeMap`-based backend.
///
/// Intended for tests and embedding. Records live behind one `RwLock`, so
/// every upsert is atomic with respect to every other operation. Data is
/// lost when the backend is dropped.
pub struct InMemoryBackend {
    partitions: RwLock<Partitions>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Total number of records across all partitions.
    pub fn len(&self) -> usize {
        self.read()
            .map(|p| p.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Partitions>> {
        self.partitions
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Partitions>> {
        self.partitions
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
        let partitions = self.read()?;
        Ok(partitions
            .get(&key.partition())
            .and_then(|items| items.get(&key.key))
            .map(|record| record.to_document(key.clone())))
    }

    fn upsert(&self, key: &DocumentKey, value: &ValidatedFields) -> StoreResult<Document> {
        let now = Utc::now();
        let mut partitions = self.write()?;
        let items = partitions.entry(key.partition()).or_default();

        let record = items
            .entry(key.key.clone())
            .and_modify(|r| {
                r.value = value.as_fields().clone();
                r.updated_at = now;
            })
            .or_insert_with(|| Record {
                value: value.as_fields().clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(record.to_document(key.clone()))
    }

    fn range(&self, partition: &Partition, range: &KeyRange) -> StoreResult<Vec<Document>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let partitions = self.read()?;
        let Some(items) = partitions.get(partition) else {
            return Ok(Vec::new());
        };

        let lower = range.start.as_ref().map_or(Bound::Unbounded, Bound::Excluded);
        let upper = range.end.as_ref().map_or(Bound::Unbounded, Bound::Excluded);

        Ok(items
            .range::<ItemKey, _>((lower, upper))
            .map(|(k, record)| record.to_document(partition.key(k.clone())))
            .collect())
    }

    fn delete(&self, key: &DocumentKey) -> StoreResult<bool> {
        let mut partitions = self.write()?;
        let partition = key.partition();
        let Some(items) = partitions.get_mut(&partition) else {
            return Ok(false);
        };
        let existed = items.remove(&key.key).is_some();
        if items.is_empty() {
            partitions.remove(&partition);
        }
        Ok(existed)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("record_count", &self.len())
            .finish()
    }
}
