use appdb_schema::ValidatedFields;
use appdb_types::{Document, DocumentKey, KeyRange, Partition};

use crate::error::StoreResult;

/// Persistent document storage keyed by (wallet, app, model, key).
///
/// All implementations must satisfy these invariants:
/// - `upsert` is a single atomic insert-or-replace on the full composite
///   key. Two concurrent upserts on one key never interleave into a mixed
///   record.
/// - `upsert` keeps `created_at` of an existing record and stamps a new
///   `updated_at`.
/// - `range` returns keys strictly inside the bounds, ascending, from a
///   single consistent read.
/// - All I/O errors are propagated, never silently ignored.
pub trait StorageBackend: Send + Sync {
    /// Point lookup. Returns `Ok(None)` if the key is absent.
    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>>;

    /// Insert, or fully replace the value of, the record at `key`.
    /// Returns the record as stored.
    fn upsert(&self, key: &DocumentKey, value: &ValidatedFields) -> StoreResult<Document>;

    /// Every document of `partition` whose key lies inside `range`,
    /// ascending by key.
    fn range(&self, partition: &Partition, range: &KeyRange) -> StoreResult<Vec<Document>>;

    /// Hard-delete the record at `key`. Returns `true` if it existed.
    fn delete(&self, key: &DocumentKey) -> StoreResult<bool>;
}
