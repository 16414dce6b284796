//! Document store abstraction.
//!
//! Collections and documents are addressed by slash-separated paths relative
//! to the database root (`chatRooms/abc/messages/xyz`). Reads return
//! [`Document`]s whose fields are plain JSON; writes go through atomic
//! [`WriteBatch`]es. [`DocumentStore::listen`] yields the complete ordered
//! result set of a query every time it changes.

pub mod memory;
pub mod order;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;

use futures::stream::BoxStream;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Firestore's hard limit on writes in one commit.
pub const MAX_BATCH_WRITES: usize = 500;

const AUTO_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const AUTO_ID_LEN: usize = 20;

/// Errors that can occur during document store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the backing service.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// An update targeted a document that does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// A create targeted a document that already exists.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),
    /// A listener stopped delivering snapshots.
    #[error("Listen failed: {0}")]
    ListenError(String),
}

/// A document read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Path relative to the database root.
    pub path: String,
    pub fields: Map<String, Value>,
}

impl Document {
    /// Deserializes the fields, with the document id available as `id`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Looks up a field by dotted path (`participants.uid1.email`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_field(&self.fields, path)
    }
}

pub(crate) fn lookup_field<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Splits `a/b/c` into (`a/b`, `c`). Root collections have an empty parent.
pub(crate) fn split_collection_path(path: &str) -> (String, String) {
    let path = path.trim_matches('/');
    match path.rsplit_once('/') {
        Some((parent, id)) => (parent.to_string(), id.to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Generates a 20 character alphanumeric document id.
pub fn auto_id() -> String {
    let mut rng = rand::thread_rng();
    (0..AUTO_ID_LEN)
        .map(|_| AUTO_ID_ALPHABET[rng.gen_range(0..AUTO_ID_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    ArrayContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// A query over the documents of one collection. Filters are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) parent: String,
    pub(crate) collection_id: String,
    pub(crate) filters: Vec<Filter>,
    pub(crate) order_by: Vec<Order>,
    pub(crate) limit: Option<u32>,
}

impl Query {
    /// Targets the collection at `path` (e.g. `chatRooms/abc/messages`).
    pub fn collection(path: &str) -> Self {
        let (parent, collection_id) = split_collection_path(path);
        Self {
            parent,
            collection_id,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::Equal,
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::ArrayContains,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Path of the targeted collection.
    pub fn collection_path(&self) -> String {
        if self.parent.is_empty() {
            self.collection_id.clone()
        } else {
            format!("{}/{}", self.parent, self.collection_id)
        }
    }

    /// Whether a document at `path` with `fields` belongs to this query's result set.
    ///
    /// Documents missing an `order_by` field are excluded, as Firestore does.
    pub(crate) fn matches(&self, path: &str, fields: &Map<String, Value>) -> bool {
        let (collection, _) = split_collection_path(path);
        if collection != self.collection_path() {
            return false;
        }
        if self
            .order_by
            .iter()
            .any(|order| lookup_field(fields, &order.field).is_none())
        {
            return false;
        }
        self.filters.iter().all(|filter| {
            let Some(actual) = lookup_field(fields, &filter.field) else {
                return false;
            };
            match filter.op {
                FilterOp::Equal => order::values_equal(actual, &filter.value),
                FilterOp::ArrayContains => actual
                    .as_array()
                    .map(|items| items.iter().any(|v| order::values_equal(v, &filter.value)))
                    .unwrap_or(false),
            }
        })
    }

    /// Orders `docs` the way the store returns them and applies the limit.
    pub(crate) fn arrange(&self, docs: &mut Vec<Document>) {
        docs.sort_by(|a, b| {
            for order in &self.order_by {
                let ordering = order::compare_optional(a.field(&order.field), b.field(&order.field));
                let ordering = match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            a.path.cmp(&b.path)
        });
        if let Some(limit) = self.limit {
            docs.truncate(limit as usize);
        }
    }
}

/// Data for one document write.
///
/// Fields named in `server_timestamps` are set by the store at commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Write {
    pub data: Map<String, Value>,
    pub server_timestamps: Vec<String>,
}

impl Write {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.data.insert(name.to_string(), value.into());
        self
    }

    pub fn server_timestamp(mut self, name: &str) -> Self {
        self.server_timestamps.push(name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replaces the whole document, creating it when missing.
    Set { path: String, write: Write },
    /// Writes only the given fields, creating the document when missing.
    Merge { path: String, write: Write },
    /// Writes only the given fields of an existing document.
    Update { path: String, write: Write },
    /// Creates a document that must not exist yet.
    Create { path: String, write: Write },
    Delete { path: String },
}

impl WriteOp {
    pub fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Merge { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Create { path, .. }
            | WriteOp::Delete { path } => path,
        }
    }
}

/// A set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, write: Write) -> Self {
        self.ops.push(WriteOp::Set {
            path: path.to_string(),
            write,
        });
        self
    }

    pub fn merge(mut self, path: &str, write: Write) -> Self {
        self.ops.push(WriteOp::Merge {
            path: path.to_string(),
            write,
        });
        self
    }

    pub fn update(mut self, path: &str, write: Write) -> Self {
        self.ops.push(WriteOp::Update {
            path: path.to_string(),
            write,
        });
        self
    }

    pub fn create(mut self, path: &str, write: Write) -> Self {
        self.ops.push(WriteOp::Create {
            path: path.to_string(),
            write,
        });
        self
    }

    pub fn delete(mut self, path: &str) -> Self {
        self.ops.push(WriteOp::Delete {
            path: path.to_string(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Deletes `paths` in batches no larger than [`MAX_BATCH_WRITES`], in order.
    pub fn chunked_deletes<I>(paths: I) -> Vec<WriteBatch>
    where
        I: IntoIterator<Item = String>,
    {
        let mut batches = Vec::new();
        let mut current = WriteBatch::new();
        for path in paths {
            if current.len() == MAX_BATCH_WRITES {
                batches.push(std::mem::take(&mut current));
            }
            current = current.delete(&path);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

/// Ordered snapshots of a query's results, one per change.
///
/// Dropping the stream stops the listener.
pub type Subscription = BoxStream<'static, Result<Vec<Document>, StoreError>>;

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document; `Ok(None)` when it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Applies every write of `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn listen(&self, query: &Query) -> Result<Subscription, StoreError>;

    async fn set(&self, path: &str, write: Write) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().set(path, write)).await
    }

    async fn merge(&self, path: &str, write: Write) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().merge(path, write)).await
    }

    async fn update(&self, path: &str, write: Write) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().update(path, write)).await
    }

    async fn create(&self, path: &str, write: Write) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().create(path, write)).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().delete(path)).await
    }

    /// Creates a document with a generated id in `collection` and returns the id.
    async fn add(&self, collection: &str, write: Write) -> Result<String, StoreError> {
        let id = auto_id();
        self.create(&format!("{}/{}", collection, id), write).await?;
        Ok(id)
    }
}
