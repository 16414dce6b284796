use super::{
    split_collection_path, Document, DocumentStore, Query, StoreError, Subscription, Write,
    WriteBatch, WriteOp,
};
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type Documents = BTreeMap<String, Map<String, Value>>;

/// An in-process [`DocumentStore`].
///
/// Commits are applied atomically under a lock; listeners are woken through a
/// watch channel and re-run their query, emitting only when the result changed.
#[derive(Clone)]
pub struct MemoryStore {
    documents: Arc<Mutex<Documents>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            documents: Arc::new(Mutex::new(BTreeMap::new())),
            version: Arc::new(version),
        }
    }

    fn snapshot(&self, query: &Query) -> Vec<Document> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        run_query(&documents, query)
    }

    /// Number of documents currently stored, across all collections.
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_document(path: &str, fields: &Map<String, Value>) -> Document {
    let (_, id) = split_collection_path(path);
    Document {
        id,
        path: path.to_string(),
        fields: fields.clone(),
    }
}

fn run_query(documents: &Documents, query: &Query) -> Vec<Document> {
    let mut docs: Vec<Document> = documents
        .iter()
        .filter(|(path, fields)| query.matches(path, fields))
        .map(|(path, fields)| to_document(path, fields))
        .collect();
    query.arrange(&mut docs);
    docs
}

fn apply_write(target: &mut Map<String, Value>, write: Write, now: &str) {
    for (key, value) in write.data {
        target.insert(key, value);
    }
    for field in write.server_timestamps {
        target.insert(field, Value::String(now.to_string()));
    }
}

fn apply(documents: &mut Documents, op: WriteOp, now: &str) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { path, write } => {
            let mut fields = Map::new();
            apply_write(&mut fields, write, now);
            documents.insert(path, fields);
        }
        WriteOp::Merge { path, write } => {
            let fields = documents.entry(path).or_default();
            apply_write(fields, write, now);
        }
        WriteOp::Update { path, write } => {
            let fields = documents
                .get_mut(&path)
                .ok_or_else(|| StoreError::NotFound(path.clone()))?;
            apply_write(fields, write, now);
        }
        WriteOp::Create { path, write } => {
            if documents.contains_key(&path) {
                return Err(StoreError::AlreadyExists(path));
            }
            let mut fields = Map::new();
            apply_write(&mut fields, write, now);
            documents.insert(path, fields);
        }
        WriteOp::Delete { path } => {
            documents.remove(&path);
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(path).map(|fields| to_document(path, fields)))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        Ok(self.snapshot(query))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        {
            let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
            let mut staged = documents.clone();
            for op in batch.ops().iter().cloned() {
                apply(&mut staged, op, &now)?;
            }
            *documents = staged;
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    async fn listen(&self, query: &Query) -> Result<Subscription, StoreError> {
        let store = self.clone();
        let query = query.clone();
        let receiver = self.version.subscribe();

        let snapshots = stream::unfold(
            (store, query, receiver, None::<Vec<Document>>),
            |(store, query, mut receiver, last)| async move {
                loop {
                    if last.is_some() && receiver.changed().await.is_err() {
                        return None;
                    }
                    let _ = receiver.borrow_and_update();
                    let current = store.snapshot(&query);
                    if last.as_ref() != Some(&current) {
                        let next = Some(current.clone());
                        return Some((Ok(current), (store, query, receiver, next)));
                    }
                }
            },
        );

        Ok(snapshots.boxed())
    }
}
