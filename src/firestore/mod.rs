//! Cloud Firestore backend.
//!
//! [`FirestoreStore`] implements [`DocumentStore`] over the Firestore v1 REST
//! API. Server timestamps are sent as `REQUEST_TIME` field transforms, and
//! listeners use the streaming `documents:listen` endpoint.

pub mod convert;
pub mod listen;
pub mod models;
pub mod query;

#[cfg(test)]
mod tests;

use self::convert::{fields_to_json, json_to_fields, quote_field_path};
use self::listen::{listen_request, WatchView, TARGET_ID};
use self::models::{
    CommitRequest, CommitResponse, DocumentMask, FieldTransform, ListenRequest, Precondition,
    QueryTarget, RunQueryRequest, RunQueryResponse, ServerValue, Target, WriteOperation,
};
use crate::core::middleware::AuthMiddleware;
use crate::core::{parse_error_response, ApiFailure};
use crate::store::{
    Document, DocumentStore, Query, StoreError, Subscription, Write, WriteBatch, WriteOp,
};
use futures::{future, StreamExt};
use reqwest::{header, Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tracing::{debug, info};

const FIRESTORE_V1_API: &str = "https://firestore.googleapis.com/v1";

pub(crate) fn store_error(failure: ApiFailure) -> StoreError {
    match failure.status.as_deref() {
        Some("NOT_FOUND") => StoreError::NotFound(failure.message),
        Some("ALREADY_EXISTS") => StoreError::AlreadyExists(failure.message),
        _ if failure.http_status == StatusCode::NOT_FOUND.as_u16() => {
            StoreError::NotFound(failure.message)
        }
        _ => StoreError::ApiError(failure.message),
    }
}

/// Converts a REST document into a store document with a root-relative path.
pub(crate) fn resource_to_document(
    documents_root: &str,
    doc: models::Document,
) -> Result<Document, StoreError> {
    let path = doc
        .name
        .strip_prefix(documents_root)
        .map(|p| p.trim_start_matches('/'))
        .unwrap_or(&doc.name)
        .to_string();
    let id = path.rsplit('/').next().unwrap_or_default().to_string();
    Ok(Document {
        id,
        path,
        fields: fields_to_json(doc.fields)?,
    })
}

/// Client for one Firestore database.
#[derive(Clone)]
pub struct FirestoreStore {
    client: ClientWithMiddleware,
    base_url: String,
    database: String,
}

impl FirestoreStore {
    /// Creates a store for the `(default)` database of `project_id`.
    pub fn new(project_id: &str, middleware: AuthMiddleware) -> Self {
        Self::new_with_url(FIRESTORE_V1_API.to_string(), project_id, middleware)
    }

    /// Creates a store with a custom API base URL (emulators, tests).
    pub fn new_with_url(base_url: String, project_id: &str, middleware: AuthMiddleware) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(middleware)
            .build();

        Self::new_with_client(client, base_url, project_id)
    }

    /// Talks plain HTTP to a local emulator (`FIRESTORE_EMULATOR_HOST`).
    pub fn emulator(host: &str, project_id: &str) -> Self {
        Self::new_with_url(
            format!("http://{}/v1", host),
            project_id,
            AuthMiddleware::anonymous(),
        )
    }

    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        base_url: String,
        project_id: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database: format!("projects/{}/databases/(default)", project_id),
        }
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database)
    }

    fn resource_name(&self, path: &str) -> String {
        format!("{}/{}", self.documents_root(), path.trim_matches('/'))
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    fn query_parent(&self, query: &Query) -> String {
        if query.parent.is_empty() {
            self.documents_root()
        } else {
            self.resource_name(&query.parent)
        }
    }

    fn encode_write(&self, op: WriteOp) -> Result<models::Write, StoreError> {
        let (path, write, mask, exists) = match op {
            WriteOp::Delete { path } => {
                return Ok(models::Write {
                    operation: WriteOperation::Delete(self.resource_name(&path)),
                    update_mask: None,
                    update_transforms: Vec::new(),
                    current_document: None,
                });
            }
            WriteOp::Set { path, write } => (path, write, false, None),
            WriteOp::Merge { path, write } => (path, write, true, None),
            WriteOp::Update { path, write } => (path, write, true, Some(true)),
            WriteOp::Create { path, write } => (path, write, false, Some(false)),
        };

        let Write {
            data,
            server_timestamps,
        } = write;

        let update_mask = mask.then(|| DocumentMask {
            field_paths: data.keys().map(|k| quote_field_path(k)).collect(),
        });
        let update_transforms = server_timestamps
            .iter()
            .map(|field| FieldTransform {
                field_path: quote_field_path(field),
                set_to_server_value: ServerValue::RequestTime,
            })
            .collect();

        Ok(models::Write {
            operation: WriteOperation::Update(models::Document {
                name: self.resource_name(&path),
                fields: json_to_fields(data)?,
                create_time: None,
                update_time: None,
            }),
            update_mask,
            update_transforms,
            current_document: exists.map(|exists| Precondition { exists }),
        })
    }
}

#[async_trait::async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        debug!(path, "get document");
        let response = self.client.get(self.url(&self.resource_name(path))).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(store_error(
                parse_error_response(response, "Get document failed").await,
            ));
        }

        let doc: models::Document = response.json().await?;
        Ok(Some(resource_to_document(&self.documents_root(), doc)?))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}:runQuery", self.url(&self.query_parent(query)));
        debug!(collection = %query.collection_path(), "run query");

        let request = RunQueryRequest {
            structured_query: self::query::structured_query(query)?,
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(store_error(
                parse_error_response(response, "Run query failed").await,
            ));
        }

        let responses: Vec<RunQueryResponse> = response.json().await?;
        let root = self.documents_root();
        responses
            .into_iter()
            .filter_map(|res| res.document)
            .map(|doc| resource_to_document(&root, doc))
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let writes = batch
            .ops()
            .iter()
            .cloned()
            .map(|op| self.encode_write(op))
            .collect::<Result<Vec<_>, _>>()?;
        let count = writes.len();

        let url = format!("{}:commit", self.url(&self.documents_root()));
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&CommitRequest { writes })?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(store_error(
                parse_error_response(response, "Commit failed").await,
            ));
        }

        let result: CommitResponse = response.json().await?;
        debug!(
            writes = count,
            commit_time = result.commit_time.as_deref().unwrap_or_default(),
            "committed batch"
        );
        Ok(())
    }

    async fn listen(&self, query: &Query) -> Result<Subscription, StoreError> {
        let root = self.documents_root();
        let request = ListenRequest {
            database: self.database.clone(),
            add_target: Target {
                query: QueryTarget {
                    parent: self.query_parent(query),
                    structured_query: self::query::structured_query(query)?,
                },
                target_id: TARGET_ID,
            },
        };

        let url = format!("{}:listen", self.url(&root));
        let events = listen_request(&self.client, &url, &request).await?;
        info!(collection = %query.collection_path(), "listening");

        let mut view = WatchView::new(query.clone(), root);
        let snapshots = events.filter_map(move |event| {
            let snapshot = match event {
                Ok(response) => view.apply(response).transpose(),
                Err(e) => Some(Err(e)),
            };
            future::ready(snapshot)
        });

        Ok(snapshots.boxed())
    }
}
