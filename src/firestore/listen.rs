use super::models::{ListenRequest, ListenResponse, TargetChangeType};
use super::{resource_to_document, store_error};
use crate::core::parse_error_response;
use crate::store::{Document, Query, StoreError};
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream};
use reqwest_middleware::ClientWithMiddleware;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

pub(crate) const TARGET_ID: i32 = 1;

/// A stream of `ListenResponse` messages decoded from the streamed JSON array
/// returned by `documents:listen`.
pub struct ListenStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: BytesMut,
}

impl ListenStream {
    pub fn new(inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }
}

impl Stream for ListenStream {
    type Item = Result<ListenResponse, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let skip = skip_separators(&self.buffer);
            self.buffer.advance(skip);

            if let Some(len) = find_object_boundary(&self.buffer) {
                let bytes = self.buffer.split_to(len);
                return Poll::Ready(Some(
                    serde_json::from_slice::<ListenResponse>(&bytes).map_err(StoreError::from),
                ));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(StoreError::RequestError(e))));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        return Poll::Ready(Some(Err(StoreError::ListenError(
                            "Stream ended with incomplete JSON".into(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Length of the array punctuation and whitespace preceding the next element.
fn skip_separators(buf: &[u8]) -> usize {
    buf.iter()
        .take_while(|b| b.is_ascii_whitespace() || matches!(b, b'[' | b']' | b','))
        .count()
}

/// Finds the length of the JSON object at the start of the buffer.
fn find_object_boundary(buf: &[u8]) -> Option<usize> {
    if buf.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Local copy of a listen target's result set.
///
/// Snapshots are emitted once the target is `CURRENT`, and afterwards at every
/// global `NO_CHANGE` that follows document changes.
pub(crate) struct WatchView {
    query: Query,
    documents_root: String,
    documents: BTreeMap<String, Document>,
    current: bool,
    dirty: bool,
}

impl WatchView {
    pub(crate) fn new(query: Query, documents_root: String) -> Self {
        Self {
            query,
            documents_root,
            documents: BTreeMap::new(),
            current: false,
            dirty: false,
        }
    }

    fn targets_us(ids: &[i32]) -> bool {
        ids.is_empty() || ids.contains(&TARGET_ID)
    }

    pub(crate) fn apply(
        &mut self,
        response: ListenResponse,
    ) -> Result<Option<Vec<Document>>, StoreError> {
        if let Some(change) = response.document_change {
            let name = change.document.name.clone();
            if change.target_ids.contains(&TARGET_ID) {
                let document = resource_to_document(&self.documents_root, change.document)?;
                self.documents.insert(name, document);
                self.dirty = true;
            } else if change.removed_target_ids.contains(&TARGET_ID) {
                self.documents.remove(&name);
                self.dirty = true;
            }
        }

        if let Some(delete) = response.document_delete {
            self.documents.remove(&delete.document);
            self.dirty = true;
        }

        if let Some(remove) = response.document_remove {
            self.documents.remove(&remove.document);
            self.dirty = true;
        }

        if let Some(change) = response.target_change {
            match change.target_change_type {
                TargetChangeType::Remove if Self::targets_us(&change.target_ids) => {
                    let message = change
                        .cause
                        .and_then(|c| c.message)
                        .unwrap_or_else(|| "target removed by server".to_string());
                    return Err(StoreError::ListenError(message));
                }
                TargetChangeType::Reset if Self::targets_us(&change.target_ids) => {
                    debug!("listen target reset");
                    self.documents.clear();
                    self.current = false;
                }
                TargetChangeType::Current if Self::targets_us(&change.target_ids) => {
                    self.current = true;
                    return Ok(Some(self.emit()));
                }
                TargetChangeType::NoChange
                    if change.target_ids.is_empty() && self.current && self.dirty =>
                {
                    return Ok(Some(self.emit()));
                }
                _ => {}
            }
        }

        Ok(None)
    }

    fn emit(&mut self) -> Vec<Document> {
        self.dirty = false;
        let mut docs: Vec<Document> = self
            .documents
            .values()
            .filter(|doc| self.query.matches(&doc.path, &doc.fields))
            .cloned()
            .collect();
        self.query.arrange(&mut docs);
        docs
    }
}

pub async fn listen_request(
    client: &ClientWithMiddleware,
    url: &str,
    request: &ListenRequest,
) -> Result<ListenStream, StoreError> {
    let response = client.post(url).json(request).send().await?;

    if !response.status().is_success() {
        return Err(store_error(parse_error_response(response, "Listen failed").await));
    }

    let stream = stream::unfold(response, |mut resp| async move {
        match resp.chunk().await {
            Ok(Some(bytes)) => Some((Ok(bytes), resp)),
            Ok(None) => None,
            Err(e) => {
                warn!("listen stream interrupted: {}", e);
                Some((Err(e), resp))
            }
        }
    });

    Ok(ListenStream::new(Box::pin(stream)))
}
