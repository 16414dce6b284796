use crate::store::{Document, Subscription};
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{error, warn};

/// Live, typed snapshots of a query. Ends when the listener fails.
pub type Feed<T> = BoxStream<'static, Vec<T>>;

pub(crate) fn decode<T: DeserializeOwned>(docs: &[Document], kind: &str) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.data::<T>() {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(path = %doc.path, error = %e, "skipping malformed {}", kind);
                None
            }
        })
        .collect()
}

pub(crate) fn typed<T>(subscription: Subscription, kind: &'static str) -> Feed<T>
where
    T: DeserializeOwned + Send + 'static,
{
    subscription
        .scan((), move |_, snapshot| {
            future::ready(match snapshot {
                Ok(docs) => Some(decode(&docs, kind)),
                Err(e) => {
                    error!(error = %e, "{} listener failed", kind);
                    None
                }
            })
        })
        .boxed()
}
