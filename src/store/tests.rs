use super::*;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq)]
struct Room {
    id: String,
    name: String,
}

fn write(value: serde_json::Value) -> Write {
    match value {
        serde_json::Value::Object(data) => Write {
            data,
            server_timestamps: Vec::new(),
        },
        other => panic!("not an object: {}", other),
    }
}

#[test]
fn test_query_collection_path_split() {
    let query = Query::collection("chatRooms/abc/messages");
    assert_eq!(query.parent, "chatRooms/abc");
    assert_eq!(query.collection_id, "messages");
    assert_eq!(query.collection_path(), "chatRooms/abc/messages");

    let root = Query::collection("users");
    assert_eq!(root.parent, "");
    assert_eq!(root.collection_path(), "users");
}

#[test]
fn test_auto_id_shape() {
    let id = auto_id();
    assert_eq!(id.len(), 20);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(id, auto_id());
}

#[test]
fn test_chunked_deletes_respects_limit() {
    let paths = (0..1001).map(|i| format!("c/{}", i));
    let batches = WriteBatch::chunked_deletes(paths);
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].len(), 500);
    assert_eq!(batches[1].len(), 500);
    assert_eq!(batches[2].len(), 1);
    assert_eq!(batches[2].ops()[0].path(), "c/1000");
}

#[tokio::test]
async fn test_document_data_injects_id() {
    let store = MemoryStore::new();
    store.set("chatRooms/r1", write(json!({"name": "general"}))).await.unwrap();

    let doc = store.get("chatRooms/r1").await.unwrap().unwrap();
    let room: Room = doc.data().unwrap();
    assert_eq!(room, Room { id: "r1".into(), name: "general".into() });
    assert!(store.get("chatRooms/missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_query_filters_and_order() {
    let store = MemoryStore::new();
    store.set("chatRooms/a", write(json!({"name": "a", "isPublic": true, "members": ["u1"], "rank": 3}))).await.unwrap();
    store.set("chatRooms/b", write(json!({"name": "b", "isPublic": false, "members": ["u1", "u2"], "rank": 1}))).await.unwrap();
    store.set("chatRooms/c", write(json!({"name": "c", "isPublic": true, "members": ["u2"], "rank": 2}))).await.unwrap();
    store.set("chatRooms/a/messages/m1", write(json!({"isPublic": true}))).await.unwrap();

    let public = store
        .query(&Query::collection("chatRooms").where_eq("isPublic", true).order_by("rank", Direction::Ascending))
        .await
        .unwrap();
    let ids: Vec<_> = public.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a"]);

    let member = store
        .query(&Query::collection("chatRooms").where_array_contains("members", "u1").order_by("rank", Direction::Descending))
        .await
        .unwrap();
    let ids: Vec<_> = member.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let limited = store
        .query(&Query::collection("chatRooms").order_by("rank", Direction::Ascending).limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, "b");
}

#[tokio::test]
async fn test_order_by_skips_documents_without_the_field() {
    let store = MemoryStore::new();
    store.set("chatRooms/a", write(json!({"name": "a", "rank": 2}))).await.unwrap();
    store.set("chatRooms/b", write(json!({"name": "b"}))).await.unwrap();
    store.set("chatRooms/c", write(json!({"name": "c", "rank": null}))).await.unwrap();

    let ordered = store
        .query(&Query::collection("chatRooms").order_by("rank", Direction::Ascending))
        .await
        .unwrap();
    let ids: Vec<_> = ordered.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a"]);

    let all = store.query(&Query::collection("chatRooms")).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_update_requires_existing_document() {
    let store = MemoryStore::new();
    let err = store.update("users/nobody", write(json!({"a": 1}))).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(path) if path == "users/nobody"));
}

#[tokio::test]
async fn test_create_rejects_existing_document() {
    let store = MemoryStore::new();
    store.create("users/u1", write(json!({"a": 1}))).await.unwrap();
    let err = store.create("users/u1", write(json!({"a": 2}))).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_commit_is_atomic() {
    let store = MemoryStore::new();
    let batch = WriteBatch::new()
        .set("users/u1", write(json!({"a": 1})))
        .update("users/missing", write(json!({"a": 2})));

    assert!(store.commit(batch).await.is_err());
    assert!(store.get("users/u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_merge_keeps_other_fields_and_sets_server_timestamp() {
    let store = MemoryStore::new();
    store.set("users/u1", write(json!({"email": "a@b.c"}))).await.unwrap();
    store
        .merge("users/u1", Write::new().field("username", "alice").server_timestamp("updatedAt"))
        .await
        .unwrap();

    let doc = store.get("users/u1").await.unwrap().unwrap();
    assert_eq!(doc.fields["email"], json!("a@b.c"));
    assert_eq!(doc.fields["username"], json!("alice"));
    let stamp = doc.fields["updatedAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
}

#[tokio::test]
async fn test_add_generates_id() {
    let store = MemoryStore::new();
    let id = store.add("chatRooms/r1/messages", write(json!({"text": "hi"}))).await.unwrap();
    let doc = store.get(&format!("chatRooms/r1/messages/{}", id)).await.unwrap().unwrap();
    assert_eq!(doc.fields["text"], json!("hi"));
}

#[tokio::test]
async fn test_listen_emits_initial_and_changed_snapshots() {
    let store = MemoryStore::new();
    store.set("chatRooms/r1/messages/m1", write(json!({"text": "one", "n": 1}))).await.unwrap();

    let query = Query::collection("chatRooms/r1/messages").order_by("n", Direction::Ascending);
    let mut listener = store.listen(&query).await.unwrap();

    let first = listener.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);

    // Writes outside the query do not produce a snapshot.
    store.set("chatRooms/r2/messages/x", write(json!({"n": 0}))).await.unwrap();
    store.set("chatRooms/r1/messages/m2", write(json!({"text": "two", "n": 2}))).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(1), listener.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let texts: Vec<_> = second.iter().map(|d| d.fields["text"].clone()).collect();
    assert_eq!(texts, vec![json!("one"), json!("two")]);
}
