use super::FirestoreStore;
use crate::store::{Direction, DocumentStore, Query, StoreError, Write, WriteBatch};
use futures::StreamExt;
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde::Deserialize;
use serde_json::json;

const ROOT: &str = "/v1/projects/p/databases/(default)/documents";

fn store(server: &MockServer) -> FirestoreStore {
    let client = ClientBuilder::new(Client::new()).build();
    FirestoreStore::new_with_client(client, server.url("/v1"), "p")
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Room {
    id: String,
    name: String,
    member_count: i64,
}

#[tokio::test]
async fn test_get_document() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path(format!("{}/chatRooms/r1", ROOT));
        then.status(200).json_body(json!({
            "name": "projects/p/databases/(default)/documents/chatRooms/r1",
            "fields": {
                "name": { "stringValue": "general" },
                "memberCount": { "integerValue": "2" }
            },
            "createTime": "2024-01-01T00:00:00Z",
            "updateTime": "2024-01-01T00:00:00Z"
        }));
    });

    let doc = store(&server).get("chatRooms/r1").await.unwrap().unwrap();
    assert_eq!(doc.path, "chatRooms/r1");
    let room: Room = doc.data().unwrap();
    assert_eq!(
        room,
        Room {
            id: "r1".into(),
            name: "general".into(),
            member_count: 2
        }
    );
    mock.assert();
}

#[tokio::test]
async fn test_get_missing_document() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(format!("{}/chatRooms/nope", ROOT));
        then.status(404).json_body(json!({
            "error": { "code": 404, "message": "Document not found", "status": "NOT_FOUND" }
        }));
    });

    assert!(store(&server).get("chatRooms/nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_query_on_subcollection() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/chatRooms/r1:runQuery", ROOT))
            .json_body(json!({
                "structuredQuery": {
                    "from": [{ "collectionId": "messages" }],
                    "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "ASCENDING" }]
                }
            }));
        then.status(200).json_body(json!([
            {
                "document": {
                    "name": "projects/p/databases/(default)/documents/chatRooms/r1/messages/m1",
                    "fields": { "text": { "stringValue": "hello" } }
                },
                "readTime": "2024-01-01T00:00:00Z"
            },
            { "readTime": "2024-01-01T00:00:00Z" }
        ]));
    });

    let query = Query::collection("chatRooms/r1/messages").order_by("timestamp", Direction::Ascending);
    let docs = store(&server).query(&query).await.unwrap();

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "m1");
    assert_eq!(docs[0].fields["text"], json!("hello"));
    mock.assert();
}

#[tokio::test]
async fn test_root_query_targets_documents_root() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:runQuery", ROOT))
            .body_includes("\"collectionId\":\"users\"");
        then.status(200).json_body(json!([]));
    });

    let docs = store(&server).query(&Query::collection("users")).await.unwrap();
    assert!(docs.is_empty());
    mock.assert();
}

#[tokio::test]
async fn test_commit_encodes_masks_transforms_and_preconditions() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:commit", ROOT))
            .json_body(json!({
                "writes": [
                    {
                        "update": {
                            "name": "projects/p/databases/(default)/documents/chatRooms/r1",
                            "fields": { "lastMessage": { "stringValue": "hi" } }
                        },
                        "updateMask": { "fieldPaths": ["lastMessage"] },
                        "updateTransforms": [
                            { "fieldPath": "lastMessageTimestamp", "setToServerValue": "REQUEST_TIME" }
                        ],
                        "currentDocument": { "exists": true }
                    },
                    {
                        "update": {
                            "name": "projects/p/databases/(default)/documents/chatRooms/r1/messages/m1",
                            "fields": { "text": { "stringValue": "hi" } }
                        },
                        "updateTransforms": [
                            { "fieldPath": "timestamp", "setToServerValue": "REQUEST_TIME" }
                        ],
                        "currentDocument": { "exists": false }
                    },
                    { "delete": "projects/p/databases/(default)/documents/chatRooms/r2" }
                ]
            }));
        then.status(200).json_body(json!({
            "writeResults": [{ "updateTime": "2024-01-01T00:00:01Z" }],
            "commitTime": "2024-01-01T00:00:01Z"
        }));
    });

    let batch = WriteBatch::new()
        .update(
            "chatRooms/r1",
            Write::new()
                .field("lastMessage", "hi")
                .server_timestamp("lastMessageTimestamp"),
        )
        .create(
            "chatRooms/r1/messages/m1",
            Write::new().field("text", "hi").server_timestamp("timestamp"),
        )
        .delete("chatRooms/r2");

    store(&server).commit(batch).await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_update_of_missing_document_maps_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(format!("{}:commit", ROOT));
        then.status(404).json_body(json!({
            "error": {
                "code": 404,
                "message": "No document to update: projects/p/databases/(default)/documents/users/x",
                "status": "NOT_FOUND"
            }
        }));
    });

    let err = store(&server)
        .update("users/x", Write::new().field("a", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(m) if m.contains("No document to update")));
}

#[tokio::test]
async fn test_create_conflict_maps_to_already_exists() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(format!("{}:commit", ROOT));
        then.status(409).json_body(json!({
            "error": { "code": 409, "message": "Document already exists", "status": "ALREADY_EXISTS" }
        }));
    });

    let err = store(&server)
        .create("users/x", Write::new().field("a", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_listen_yields_snapshot() {
    let server = MockServer::start();
    let body = concat!(
        "[{\"targetChange\":{\"targetChangeType\":\"ADD\",\"targetIds\":[1]}}\n",
        ",{\"documentChange\":{\"document\":{\"name\":\"projects/p/databases/(default)/documents/chatRooms/r1\",",
        "\"fields\":{\"name\":{\"stringValue\":\"general\"},\"memberCount\":{\"integerValue\":\"1\"}}},\"targetIds\":[1]}}\n",
        ",{\"targetChange\":{\"targetChangeType\":\"CURRENT\",\"targetIds\":[1]}}\n",
        "]"
    );
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", ROOT))
            .body_includes("\"targetId\":1");
        then.status(200).body(body);
    });

    let mut snapshots = store(&server)
        .listen(&Query::collection("chatRooms"))
        .await
        .unwrap();
    let first = snapshots.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    let room: Room = first[0].data().unwrap();
    assert_eq!(room.name, "general");
    assert!(snapshots.next().await.is_none());
    mock.assert();
}
