use super::*;
use crate::store::{MemoryStore, MAX_BATCH_WRITES};
use futures::StreamExt;
use std::time::Duration;

fn chats() -> (Arc<MemoryStore>, PrivateChats) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), PrivateChats::new(store))
}

fn user(uid: &str, username: Option<&str>, display_name: Option<&str>) -> UserProfile {
    UserProfile {
        uid: uid.into(),
        email: Some(format!("{}@example.com", uid)),
        username: username.map(Into::into),
        display_name: display_name.map(Into::into),
        ..Default::default()
    }
}

async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

#[test]
fn test_chat_id_is_commutative() {
    assert_eq!(chat_id("bob", "alice"), "alice_bob");
    assert_eq!(chat_id("alice", "bob"), chat_id("bob", "alice"));
    assert_eq!(chat_id("x", "x"), "x_x");
}

#[test]
fn test_participant_snapshot_defaults() {
    let snapshot = participant_snapshot(&user("ada", None, None));
    assert_eq!(snapshot.email, "ada@example.com");
    assert_eq!(snapshot.username, "ada");
    assert_eq!(snapshot.display_name, "ada");
    assert_eq!(snapshot.photo_url, "");

    let mut anonymous = user("anon", None, None);
    anonymous.email = None;
    let snapshot = participant_snapshot(&anonymous);
    assert_eq!(snapshot.email, "");
    assert_eq!(snapshot.username, FALLBACK_NAME);
    assert_eq!(snapshot.display_name, FALLBACK_NAME);
}

#[test]
fn test_participant_null_photo_reads_as_empty() {
    let participant: ParticipantProfile = serde_json::from_value(serde_json::json!({
        "email": "ada@example.com",
        "username": "ada",
        "displayName": "Ada",
        "photoURL": null
    }))
    .unwrap();
    assert_eq!(participant.photo_url, "");
}

#[tokio::test]
async fn test_get_or_create_is_idempotent() {
    let (store, chats) = chats();
    let ada = user("ada", Some("ada"), Some("Ada"));
    let bob = user("bob", Some("bobby"), None);

    let id = chats.get_or_create(&bob, &ada).await.unwrap();
    assert_eq!(id, "ada_bob");
    assert_eq!(chats.get_or_create(&ada, &bob).await.unwrap(), id);
    assert_eq!(store.len(), 1);

    let chat = chats.chat(&id).await.unwrap().unwrap();
    assert_eq!(chat.participant_ids, vec!["bob".to_string(), "ada".to_string()]);
    assert_eq!(chat.participants["bob"].display_name, "bob");
    assert_eq!(chat.participants["ada"].display_name, "Ada");
    assert_eq!(chat.last_message.as_deref(), Some(""));

    let raw = store.get(&chat_path(&id)).await.unwrap().unwrap();
    assert_eq!(raw.fields["participants"]["ada"]["photoURL"], "");

    let err = chats.get_or_create(&ada, &ada).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
}

#[tokio::test]
async fn test_send_edit_delete() {
    let (store, chats) = chats();
    let ada = user("ada", None, None);
    let bob = user("bob", None, None);
    let id = chats.get_or_create(&ada, &bob).await.unwrap();

    let err = chats.send(&id, "mallory", "hi").await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));
    let err = chats.send("nope_chat", "ada", "hi").await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    let first = chats.send(&id, "ada", " hi bob ").await.unwrap();
    tick().await;
    let image = chats.send_image(&id, "bob", "https://img/cat.jpg").await.unwrap();

    let chat = chats.chat(&id).await.unwrap().unwrap();
    assert_eq!(chat.last_message.as_deref(), Some(IMAGE_PREVIEW));

    let err = chats.edit(&id, &first, "bob", "mine now").await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    chats.edit(&id, &first, "ada", "hello bob").await.unwrap();
    let chat = chats.chat(&id).await.unwrap().unwrap();
    assert_eq!(chat.last_message.as_deref(), Some(IMAGE_PREVIEW));

    chats.delete_message(&id, &image, "bob").await.unwrap();
    let chat = chats.chat(&id).await.unwrap().unwrap();
    assert_eq!(chat.last_message.as_deref(), Some(DELETED_MESSAGE_TEXT));

    let query = Query::collection(&messages_path(&id)).order_by("timestamp", Direction::Ascending);
    let messages: Vec<Message> = store
        .query(&query)
        .await
        .unwrap()
        .iter()
        .map(|doc| doc.data().unwrap())
        .collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "hello bob");
    assert!(messages[0].edited);
    assert_eq!(messages[1].id, image);
    assert_eq!(messages[1].sender_id, "bob");
    assert_eq!(messages[1].text, DELETED_MESSAGE_TEXT);
    assert!(messages[1].deleted);
}

#[tokio::test]
async fn test_list_chats_newest_first() {
    let (store, chats) = chats();
    let ada = user("ada", Some("ada"), Some("Ada"));
    let bob = user("bob", Some("bob"), Some("Bob"));
    let cy = user("cy", Some("cy"), Some("Cy"));

    let with_bob = chats.get_or_create(&ada, &bob).await.unwrap();
    tick().await;
    let with_cy = chats.get_or_create(&ada, &cy).await.unwrap();
    tick().await;
    chats.send(&with_bob, "bob", "ping").await.unwrap();

    store
        .set(
            "privateChats/ada_zed",
            Write::new()
                .field("participantIds", vec!["ada".to_string(), "zed".to_string()])
                .field("participants", serde_json::json!({})),
        )
        .await
        .unwrap();

    let list = chats.list_chats("ada").await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].chat_id, with_bob);
    assert_eq!(list[0].other_user_id, "bob");
    assert_eq!(list[0].other_user.display_name, "Bob");
    assert_eq!(list[0].last_message, "ping");
    assert_eq!(list[1].chat_id, with_cy);
    assert_eq!(list[1].last_message, NO_MESSAGES_PREVIEW);
}

#[tokio::test]
async fn test_delete_chat_removes_everything() {
    let (store, chats) = chats();
    let ada = user("ada", None, None);
    let bob = user("bob", None, None);
    let id = chats.get_or_create(&ada, &bob).await.unwrap();

    let mut batch = WriteBatch::new()
        .set("users/ada/privateChats/bob", Write::new().field("chatId", id.as_str()))
        .set("users/bob/privateChats/ada", Write::new().field("chatId", id.as_str()))
        .set("users/ada", Write::new().field("uid", "ada"));
    for n in 0..MAX_BATCH_WRITES {
        batch = batch.set(
            &message_path(&id, &format!("m{:04}", n)),
            Write::new().field("senderId", "ada").field("text", "x"),
        );
    }
    store.commit(batch).await.unwrap();

    let err = chats.delete_chat(&id, "mallory").await.unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    chats.delete_chat(&id, "bob").await.unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get("users/ada").await.unwrap().is_some());

    let err = chats.delete_chat(&id, "bob").await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn test_subscribe_messages() {
    let (_, chats) = chats();
    let id = chats
        .get_or_create(&user("ada", None, None), &user("bob", None, None))
        .await
        .unwrap();

    let mut feed = chats.subscribe_messages(&id).await.unwrap();
    assert!(feed.next().await.unwrap().is_empty());

    chats.send(&id, "ada", "hi").await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(1), feed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].sender_id, "ada");
}
