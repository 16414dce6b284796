//! One-to-one conversations.
//!
//! A chat between two users has the deterministic id [`chat_id`], so both
//! sides find the same `privateChats/{id}` document without a lookup.

#[cfg(test)]
mod tests;

use crate::error::{ChatError, Result};
use crate::feed::{self, Feed};
use crate::models::{
    ChatSummary, Message, ParticipantProfile, PrivateChat, UserProfile, DELETED_MESSAGE_TEXT,
    IMAGE_PREVIEW,
};
use crate::store::{auto_id, Direction, DocumentStore, Query, StoreError, Write, WriteBatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NO_MESSAGES_PREVIEW: &str = "No messages yet";
const FALLBACK_NAME: &str = "User";
const CHATS: &str = "privateChats";

/// Id of the chat between `a` and `b`; the same whichever side asks.
pub fn chat_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

fn chat_path(chat_id: &str) -> String {
    format!("{}/{}", CHATS, chat_id)
}

fn message_path(chat_id: &str, message_id: &str) -> String {
    format!("{}/{}/messages/{}", CHATS, chat_id, message_id)
}

fn messages_path(chat_id: &str) -> String {
    format!("{}/{}/messages", CHATS, chat_id)
}

/// Profile snapshot kept on the chat document.
pub fn participant_snapshot(profile: &UserProfile) -> ParticipantProfile {
    let email = profile.email.clone().unwrap_or_default();
    let local_part = email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .map(str::to_string);
    let pick = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| local_part.clone())
            .unwrap_or_else(|| FALLBACK_NAME.to_string())
    };

    ParticipantProfile {
        username: pick(&profile.username),
        display_name: pick(&profile.display_name),
        photo_url: profile.photo_url.clone().unwrap_or_default(),
        email,
    }
}

fn preview(text: &str) -> Write {
    Write::new()
        .field("lastMessage", text)
        .server_timestamp("lastMessageTimestamp")
}

#[derive(Clone)]
pub struct PrivateChats {
    store: Arc<dyn DocumentStore>,
}

impl PrivateChats {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn chat(&self, chat_id: &str) -> Result<Option<PrivateChat>> {
        match self.store.get(&chat_path(chat_id)).await? {
            Some(doc) => Ok(Some(doc.data()?)),
            None => Ok(None),
        }
    }

    /// Returns the chat id shared by `current` and `other`, creating the chat
    /// on first contact.
    pub async fn get_or_create(&self, current: &UserProfile, other: &UserProfile) -> Result<String> {
        if current.uid == other.uid {
            return Err(ChatError::InvalidInput(
                "You cannot start a chat with yourself".into(),
            ));
        }

        let id = chat_id(&current.uid, &other.uid);
        if self.store.get(&chat_path(&id)).await?.is_some() {
            debug!(chat_id = %id, "chat exists");
            return Ok(id);
        }

        let participants: BTreeMap<String, ParticipantProfile> = [
            (current.uid.clone(), participant_snapshot(current)),
            (other.uid.clone(), participant_snapshot(other)),
        ]
        .into_iter()
        .collect();
        let participants = serde_json::to_value(participants).map_err(StoreError::from)?;

        let write = Write::new()
            .field("id", id.as_str())
            .field("participantIds", vec![current.uid.clone(), other.uid.clone()])
            .field("participants", participants)
            .field("lastMessage", "")
            .server_timestamp("createdAt")
            .server_timestamp("lastMessageTimestamp");

        match self.store.create(&chat_path(&id), write).await {
            Ok(()) => info!(chat_id = %id, "created private chat"),
            // The other side created it first.
            Err(StoreError::AlreadyExists(_)) => debug!(chat_id = %id, "chat created concurrently"),
            Err(e) => return Err(e.into()),
        }
        Ok(id)
    }

    async fn participant_chat(&self, chat_id: &str, uid: &str) -> Result<PrivateChat> {
        let chat = self
            .chat(chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Chat".into()))?;
        if !chat.participant_ids.iter().any(|p| p == uid) {
            return Err(ChatError::Forbidden(
                "You are not a participant of this chat".into(),
            ));
        }
        Ok(chat)
    }

    async fn post(&self, chat_id: &str, uid: &str, message: Write, preview_text: &str) -> Result<String> {
        self.participant_chat(chat_id, uid).await?;

        let message_id = auto_id();
        let batch = WriteBatch::new()
            .create(&message_path(chat_id, &message_id), message)
            .update(&chat_path(chat_id), preview(preview_text));
        self.store.commit(batch).await?;
        debug!(chat_id, message_id = %message_id, "sent private message");
        Ok(message_id)
    }

    fn message_write(uid: &str, text: &str) -> Write {
        Write::new()
            .field("senderId", uid)
            .field("text", text)
            .field("edited", false)
            .field("deleted", false)
            .server_timestamp("timestamp")
    }

    pub async fn send(&self, chat_id: &str, uid: &str, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("Message cannot be empty".into()));
        }
        self.post(chat_id, uid, Self::message_write(uid, text), text)
            .await
    }

    pub async fn send_image(&self, chat_id: &str, uid: &str, image_url: &str) -> Result<String> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(ChatError::InvalidInput("Image URL cannot be empty".into()));
        }
        let write = Self::message_write(uid, "").field("imageUrl", image_url);
        self.post(chat_id, uid, write, IMAGE_PREVIEW).await
    }

    async fn own_message(&self, chat_id: &str, message_id: &str, uid: &str) -> Result<Message> {
        let message: Message = self
            .store
            .get(&message_path(chat_id, message_id))
            .await?
            .ok_or_else(|| ChatError::NotFound("Message".into()))?
            .data()?;
        if message.sender_id != uid {
            return Err(ChatError::Forbidden(
                "You can only change your own messages".into(),
            ));
        }
        Ok(message)
    }

    async fn is_latest(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        let query = Query::collection(&messages_path(chat_id))
            .order_by("timestamp", Direction::Descending)
            .limit(1);
        Ok(self
            .store
            .query(&query)
            .await?
            .first()
            .is_some_and(|doc| doc.id == message_id))
    }

    pub async fn edit(&self, chat_id: &str, message_id: &str, uid: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("Message cannot be empty".into()));
        }
        if self.own_message(chat_id, message_id, uid).await?.deleted {
            return Err(ChatError::InvalidInput(
                "Deleted messages cannot be edited".into(),
            ));
        }

        let mut batch = WriteBatch::new().update(
            &message_path(chat_id, message_id),
            Write::new().field("text", text).field("edited", true),
        );
        if self.is_latest(chat_id, message_id).await? {
            batch = batch.update(&chat_path(chat_id), Write::new().field("lastMessage", text));
        }
        self.store.commit(batch).await?;
        info!(chat_id, message_id, "edited private message");
        Ok(())
    }

    /// Soft delete, like room messages.
    pub async fn delete_message(&self, chat_id: &str, message_id: &str, uid: &str) -> Result<()> {
        self.own_message(chat_id, message_id, uid).await?;

        let mut batch = WriteBatch::new().update(
            &message_path(chat_id, message_id),
            Write::new()
                .field("text", DELETED_MESSAGE_TEXT)
                .field("deleted", true),
        );
        if self.is_latest(chat_id, message_id).await? {
            batch = batch.update(
                &chat_path(chat_id),
                Write::new().field("lastMessage", DELETED_MESSAGE_TEXT),
            );
        }
        self.store.commit(batch).await?;
        info!(chat_id, message_id, "deleted private message");
        Ok(())
    }

    /// Chats of `uid`, newest activity first, described from their side.
    pub async fn list_chats(&self, uid: &str) -> Result<Vec<ChatSummary>> {
        let query = Query::collection(CHATS).where_array_contains("participantIds", uid);
        let chats: Vec<PrivateChat> = feed::decode(&self.store.query(&query).await?, "private chat");

        let mut summaries: Vec<ChatSummary> = chats
            .into_iter()
            .filter_map(|mut chat| {
                let other_id = chat.participant_ids.iter().find(|p| *p != uid)?.clone();
                let Some(other) = chat.participants.remove(&other_id) else {
                    warn!(chat_id = %chat.id, "missing participant data, skipping chat");
                    return None;
                };
                Some(ChatSummary {
                    chat_id: chat.id,
                    other_user_id: other_id,
                    other_user: other,
                    last_message: chat
                        .last_message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| NO_MESSAGES_PREVIEW.to_string()),
                    last_message_timestamp: chat.last_message_timestamp,
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
        debug!(uid, count = summaries.len(), "listed private chats");
        Ok(summaries)
    }

    /// Deletes the chat, its messages and both users' index entries.
    pub async fn delete_chat(&self, chat_id: &str, uid: &str) -> Result<()> {
        let chat = self.participant_chat(chat_id, uid).await?;

        let messages = self
            .store
            .query(&Query::collection(&messages_path(chat_id)))
            .await?;
        let count = messages.len();

        let mut paths: Vec<String> = messages.into_iter().map(|doc| doc.path).collect();
        paths.push(chat_path(chat_id));
        if let Some(other) = chat.participant_ids.iter().find(|p| *p != uid) {
            paths.push(format!("users/{}/privateChats/{}", uid, other));
            paths.push(format!("users/{}/privateChats/{}", other, uid));
        }

        for batch in WriteBatch::chunked_deletes(paths) {
            self.store.commit(batch).await?;
        }
        info!(chat_id, messages = count, "deleted private chat");
        Ok(())
    }

    /// Live messages of a chat, oldest first.
    pub async fn subscribe_messages(&self, chat_id: &str) -> Result<Feed<Message>> {
        let query =
            Query::collection(&messages_path(chat_id)).order_by("timestamp", Direction::Ascending);
        let subscription = self.store.listen(&query).await?;
        info!(chat_id, "subscribed to private messages");
        Ok(feed::typed(subscription, "private message"))
    }
}
