//! Group chat rooms and their messages.
//!
//! Room documents live in `chatRooms/{id}`, messages in
//! `chatRooms/{id}/messages/{mid}`. Every message write also refreshes the
//! room's `lastMessage` preview in the same commit.


use crate::error::{ChatError, Result};
use crate::feed::{self, Feed};
use crate::models::{ChatRoom, RoomMessage, UserProfile, DELETED_MESSAGE_TEXT, IMAGE_PREVIEW};
use crate::store::{auto_id, Direction, DocumentStore, Query, Write, WriteBatch};
use std::sync::Arc;
use tracing::{debug, info};

pub const SYSTEM_MESSAGE_PREVIEW: &str = "System message";
pub const UNKNOWN_SENDER_EMAIL: &str = "unknown@example.com";
pub const UNKNOWN_SENDER_NAME: &str = "Unknown User";

const ROOMS: &str = "chatRooms";

fn room_path(room_id: &str) -> String {
    format!("{}/{}", ROOMS, room_id)
}

fn messages_path(room_id: &str) -> String {
    format!("{}/{}/messages", ROOMS, room_id)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Name shown next to a message: display name, username, email local part.
pub fn sender_name(sender: &UserProfile) -> String {
    non_empty(sender.display_name.as_deref())
        .or_else(|| non_empty(sender.username.as_deref()))
        .or_else(|| {
            non_empty(sender.email.as_deref())
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or(UNKNOWN_SENDER_NAME)
        .to_string()
}

fn sender_email(sender: &UserProfile) -> String {
    non_empty(sender.email.as_deref())
        .unwrap_or(UNKNOWN_SENDER_EMAIL)
        .to_string()
}

fn preview(text: &str) -> Write {
    Write::new()
        .field("lastMessage", text)
        .server_timestamp("lastMessageTimestamp")
}

#[derive(Clone)]
pub struct RoomDirectory {
    store: Arc<dyn DocumentStore>,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Creates a room with the creator as its only member. Returns the room id.
    pub async fn create_room(
        &self,
        creator: &UserProfile,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("Room name cannot be empty".into()));
        }

        let write = Write::new()
            .field("name", name)
            .field("description", description.trim())
            .field("createdBy", sender_name(creator))
            .field("createdById", creator.uid.as_str())
            .field("members", vec![creator.uid.clone()])
            .field("memberCount", 1)
            .field("isPublic", is_public)
            .server_timestamp("createdAt")
            .server_timestamp("lastMessageTimestamp");
        let room_id = self.store.add(ROOMS, write).await?;

        info!(room_id = %room_id, owner = %creator.uid, is_public, "created room");
        Ok(room_id)
    }

    pub async fn room(&self, room_id: &str) -> Result<Option<ChatRoom>> {
        match self.store.get(&room_path(room_id)).await? {
            Some(doc) => Ok(Some(doc.data()?)),
            None => Ok(None),
        }
    }

    async fn existing_room(&self, room_id: &str) -> Result<ChatRoom> {
        self.room(room_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Room".into()))
    }

    async fn owned_room(&self, room_id: &str, uid: &str) -> Result<ChatRoom> {
        let room = self.existing_room(room_id).await?;
        if room.created_by_id != uid {
            return Err(ChatError::Forbidden(
                "Only the room owner can change this room".into(),
            ));
        }
        Ok(room)
    }

    /// Updates name, description and visibility. Owner only.
    pub async fn edit_room(
        &self,
        room_id: &str,
        uid: &str,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("Room name cannot be empty".into()));
        }
        self.owned_room(room_id, uid).await?;

        let write = Write::new()
            .field("name", name)
            .field("description", description.trim())
            .field("isPublic", is_public);
        self.store.update(&room_path(room_id), write).await?;
        info!(room_id, "edited room");
        Ok(())
    }

    /// Deletes the room and all of its messages. Owner only.
    ///
    /// Messages go first, in batches within the commit limit; the room
    /// document is removed last.
    pub async fn delete_room(&self, room_id: &str, uid: &str) -> Result<()> {
        self.owned_room(room_id, uid).await?;

        let messages = self
            .store
            .query(&Query::collection(&messages_path(room_id)))
            .await?;
        let count = messages.len();
        let paths = messages
            .into_iter()
            .map(|doc| doc.path)
            .chain(std::iter::once(room_path(room_id)));

        for batch in WriteBatch::chunked_deletes(paths) {
            self.store.commit(batch).await?;
        }
        info!(room_id, messages = count, "deleted room");
        Ok(())
    }

    pub async fn public_rooms(&self) -> Result<Vec<ChatRoom>> {
        let query = Query::collection(ROOMS).where_eq("isPublic", true);
        let docs = self.store.query(&query).await?;
        debug!(count = docs.len(), "fetched public rooms");
        Ok(feed::decode(&docs, "room"))
    }

    pub async fn user_rooms(&self, uid: &str) -> Result<Vec<ChatRoom>> {
        let query = Query::collection(ROOMS).where_array_contains("members", uid);
        let docs = self.store.query(&query).await?;
        debug!(uid, count = docs.len(), "fetched member rooms");
        Ok(feed::decode(&docs, "room"))
    }

    /// False when the room does not exist.
    pub async fn is_member(&self, room_id: &str, uid: &str) -> Result<bool> {
        Ok(self
            .room(room_id)
            .await?
            .is_some_and(|room| room.is_member(uid)))
    }

    fn message_write(&self, sender: &UserProfile, text: &str, is_system: bool) -> Write {
        Write::new()
            .field("text", text)
            .field("senderId", sender.uid.as_str())
            .field("senderEmail", sender_email(sender))
            .field("senderName", sender_name(sender))
            .field("edited", false)
            .field("deleted", false)
            .field("isSystemMessage", is_system)
            .server_timestamp("timestamp")
    }

    /// Adds `user` to the members. Joining twice changes nothing.
    pub async fn join(&self, room_id: &str, user: &UserProfile) -> Result<()> {
        let room = self.existing_room(room_id).await?;
        if room.is_member(&user.uid) {
            debug!(room_id, uid = %user.uid, "already a member");
            return Ok(());
        }

        let mut members = room.members;
        members.push(user.uid.clone());
        let notice = format!("{} joined the room", sender_name(user));

        let batch = WriteBatch::new()
            .update(
                &room_path(room_id),
                preview(SYSTEM_MESSAGE_PREVIEW)
                    .field("members", members)
                    .field("memberCount", room.member_count + 1),
            )
            .create(
                &format!("{}/{}", messages_path(room_id), auto_id()),
                self.message_write(user, &notice, true),
            );
        self.store.commit(batch).await?;
        info!(room_id, uid = %user.uid, "joined room");
        Ok(())
    }

    /// Removes `user` from the members. Leaving a room one is not in changes nothing.
    pub async fn leave(&self, room_id: &str, user: &UserProfile) -> Result<()> {
        let room = self.existing_room(room_id).await?;
        if !room.is_member(&user.uid) {
            debug!(room_id, uid = %user.uid, "not a member");
            return Ok(());
        }

        let members: Vec<String> = room
            .members
            .into_iter()
            .filter(|m| *m != user.uid)
            .collect();
        let notice = format!("{} left the room", sender_name(user));

        let batch = WriteBatch::new()
            .update(
                &room_path(room_id),
                preview(SYSTEM_MESSAGE_PREVIEW)
                    .field("members", members)
                    .field("memberCount", (room.member_count - 1).max(0)),
            )
            .create(
                &format!("{}/{}", messages_path(room_id), auto_id()),
                self.message_write(user, &notice, true),
            );
        self.store.commit(batch).await?;
        info!(room_id, uid = %user.uid, "left room");
        Ok(())
    }

    /// Posts a text message, optionally replying to another message.
    pub async fn send_message(
        &self,
        room_id: &str,
        sender: &UserProfile,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("Message cannot be empty".into()));
        }

        let message_id = auto_id();
        let mut write = self.message_write(sender, text, false);
        if let Some(reply_to) = reply_to {
            write = write.field("replyTo", reply_to);
        }

        let batch = WriteBatch::new()
            .create(&format!("{}/{}", messages_path(room_id), message_id), write)
            .update(&room_path(room_id), preview(text));
        self.store.commit(batch).await?;
        debug!(room_id, message_id = %message_id, "sent message");
        Ok(message_id)
    }

    /// Posts an image message; the text is empty.
    pub async fn send_image_message(
        &self,
        room_id: &str,
        sender: &UserProfile,
        image_url: &str,
    ) -> Result<String> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(ChatError::InvalidInput("Image URL cannot be empty".into()));
        }

        let message_id = auto_id();
        let write = self
            .message_write(sender, "", false)
            .field("imageUrl", image_url);

        let batch = WriteBatch::new()
            .create(&format!("{}/{}", messages_path(room_id), message_id), write)
            .update(&room_path(room_id), preview(IMAGE_PREVIEW));
        self.store.commit(batch).await?;
        debug!(room_id, message_id = %message_id, "sent image message");
        Ok(message_id)
    }

    async fn own_message(&self, room_id: &str, message_id: &str, uid: &str) -> Result<RoomMessage> {
        let path = format!("{}/{}", messages_path(room_id), message_id);
        let message: RoomMessage = self
            .store
            .get(&path)
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

    async fn is_latest(&self, room_id: &str, message_id: &str) -> Result<bool> {
        let query = Query::collection(&messages_path(room_id))
            .order_by("timestamp", Direction::Descending)
            .limit(1);
        let latest = self.store.query(&query).await?;
        Ok(latest.first().is_some_and(|doc| doc.id == message_id))
    }

    /// Replaces the text of one's own message and marks it edited.
    pub async fn edit_message(
        &self,
        room_id: &str,
        message_id: &str,
        uid: &str,
        text: &str,
    ) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput("Message cannot be empty".into()));
        }
        let message = self.own_message(room_id, message_id, uid).await?;
        if message.deleted {
            return Err(ChatError::InvalidInput(
                "Deleted messages cannot be edited".into(),
            ));
        }

        let mut batch = WriteBatch::new().update(
            &format!("{}/{}", messages_path(room_id), message_id),
            Write::new().field("text", text).field("edited", true),
        );
        if self.is_latest(room_id, message_id).await? {
            batch = batch.update(&room_path(room_id), Write::new().field("lastMessage", text));
        }
        self.store.commit(batch).await?;
        info!(room_id, message_id, "edited message");
        Ok(())
    }

    /// Soft delete: the document stays, its text becomes a placeholder.
    pub async fn delete_message(&self, room_id: &str, message_id: &str, uid: &str) -> Result<()> {
        self.own_message(room_id, message_id, uid).await?;

        let mut batch = WriteBatch::new().update(
            &format!("{}/{}", messages_path(room_id), message_id),
            Write::new()
                .field("text", DELETED_MESSAGE_TEXT)
                .field("deleted", true),
        );
        if self.is_latest(room_id, message_id).await? {
            batch = batch.update(
                &room_path(room_id),
                Write::new().field("lastMessage", DELETED_MESSAGE_TEXT),
            );
        }
        self.store.commit(batch).await?;
        info!(room_id, message_id, "deleted message");
        Ok(())
    }

    /// Live messages of a room, oldest first.
    pub async fn subscribe_messages(&self, room_id: &str) -> Result<Feed<RoomMessage>> {
        let query =
            Query::collection(&messages_path(room_id)).order_by("timestamp", Direction::Ascending);
        let subscription = self.store.listen(&query).await?;
        info!(room_id, "subscribed to room messages");
        Ok(feed::typed(subscription, "room message"))
    }

    /// Live list of every room.
    pub async fn subscribe_rooms(&self) -> Result<Feed<ChatRoom>> {
        let subscription = self.store.listen(&Query::collection(ROOMS)).await?;
        info!("subscribed to rooms");
        Ok(feed::typed(subscription, "room"))
    }
}
