//! Typed views of the persisted documents.
//!
//! Field names match what is stored. The document id is filled in from the
//! document path when read through [`Document::data`](crate::store::Document::data).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Text that replaces the body of a soft-deleted message.
pub const DELETED_MESSAGE_TEXT: &str = "This message was deleted";
/// Conversation preview for image messages.
pub const IMAGE_PREVIEW: &str = "📷 Image";

/// `users/{uid}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// `chatRooms/{id}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_by_id: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub is_public: bool,
    pub last_message: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

impl ChatRoom {
    pub fn is_member(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m == uid)
    }
}

/// `chatRooms/{id}/messages/{mid}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_system_message: bool,
    pub reply_to: Option<String>,
}

/// Profile snapshot stored inside a private chat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    /// Empty when the user has no photo.
    #[serde(rename = "photoURL", default, deserialize_with = "null_as_empty")]
    pub photo_url: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `privateChats/{a_b}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChat {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantProfile>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

/// `privateChats/{id}/messages/{mid}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// One row of the private chat list, seen from the current user.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub chat_id: String,
    pub other_user_id: String,
    pub other_user: ParticipantProfile,
    pub last_message: String,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}
