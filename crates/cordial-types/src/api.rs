use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MediaType, Status};

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    #[serde(rename = "password", skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewUser {
    pub fn new(username: &str, password_hash: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        }
    }
}

/// Partial user update; only the `Some` fields are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "password", skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_username_change: Option<DateTime<Utc>>,
}

// -- Servers --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServer {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl NewServer {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMember {
    pub id: Uuid,
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

impl NewMember {
    pub fn new(server_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            user_id,
            joined_at: Utc::now(),
        }
    }
}

// -- Channels --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    pub id: Uuid,
    pub server_id: Option<Uuid>,
    pub name: String,
    pub is_dm: bool,
    pub created_at: DateTime<Utc>,
}

impl NewChannel {
    pub fn in_server(server_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id: Some(server_id),
            name: name.to_string(),
            is_dm: false,
            created_at: Utc::now(),
        }
    }

    pub fn direct(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id: None,
            name: name.to_string(),
            is_dm: true,
            created_at: Utc::now(),
        }
    }
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn text(channel_id: Uuid, user_id: Uuid, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id,
            user_id,
            content: content.to_string(),
            media_url: None,
            media_type: None,
            reply_to_message_id: None,
            created_at: Utc::now(),
        }
    }
}

// -- Media search --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaResult {
    pub url: String,
    pub preview_url: String,
    pub media_type: MediaType,
}
