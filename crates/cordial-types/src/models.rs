use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// How long a heartbeat keeps a user counted as online.
pub const PRESENCE_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Argon2 PHC string. Users created without a password have none.
    #[serde(rename = "password", default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_username_change: Option<DateTime<Utc>>,
}

impl User {
    pub fn summary(&self) -> AuthorSummary {
        AuthorSummary {
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

/// The slice of a user row that gets joined onto messages and members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl AuthorSummary {
    /// Online means an `online` status backed by a heartbeat inside the TTL.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.last_seen_at) {
            (Some(Status::Online), Some(seen)) => (now - seen).num_seconds() < PRESENCE_TTL_SECS,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    /// `None` for direct messages.
    pub server_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub is_dm: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Deterministic DM channel name: `dm-<lower>-<higher>`, ids compared as strings.
    pub fn dm_name(a: Uuid, b: Uuid) -> String {
        let (a, b) = (a.to_string(), b.to_string());
        if a <= b {
            format!("dm-{}-{}", a, b)
        } else {
            format!("dm-{}-{}", b, a)
        }
    }

    pub fn is_direct(&self) -> bool {
        self.is_dm || self.server_id.is_none()
    }

    /// The other participant of a DM channel, read back from its name.
    pub fn dm_peer(&self, me: Uuid) -> Option<Uuid> {
        let rest = self.name.strip_prefix("dm-")?;
        // Hyphenated uuids are 36 chars each, joined by one more hyphen.
        if rest.len() != 73 {
            return None;
        }
        let first: Uuid = rest.get(..36)?.parse().ok()?;
        let second: Uuid = rest.get(37..)?.parse().ok()?;
        if first == me {
            Some(second)
        } else if second == me {
            Some(first)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMember {
    pub id: Uuid,
    pub server_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    #[serde(rename = "users", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthorSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// Emoji -> users who reacted with it. Emoji with no users are not kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, BTreeSet<Uuid>>);

impl Reactions {
    /// Adds the user's reaction, or removes it when already present.
    /// Returns `true` when the reaction was added.
    pub fn toggle(&mut self, emoji: &str, user_id: Uuid) -> bool {
        let users = self.0.entry(emoji.to_string()).or_default();
        if users.remove(&user_id) {
            if users.is_empty() {
                self.0.remove(emoji);
            }
            false
        } else {
            users.insert(user_id);
            true
        }
    }

    pub fn users(&self, emoji: &str) -> Option<&BTreeSet<Uuid>> {
        self.0.get(emoji)
    }

    pub fn count(&self, emoji: &str) -> usize {
        self.0.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn has_reacted(&self, emoji: &str, user_id: Uuid) -> bool {
        self.0.get(emoji).is_some_and(|users| users.contains(&user_id))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<Uuid>)> {
        self.0.iter().map(|(emoji, users)| (emoji.as_str(), users))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "users", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reactions: Reactions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<ReplyPreview>>,
}

impl Message {
    pub fn author_name(&self) -> &str {
        self.author.as_ref().map_or("unknown", |a| a.username.as_str())
    }
}

/// Joined preview of the message being replied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "users", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRead {
    pub user_id: Uuid,
    pub channel_id: Uuid,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn toggle_twice_restores_reactions() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut reactions = Reactions::default();
        reactions.toggle("👍", bob);
        reactions.toggle("🎉", alice);
        let before = reactions.clone();

        assert!(reactions.toggle("👍", alice));
        assert_eq!(reactions.count("👍"), 2);
        assert!(!reactions.toggle("👍", alice));
        assert_eq!(reactions, before);

        assert!(!reactions.toggle("🎉", alice));
        assert!(reactions.users("🎉").is_none());
        assert!(reactions.toggle("🎉", alice));
        assert_eq!(reactions, before);
    }

    #[test]
    fn dm_name_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let name = Channel::dm_name(a, b);
        assert_eq!(name, Channel::dm_name(b, a));
        assert!(name.starts_with("dm-"));

        let channel = Channel {
            id: Uuid::new_v4(),
            server_id: None,
            name,
            is_dm: true,
            created_at: Utc::now(),
            last_message_at: None,
        };
        assert_eq!(channel.dm_peer(a), Some(b));
        assert_eq!(channel.dm_peer(b), Some(a));
        assert_eq!(channel.dm_peer(Uuid::new_v4()), None);
    }

    #[test]
    fn dm_peer_rejects_names_split_inside_a_character() {
        let me = Uuid::new_v4();
        // 36 + 2 + 35 bytes: right length, but byte 37 is inside the 'é'.
        let name = format!("dm-{}é{}", me, "a".repeat(35));
        let channel = Channel {
            id: Uuid::new_v4(),
            server_id: None,
            name,
            is_dm: true,
            created_at: Utc::now(),
            last_message_at: None,
        };
        assert_eq!(channel.dm_peer(me), None);
    }

    #[test]
    fn message_decodes_joined_rows_and_null_reactions() {
        let json = serde_json::json!({
            "id": "6f1c2a1e-9d5b-4c61-8d1e-2a6b0c3f4d5e",
            "channel_id": "0b8f7c6d-5e4f-4a3b-9c2d-1e0f9a8b7c6d",
            "user_id": "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d",
            "content": "hello",
            "created_at": "2024-05-01T12:00:00Z",
            "users": { "username": "alice" },
            "reactions": null,
            "reply_to_message_id": null
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.author_name(), "alice");
        assert!(message.reactions.is_empty());
        assert!(message.reply_to_message.is_none());
    }

    #[test]
    fn presence_expires_after_ttl() {
        let now = Utc::now();
        let mut summary = AuthorSummary {
            username: "alice".into(),
            avatar_url: None,
            status: Some(Status::Online),
            last_seen_at: Some(now - Duration::seconds(30)),
        };
        assert!(summary.is_online(now));

        summary.last_seen_at = Some(now - Duration::seconds(PRESENCE_TTL_SECS + 1));
        assert!(!summary.is_online(now));

        summary.last_seen_at = Some(now);
        summary.status = Some(Status::Offline);
        assert!(!summary.is_online(now));
    }
}
