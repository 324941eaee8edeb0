use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use cordial_types::api::{NewChannel, NewMember, NewMessage, NewServer, NewUser, UserPatch};
use cordial_types::models::{
    AuthorSummary, Channel, ChannelRead, ConfigEntry, MediaType, Message, Reactions, ReplyPreview,
    Server, ServerMember, Status, User,
};

use crate::Database;

const USER_COLUMNS: &str =
    "id, username, avatar_url, password, created_at, status, last_seen_at, last_username_change";

const CHANNEL_COLUMNS: &str = "id, server_id, name, is_dm, created_at, last_message_at";

const MEMBER_SELECT: &str = "
    SELECT m.id, m.server_id, m.user_id, m.joined_at,
           u.username, u.avatar_url, u.status, u.last_seen_at
    FROM server_members m
    LEFT JOIN users u ON u.id = m.user_id";

// Author and replied-to message are joined in one pass (no per-row lookups).
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.user_id, m.content, m.media_url, m.media_type,
           m.reactions, m.reply_to_message_id, m.created_at,
           u.username, u.avatar_url, u.status, u.last_seen_at,
           r.id, r.user_id, r.content, r.created_at,
           ru.username, ru.avatar_url, ru.status, ru.last_seen_at
    FROM messages m
    LEFT JOIN users u ON u.id = m.user_id
    LEFT JOIN messages r ON r.id = m.reply_to_message_id
    LEFT JOIN users ru ON ru.id = r.user_id";

impl Database {
    // -- Users --

    pub fn insert_user(&self, user: &NewUser) -> Result<User> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.password_hash,
                    ts(&user.created_at)
                ],
            )?;
            query_user(conn, "id", &user.id.to_string())?
                .ok_or_else(|| anyhow!("User missing after insert: {}", user.id))
        })
    }

    pub fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Writes the `Some` fields of the patch and returns the updated row.
    pub fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    username = COALESCE(?2, username),
                    password = COALESCE(?3, password),
                    avatar_url = COALESCE(?4, avatar_url),
                    status = COALESCE(?5, status),
                    last_seen_at = COALESCE(?6, last_seen_at),
                    last_username_change = COALESCE(?7, last_username_change)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.username,
                    patch.password_hash,
                    patch.avatar_url,
                    patch.status.map(status_str),
                    patch.last_seen_at.as_ref().map(ts),
                    patch.last_username_change.as_ref().map(ts),
                ],
            )?;
            query_user(conn, "id", &id.to_string())
        })
    }

    // -- Servers --

    pub fn insert_server(&self, server: &NewServer) -> Result<Server> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO servers (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![server.id.to_string(), server.name, ts(&server.created_at)],
            )?;
            Ok(Server {
                id: server.id,
                name: server.name.clone(),
                created_at: server.created_at,
            })
        })
    }

    pub fn list_servers(&self) -> Result<Vec<Server>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM servers ORDER BY created_at")?;
            let rows = stmt
                .query_map([], server_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn servers_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Server>> {
        self.with_conn(|conn| {
            query_in(
                conn,
                "SELECT id, name, created_at FROM servers WHERE id",
                ids,
                "ORDER BY created_at",
                server_from_row,
            )
        })
    }

    // -- Members --

    pub fn insert_member(&self, member: &NewMember) -> Result<ServerMember> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO server_members (id, server_id, user_id, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    member.id.to_string(),
                    member.server_id.to_string(),
                    member.user_id.to_string(),
                    ts(&member.joined_at)
                ],
            )?;
            let sql = format!("{} WHERE m.id = ?1", MEMBER_SELECT);
            let row = conn.query_row(&sql, [member.id.to_string()], member_from_row)?;
            Ok(row)
        })
    }

    pub fn membership(&self, server_id: Uuid, user_id: Uuid) -> Result<Option<ServerMember>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.server_id = ?1 AND m.user_id = ?2", MEMBER_SELECT);
            let row = conn
                .query_row(
                    &sql,
                    [server_id.to_string(), user_id.to_string()],
                    member_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_members(&self, server_id: Uuid) -> Result<Vec<ServerMember>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.server_id = ?1 ORDER BY m.joined_at", MEMBER_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([server_id.to_string()], member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn memberships_for_user(&self, user_id: Uuid) -> Result<Vec<ServerMember>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.user_id = ?1 ORDER BY m.joined_at", MEMBER_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], member_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    pub fn insert_channel(&self, channel: &NewChannel) -> Result<Channel> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, server_id, name, is_dm, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    channel.id.to_string(),
                    channel.server_id.map(|id| id.to_string()),
                    channel.name,
                    channel.is_dm,
                    ts(&channel.created_at)
                ],
            )?;
            query_channel(conn, channel.id)?
                .ok_or_else(|| anyhow!("Channel missing after insert: {}", channel.id))
        })
    }

    pub fn channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM channels WHERE name = ?1 ORDER BY created_at LIMIT 1",
                CHANNEL_COLUMNS
            );
            let row = conn.query_row(&sql, [name], channel_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_channels(&self, server_id: Uuid) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM channels WHERE server_id = ?1 ORDER BY created_at",
                CHANNEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([server_id.to_string()], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn channels_in_servers(&self, server_ids: &[Uuid]) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            query_in(
                conn,
                &format!("SELECT {} FROM channels WHERE server_id", CHANNEL_COLUMNS),
                server_ids,
                "ORDER BY created_at",
                channel_from_row,
            )
        })
    }

    /// DM channels whose name carries the user's id.
    pub fn dm_channels_for(&self, user_id: Uuid) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM channels WHERE is_dm = 1 AND name LIKE ?1 ORDER BY created_at",
                CHANNEL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([format!("%{}%", user_id)], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Moves `last_message_at` forward; an older timestamp leaves it alone.
    pub fn touch_channel(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Channel>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE channels SET last_message_at = ?2
                 WHERE id = ?1 AND (last_message_at IS NULL OR last_message_at < ?2)",
                params![id.to_string(), ts(&at)],
            )?;
            query_channel(conn, id)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, channel_id, user_id, content, media_url, media_type, reply_to_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id.to_string(),
                    message.channel_id.to_string(),
                    message.user_id.to_string(),
                    message.content,
                    message.media_url,
                    message.media_type.map(media_type_str),
                    message.reply_to_message_id.map(|id| id.to_string()),
                    ts(&message.created_at)
                ],
            )?;
            query_message(conn, message.id)?
                .ok_or_else(|| anyhow!("Message missing after insert: {}", message.id))
        })
    }

    pub fn message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// The newest `limit` messages of a channel, oldest first.
    pub fn list_messages(&self, channel_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.channel_id = ?1 ORDER BY m.created_at DESC LIMIT ?2",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params![channel_id.to_string(), limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn update_reactions(&self, id: Uuid, reactions: &Reactions) -> Result<Option<Message>> {
        let encoded = serde_json::to_string(reactions)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET reactions = ?2 WHERE id = ?1",
                params![id.to_string(), encoded],
            )?;
            query_message(conn, id)
        })
    }

    // -- Read state --

    pub fn channel_reads(&self, user_id: Uuid) -> Result<Vec<ChannelRead>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, channel_id, last_read_at FROM channel_reads WHERE user_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok(ChannelRead {
                        user_id: uuid_at(row, 0)?,
                        channel_id: uuid_at(row, 1)?,
                        last_read_at: ts_at(row, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn upsert_channel_read(&self, read: &ChannelRead) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_reads (user_id, channel_id, last_read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, channel_id) DO UPDATE SET last_read_at = excluded.last_read_at",
                params![
                    read.user_id.to_string(),
                    read.channel_id.to_string(),
                    ts(&read.last_read_at)
                ],
            )?;
            Ok(())
        })
    }

    // -- App config --

    pub fn config_value(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM app_config WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    pub fn upsert_config(&self, key: &str, value: &str) -> Result<ConfigEntry> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
            Ok(ConfigEntry {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort as strings.
pub fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let row = conn.query_row(&sql, [value], user_from_row).optional()?;
    Ok(row)
}

fn query_channel(conn: &Connection, id: Uuid) -> Result<Option<Channel>> {
    let sql = format!("SELECT {} FROM channels WHERE id = ?1", CHANNEL_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], channel_from_row)
        .optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    let row = conn
        .query_row(&sql, [id.to_string()], message_from_row)
        .optional()?;
    Ok(row)
}

fn query_in<T, F>(
    conn: &Connection,
    prefix: &str,
    ids: &[Uuid],
    suffix: &str,
    map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!("{} IN ({}) {}", prefix, placeholders.join(", "), suffix);
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        avatar_url: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: ts_at(row, 4)?,
        status: status_at(row, 5)?,
        last_seen_at: opt_ts_at(row, 6)?,
        last_username_change: opt_ts_at(row, 7)?,
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        created_at: ts_at(row, 2)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ServerMember> {
    Ok(ServerMember {
        id: uuid_at(row, 0)?,
        server_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        joined_at: ts_at(row, 3)?,
        user: author_at(row, 4)?,
    })
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: uuid_at(row, 0)?,
        server_id: opt_uuid_at(row, 1)?,
        name: row.get(2)?,
        is_dm: row.get(3)?,
        created_at: ts_at(row, 4)?,
        last_message_at: opt_ts_at(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let reactions: String = row.get(6)?;
    let reactions: Reactions =
        serde_json::from_str(&reactions).map_err(|e| conversion_error(6, e))?;

    let reply_to_message = match opt_uuid_at(row, 13)? {
        Some(id) => Some(Box::new(ReplyPreview {
            id,
            user_id: uuid_at(row, 14)?,
            content: row.get(15)?,
            created_at: ts_at(row, 16)?,
            author: author_at(row, 17)?,
        })),
        None => None,
    };

    Ok(Message {
        id: uuid_at(row, 0)?,
        channel_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        media_url: row.get(4)?,
        media_type: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_media_type(&s)),
        created_at: ts_at(row, 8)?,
        author: author_at(row, 9)?,
        reactions,
        reply_to_message_id: opt_uuid_at(row, 7)?,
        reply_to_message,
    })
}

/// Reads the four joined author columns starting at `idx`.
fn author_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<AuthorSummary>> {
    let Some(username) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    Ok(Some(AuthorSummary {
        username,
        avatar_url: row.get(idx + 1)?,
        status: status_at(row, idx + 2)?,
        last_seen_at: opt_ts_at(row, idx + 3)?,
    }))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| text.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_ts(&text).map_err(|e| conversion_error(idx, e))
}

fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| parse_ts(&text).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_ts(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Status>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| match s.as_str() {
            "online" => Some(Status::Online),
            "offline" => Some(Status::Offline),
            _ => None,
        }))
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Online => "online",
        Status::Offline => "offline",
    }
}

fn media_type_str(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "image",
        MediaType::Video => "video",
    }
}

fn parse_media_type(s: &str) -> Option<MediaType> {
    match s {
        "image" => Some(MediaType::Image),
        "video" => Some(MediaType::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seed() -> (Database, User, Channel) {
        let db = Database::open_in_memory().unwrap();
        let user = db.insert_user(&NewUser::new("alice", None)).unwrap();
        let server = db.insert_server(&NewServer::new("Guild")).unwrap();
        let channel = db
            .insert_channel(&NewChannel::in_server(server.id, "general"))
            .unwrap();
        (db, user, channel)
    }

    #[test]
    fn list_messages_returns_latest_oldest_first_with_joins() {
        let (db, user, channel) = seed();
        let start = Utc::now();

        let mut ids = Vec::new();
        for i in 0..5 {
            let mut message = NewMessage::text(channel.id, user.id, &format!("msg {}", i));
            message.created_at = start + Duration::seconds(i);
            if let Some(&first) = ids.first() {
                message.reply_to_message_id = Some(first);
            }
            ids.push(db.insert_message(&message).unwrap().id);
        }

        let messages = db.list_messages(channel.id, 3).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
        assert_eq!(messages[0].author_name(), "alice");

        let reply = messages[0].reply_to_message.as_ref().unwrap();
        assert_eq!(reply.id, ids[0]);
        assert_eq!(reply.content, "msg 0");
        assert_eq!(reply.author.as_ref().unwrap().username, "alice");
    }

    #[test]
    fn reactions_persist_as_json() {
        let (db, user, channel) = seed();
        let message = db
            .insert_message(&NewMessage::text(channel.id, user.id, "react to me"))
            .unwrap();
        assert!(message.reactions.is_empty());

        let mut reactions = Reactions::default();
        reactions.toggle("🔥", user.id);
        let updated = db.update_reactions(message.id, &reactions).unwrap().unwrap();
        assert!(updated.reactions.has_reacted("🔥", user.id));
    }

    #[test]
    fn duplicate_dm_names_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let name = cordial_types::models::Channel::dm_name(Uuid::new_v4(), Uuid::new_v4());
        db.insert_channel(&NewChannel::direct(&name)).unwrap();
        assert!(db.insert_channel(&NewChannel::direct(&name)).is_err());
    }

    #[test]
    fn user_patch_only_touches_given_fields() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .insert_user(&NewUser::new("bob", Some("hash".into())))
            .unwrap();
        let now = Utc::now();

        let patch = UserPatch {
            status: Some(Status::Online),
            last_seen_at: Some(now),
            ..Default::default()
        };
        let updated = db.update_user(user.id, &patch).unwrap().unwrap();
        assert_eq!(updated.username, "bob");
        assert_eq!(updated.password_hash.as_deref(), Some("hash"));
        assert_eq!(updated.status, Some(Status::Online));
        assert_eq!(updated.last_seen_at.map(|t| ts(&t)), Some(ts(&now)));
    }

    #[test]
    fn touch_channel_only_moves_forward() {
        let (db, _, channel) = seed();
        let later = Utc::now();
        let earlier = later - Duration::minutes(10);

        db.touch_channel(channel.id, later).unwrap();
        let touched = db.touch_channel(channel.id, earlier).unwrap().unwrap();
        assert_eq!(touched.last_message_at.map(|t| ts(&t)), Some(ts(&later)));
    }

    #[test]
    fn channel_read_upsert_overwrites() {
        let (db, user, channel) = seed();
        let first = Utc::now() - Duration::hours(1);
        let second = Utc::now();

        for at in [first, second] {
            db.upsert_channel_read(&ChannelRead {
                user_id: user.id,
                channel_id: channel.id,
                last_read_at: at,
            })
            .unwrap();
        }

        let reads = db.channel_reads(user.id).unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(ts(&reads[0].last_read_at), ts(&second));
    }

    #[test]
    fn dm_channels_are_found_by_participant() {
        let db = Database::open_in_memory().unwrap();
        let (me, friend, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        db.insert_channel(&NewChannel::direct(&Channel::dm_name(me, friend)))
            .unwrap();
        db.insert_channel(&NewChannel::direct(&Channel::dm_name(friend, stranger)))
            .unwrap();

        let mine = db.dm_channels_for(me).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].dm_peer(me), Some(friend));
        assert_eq!(db.dm_channels_for(friend).unwrap().len(), 2);
    }
}
