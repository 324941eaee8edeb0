use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use cordial_db::Database;
use cordial_gateway::{Dispatcher, Subscription};
use cordial_types::api::{NewChannel, NewMember, NewMessage, NewServer, NewUser, UserPatch};
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::{
    Channel, ChannelRead, Message, Reactions, Server, ServerMember, User,
};

use crate::backend::Backend;
use crate::error::BackendResult;

/// Joined columns that never appear in change-feed rows.
const MESSAGE_JOINS: &[&str] = &["users", "reply_to_message"];
const MEMBER_JOINS: &[&str] = &["users"];

/// SQLite-backed store with an in-process change feed.
///
/// Every write publishes the written row, so views behave the same as
/// against the hosted tables.
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn open(path: &Path) -> BackendResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> BackendResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn run<F, T>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }

    fn publish<T: Serialize>(&self, table: Table, kind: ChangeKind, row: &T, joins: &[&str]) {
        let mut record = match serde_json::to_value(row) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode {} change: {}", table, e);
                return;
            }
        };
        if let Value::Object(map) = &mut record {
            for join in joins {
                map.remove(*join);
            }
        }

        self.dispatcher.publish(ChangeEvent {
            table,
            kind,
            record: Some(record),
            old_record: None,
        });
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn user_by_id(&self, id: Uuid) -> BackendResult<Option<User>> {
        self.run(move |db| db.user_by_id(id)).await
    }

    async fn user_by_username(&self, username: &str) -> BackendResult<Option<User>> {
        let username = username.to_string();
        self.run(move |db| db.user_by_username(&username)).await
    }

    async fn list_users(&self) -> BackendResult<Vec<User>> {
        self.run(|db| db.list_users()).await
    }

    async fn insert_user(&self, user: &NewUser) -> BackendResult<User> {
        let new = user.clone();
        let user = self.run(move |db| db.insert_user(&new)).await?;
        self.publish(Table::Users, ChangeKind::Insert, &user, &["password"]);
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> BackendResult<Option<User>> {
        let patch = patch.clone();
        let user = self.run(move |db| db.update_user(id, &patch)).await?;
        if let Some(user) = &user {
            self.publish(Table::Users, ChangeKind::Update, user, &["password"]);
        }
        Ok(user)
    }

    async fn list_servers(&self) -> BackendResult<Vec<Server>> {
        self.run(|db| db.list_servers()).await
    }

    async fn servers_by_ids(&self, ids: &[Uuid]) -> BackendResult<Vec<Server>> {
        let ids = ids.to_vec();
        self.run(move |db| db.servers_by_ids(&ids)).await
    }

    async fn insert_server(&self, server: &NewServer) -> BackendResult<Server> {
        let new = server.clone();
        let server = self.run(move |db| db.insert_server(&new)).await?;
        self.publish(Table::Servers, ChangeKind::Insert, &server, &[]);
        Ok(server)
    }

    async fn membership(&self, server_id: Uuid, user_id: Uuid) -> BackendResult<Option<ServerMember>> {
        self.run(move |db| db.membership(server_id, user_id)).await
    }

    async fn insert_member(&self, member: &NewMember) -> BackendResult<ServerMember> {
        let new = member.clone();
        let member = self.run(move |db| db.insert_member(&new)).await?;
        self.publish(Table::ServerMembers, ChangeKind::Insert, &member, MEMBER_JOINS);
        Ok(member)
    }

    async fn list_members(&self, server_id: Uuid) -> BackendResult<Vec<ServerMember>> {
        self.run(move |db| db.list_members(server_id)).await
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> BackendResult<Vec<ServerMember>> {
        self.run(move |db| db.memberships_for_user(user_id)).await
    }

    async fn list_channels(&self, server_id: Uuid) -> BackendResult<Vec<Channel>> {
        self.run(move |db| db.list_channels(server_id)).await
    }

    async fn channels_in_servers(&self, server_ids: &[Uuid]) -> BackendResult<Vec<Channel>> {
        let ids = server_ids.to_vec();
        self.run(move |db| db.channels_in_servers(&ids)).await
    }

    async fn dm_channels_for(&self, user_id: Uuid) -> BackendResult<Vec<Channel>> {
        self.run(move |db| db.dm_channels_for(user_id)).await
    }

    async fn channel_by_name(&self, name: &str) -> BackendResult<Option<Channel>> {
        let name = name.to_string();
        self.run(move |db| db.channel_by_name(&name)).await
    }

    async fn insert_channel(&self, channel: &NewChannel) -> BackendResult<Channel> {
        let new = channel.clone();
        let channel = self.run(move |db| db.insert_channel(&new)).await?;
        self.publish(Table::Channels, ChangeKind::Insert, &channel, &[]);
        Ok(channel)
    }

    async fn touch_channel(&self, id: Uuid, at: DateTime<Utc>) -> BackendResult<()> {
        let channel = self.run(move |db| db.touch_channel(id, at)).await?;
        if let Some(channel) = &channel {
            self.publish(Table::Channels, ChangeKind::Update, channel, &[]);
        }
        Ok(())
    }

    async fn list_messages(&self, channel_id: Uuid, limit: u32) -> BackendResult<Vec<Message>> {
        self.run(move |db| db.list_messages(channel_id, limit)).await
    }

    async fn message_by_id(&self, id: Uuid) -> BackendResult<Option<Message>> {
        self.run(move |db| db.message_by_id(id)).await
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let new = message.clone();
        let message = self.run(move |db| db.insert_message(&new)).await?;
        self.publish(Table::Messages, ChangeKind::Insert, &message, MESSAGE_JOINS);
        Ok(message)
    }

    async fn update_reactions(&self, id: Uuid, reactions: &Reactions) -> BackendResult<()> {
        let reactions = reactions.clone();
        let message = self.run(move |db| db.update_reactions(id, &reactions)).await?;
        if let Some(message) = &message {
            self.publish(Table::Messages, ChangeKind::Update, message, MESSAGE_JOINS);
        }
        Ok(())
    }

    async fn channel_reads(&self, user_id: Uuid) -> BackendResult<Vec<ChannelRead>> {
        self.run(move |db| db.channel_reads(user_id)).await
    }

    async fn upsert_channel_read(&self, read: &ChannelRead) -> BackendResult<()> {
        let row = read.clone();
        self.run(move |db| db.upsert_channel_read(&row)).await?;
        self.publish(Table::ChannelReads, ChangeKind::Update, read, &[]);
        Ok(())
    }

    async fn config_value(&self, key: &str) -> BackendResult<Option<String>> {
        let key = key.to_string();
        self.run(move |db| db.config_value(&key)).await
    }

    async fn upsert_config(&self, key: &str, value: &str) -> BackendResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        let (existed, entry) = self
            .run(move |db| {
                let existed = db.config_value(&key)?.is_some();
                Ok((existed, db.upsert_config(&key, &value)?))
            })
            .await?;
        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.publish(Table::AppConfig, kind, &entry, &[]);
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> BackendResult<Subscription> {
        Ok(self.dispatcher.subscribe(filter))
    }
}
