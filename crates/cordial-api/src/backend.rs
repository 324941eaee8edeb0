use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use cordial_gateway::Subscription;
use cordial_types::api::{NewChannel, NewMember, NewMessage, NewServer, NewUser, UserPatch};
use cordial_types::events::ChangeFilter;
use cordial_types::models::{
    Channel, ChannelRead, Message, Reactions, Server, ServerMember, User,
};

use crate::error::BackendResult;

/// Typed access to the remote tables plus their change feed.
///
/// Reads return rows with the joins the views need already embedded
/// (message author, reply preview, member user). Change events carry raw
/// rows without joins.
#[async_trait]
pub trait Backend: Send + Sync {
    // -- Users --
    async fn user_by_id(&self, id: Uuid) -> BackendResult<Option<User>>;
    async fn user_by_username(&self, username: &str) -> BackendResult<Option<User>>;
    async fn list_users(&self) -> BackendResult<Vec<User>>;
    async fn insert_user(&self, user: &NewUser) -> BackendResult<User>;
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> BackendResult<Option<User>>;

    // -- Servers --
    /// All servers, oldest first.
    async fn list_servers(&self) -> BackendResult<Vec<Server>>;
    async fn servers_by_ids(&self, ids: &[Uuid]) -> BackendResult<Vec<Server>>;
    async fn insert_server(&self, server: &NewServer) -> BackendResult<Server>;

    // -- Members --
    async fn membership(&self, server_id: Uuid, user_id: Uuid) -> BackendResult<Option<ServerMember>>;
    async fn insert_member(&self, member: &NewMember) -> BackendResult<ServerMember>;
    async fn list_members(&self, server_id: Uuid) -> BackendResult<Vec<ServerMember>>;
    async fn memberships_for_user(&self, user_id: Uuid) -> BackendResult<Vec<ServerMember>>;

    // -- Channels --
    /// Channels of one server, oldest first.
    async fn list_channels(&self, server_id: Uuid) -> BackendResult<Vec<Channel>>;
    async fn channels_in_servers(&self, server_ids: &[Uuid]) -> BackendResult<Vec<Channel>>;
    async fn dm_channels_for(&self, user_id: Uuid) -> BackendResult<Vec<Channel>>;
    async fn channel_by_name(&self, name: &str) -> BackendResult<Option<Channel>>;
    async fn insert_channel(&self, channel: &NewChannel) -> BackendResult<Channel>;
    /// Moves the channel's `last_message_at` forward to `at`.
    async fn touch_channel(&self, id: Uuid, at: DateTime<Utc>) -> BackendResult<()>;

    // -- Messages --
    /// The newest `limit` messages, returned oldest first.
    async fn list_messages(&self, channel_id: Uuid, limit: u32) -> BackendResult<Vec<Message>>;
    async fn message_by_id(&self, id: Uuid) -> BackendResult<Option<Message>>;
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message>;
    async fn update_reactions(&self, id: Uuid, reactions: &Reactions) -> BackendResult<()>;

    // -- Read state --
    async fn channel_reads(&self, user_id: Uuid) -> BackendResult<Vec<ChannelRead>>;
    async fn upsert_channel_read(&self, read: &ChannelRead) -> BackendResult<()>;

    // -- App config --
    async fn config_value(&self, key: &str) -> BackendResult<Option<String>>;
    async fn upsert_config(&self, key: &str, value: &str) -> BackendResult<()>;

    // -- Realtime --
    async fn subscribe(&self, filter: ChangeFilter) -> BackendResult<Subscription>;
}

pub type SharedBackend = Arc<dyn Backend>;
