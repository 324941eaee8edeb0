use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use cordial_gateway::{RealtimeClient, Subscription};
use cordial_types::api::{NewChannel, NewMember, NewMessage, NewServer, NewUser, UserPatch};
use cordial_types::events::{ChangeFilter, Table};
use cordial_types::models::{
    Channel, ChannelRead, ConfigEntry, Message, Reactions, Server, ServerMember, User,
};

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};

const AUTHOR_COLUMNS: &str = "users(username,avatar_url,status,last_seen_at)";

const RETURN_ROWS: &str = "return=representation";
const RETURN_NONE: &str = "return=minimal";
const UPSERT: &str = "resolution=merge-duplicates,return=minimal";

fn member_select() -> String {
    format!("*,{}", AUTHOR_COLUMNS)
}

fn message_select() -> String {
    format!(
        "*,{author},reply_to_message:messages!reply_to_message_id(id,user_id,content,created_at,{author})",
        author = AUTHOR_COLUMNS
    )
}

/// Query string in the table API's filter dialect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns)
    }

    pub fn eq(self, column: &str, value: impl ToString) -> Self {
        self.param(column, &format!("eq.{}", value.to_string()))
    }

    pub fn is_in(self, column: &str, values: &[Uuid]) -> Self {
        let list = values
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.param(column, &format!("in.({})", list))
    }

    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.param(column, &format!("like.{}", pattern))
    }

    pub fn order(self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.param("order", &format!("{}.{}", column, dir))
    }

    pub fn limit(self, n: u32) -> Self {
        self.param("limit", &n.to_string())
    }

    pub fn on_conflict(self, columns: &str) -> Self {
        self.param("on_conflict", columns)
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }
}

/// The hosted table API over HTTP, with its realtime socket for changes.
pub struct RestBackend {
    http: Client,
    base: Url,
    api_key: String,
    realtime: Mutex<Option<Arc<RealtimeClient>>>,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str) -> BackendResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: Client::new(),
            base,
            api_key: api_key.to_string(),
            realtime: Mutex::new(None),
        })
    }

    pub fn table_url(&self, table: Table) -> BackendResult<Url> {
        Ok(self.base.join(&format!("rest/v1/{}", table))?)
    }

    fn request(&self, method: Method, table: Table, query: &Query) -> BackendResult<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.table_url(table)?)
            .query(query.pairs())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key))
    }

    async fn fetch<T: DeserializeOwned>(&self, table: Table, query: Query) -> BackendResult<Vec<T>> {
        let resp = self.request(Method::GET, table, &query)?.send().await?;
        read_rows(resp).await
    }

    async fn fetch_one<T: DeserializeOwned>(&self, table: Table, query: Query) -> BackendResult<Option<T>> {
        Ok(self.fetch(table, query.limit(1)).await?.into_iter().next())
    }

    async fn write<B, T>(
        &self,
        method: Method,
        table: Table,
        query: Query,
        body: &B,
        prefer: &str,
    ) -> BackendResult<Vec<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let resp = self
            .request(method, table, &query)?
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;
        read_rows(resp).await
    }

    async fn insert<B, T>(&self, table: Table, query: Query, body: &B, what: &'static str) -> BackendResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.write(Method::POST, table, query, body, RETURN_ROWS)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::Missing(what))
    }

    /// Realtime socket, reconnected when the previous one has gone away.
    async fn realtime(&self) -> BackendResult<Arc<RealtimeClient>> {
        let mut slot = self.realtime.lock().await;
        if let Some(client) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(client.clone());
        }

        info!("Opening realtime socket");
        let client = Arc::new(RealtimeClient::connect(self.base.as_str(), &self.api_key).await?);
        *slot = Some(client.clone());
        Ok(client)
    }
}

async fn read_rows<T: DeserializeOwned>(resp: Response) -> BackendResult<Vec<T>> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        debug!("Backend error {}: {}", status, body);
        return Err(remote_error(status.as_u16(), &body));
    }
    // `return=minimal` answers with an empty body.
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&body)?)
}

fn remote_error(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    BackendError::Remote { status, message }
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl Backend for RestBackend {
    async fn user_by_id(&self, id: Uuid) -> BackendResult<Option<User>> {
        self.fetch_one(Table::Users, Query::new().select("*").eq("id", id)).await
    }

    async fn user_by_username(&self, username: &str) -> BackendResult<Option<User>> {
        self.fetch_one(Table::Users, Query::new().select("*").eq("username", username))
            .await
    }

    async fn list_users(&self) -> BackendResult<Vec<User>> {
        self.fetch(Table::Users, Query::new().select("*").order("username", true))
            .await
    }

    async fn insert_user(&self, user: &NewUser) -> BackendResult<User> {
        self.insert(Table::Users, Query::new().select("*"), user, "user")
            .await
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> BackendResult<Option<User>> {
        let rows: Vec<User> = self
            .write(
                Method::PATCH,
                Table::Users,
                Query::new().select("*").eq("id", id),
                patch,
                RETURN_ROWS,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_servers(&self) -> BackendResult<Vec<Server>> {
        self.fetch(Table::Servers, Query::new().select("*").order("created_at", true))
            .await
    }

    async fn servers_by_ids(&self, ids: &[Uuid]) -> BackendResult<Vec<Server>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new()
            .select("*")
            .is_in("id", ids)
            .order("created_at", true);
        self.fetch(Table::Servers, query).await
    }

    async fn insert_server(&self, server: &NewServer) -> BackendResult<Server> {
        self.insert(Table::Servers, Query::new().select("*"), server, "server")
            .await
    }

    async fn membership(&self, server_id: Uuid, user_id: Uuid) -> BackendResult<Option<ServerMember>> {
        let query = Query::new()
            .select(&member_select())
            .eq("server_id", server_id)
            .eq("user_id", user_id);
        self.fetch_one(Table::ServerMembers, query).await
    }

    async fn insert_member(&self, member: &NewMember) -> BackendResult<ServerMember> {
        let query = Query::new().select(&member_select());
        self.insert(Table::ServerMembers, query, member, "member")
            .await
    }

    async fn list_members(&self, server_id: Uuid) -> BackendResult<Vec<ServerMember>> {
        let query = Query::new()
            .select(&member_select())
            .eq("server_id", server_id)
            .order("joined_at", true);
        self.fetch(Table::ServerMembers, query).await
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> BackendResult<Vec<ServerMember>> {
        let query = Query::new()
            .select("*")
            .eq("user_id", user_id)
            .order("joined_at", true);
        self.fetch(Table::ServerMembers, query).await
    }

    async fn list_channels(&self, server_id: Uuid) -> BackendResult<Vec<Channel>> {
        let query = Query::new()
            .select("*")
            .eq("server_id", server_id)
            .order("created_at", true);
        self.fetch(Table::Channels, query).await
    }

    async fn channels_in_servers(&self, server_ids: &[Uuid]) -> BackendResult<Vec<Channel>> {
        if server_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new()
            .select("*")
            .is_in("server_id", server_ids)
            .order("created_at", true);
        self.fetch(Table::Channels, query).await
    }

    async fn dm_channels_for(&self, user_id: Uuid) -> BackendResult<Vec<Channel>> {
        let query = Query::new()
            .select("*")
            .eq("is_dm", true)
            .like("name", &format!("*{}*", user_id))
            .order("created_at", true);
        self.fetch(Table::Channels, query).await
    }

    async fn channel_by_name(&self, name: &str) -> BackendResult<Option<Channel>> {
        let query = Query::new()
            .select("*")
            .eq("name", name)
            .order("created_at", true);
        self.fetch_one(Table::Channels, query).await
    }

    async fn insert_channel(&self, channel: &NewChannel) -> BackendResult<Channel> {
        self.insert(Table::Channels, Query::new().select("*"), channel, "channel")
            .await
    }

    async fn touch_channel(&self, id: Uuid, at: DateTime<Utc>) -> BackendResult<()> {
        // Only ever move the timestamp forward.
        let query = Query::new().eq("id", id).param(
            "or",
            &format!("(last_message_at.is.null,last_message_at.lt.{})", ts(&at)),
        );
        let _: Vec<Value> = self
            .write(
                Method::PATCH,
                Table::Channels,
                query,
                &json!({ "last_message_at": at }),
                RETURN_NONE,
            )
            .await?;
        Ok(())
    }

    async fn list_messages(&self, channel_id: Uuid, limit: u32) -> BackendResult<Vec<Message>> {
        let query = Query::new()
            .select(&message_select())
            .eq("channel_id", channel_id)
            .order("created_at", false)
            .limit(limit);
        let mut rows: Vec<Message> = self.fetch(Table::Messages, query).await?;
        rows.reverse();
        Ok(rows)
    }

    async fn message_by_id(&self, id: Uuid) -> BackendResult<Option<Message>> {
        let query = Query::new().select(&message_select()).eq("id", id);
        self.fetch_one(Table::Messages, query).await
    }

    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let query = Query::new().select(&message_select());
        self.insert(Table::Messages, query, message, "message")
            .await
    }

    async fn update_reactions(&self, id: Uuid, reactions: &Reactions) -> BackendResult<()> {
        let _: Vec<Value> = self
            .write(
                Method::PATCH,
                Table::Messages,
                Query::new().eq("id", id),
                &json!({ "reactions": reactions }),
                RETURN_NONE,
            )
            .await?;
        Ok(())
    }

    async fn channel_reads(&self, user_id: Uuid) -> BackendResult<Vec<ChannelRead>> {
        let query = Query::new().select("*").eq("user_id", user_id);
        self.fetch(Table::ChannelReads, query).await
    }

    async fn upsert_channel_read(&self, read: &ChannelRead) -> BackendResult<()> {
        let _: Vec<Value> = self
            .write(
                Method::POST,
                Table::ChannelReads,
                Query::new().on_conflict("user_id,channel_id"),
                read,
                UPSERT,
            )
            .await?;
        Ok(())
    }

    async fn config_value(&self, key: &str) -> BackendResult<Option<String>> {
        let entry: Option<ConfigEntry> = self
            .fetch_one(Table::AppConfig, Query::new().select("*").eq("key", key))
            .await?;
        Ok(entry.map(|e| e.value))
    }

    async fn upsert_config(&self, key: &str, value: &str) -> BackendResult<()> {
        let entry = ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
        };
        let _: Vec<Value> = self
            .write(
                Method::POST,
                Table::AppConfig,
                Query::new().on_conflict("key"),
                &entry,
                UPSERT,
            )
            .await?;
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> BackendResult<Subscription> {
        Ok(self.realtime().await?.subscribe(filter)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_uses_filter_dialect() {
        let a = Uuid::nil();
        let query = Query::new()
            .select("*")
            .is_in("server_id", &[a, a])
            .eq("is_dm", false)
            .order("created_at", false)
            .limit(100);

        let pairs: Vec<(&str, &str)> = query
            .pairs()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let nil = "00000000-0000-0000-0000-000000000000";
        assert_eq!(
            pairs,
            vec![
                ("select", "*"),
                ("server_id", format!("in.({nil},{nil})").as_str()),
                ("is_dm", "eq.false"),
                ("order", "created_at.desc"),
                ("limit", "100"),
            ]
        );
    }

    #[test]
    fn table_urls_sit_under_rest_prefix() {
        let backend = RestBackend::new("https://demo.example.co", "anon").unwrap();
        assert_eq!(
            backend.table_url(Table::ServerMembers).unwrap().as_str(),
            "https://demo.example.co/rest/v1/server_members"
        );

        let nested = RestBackend::new("http://localhost:8000/proxy", "anon").unwrap();
        assert_eq!(
            nested.table_url(Table::Messages).unwrap().as_str(),
            "http://localhost:8000/proxy/rest/v1/messages"
        );
    }

    #[test]
    fn remote_errors_prefer_the_body_message() {
        let err = remote_error(409, r#"{"code":"23505","message":"duplicate key value"}"#);
        assert!(matches!(
            err,
            BackendError::Remote { status: 409, ref message } if message == "duplicate key value"
        ));

        let plain = remote_error(502, "Bad Gateway");
        assert!(matches!(plain, BackendError::Remote { ref message, .. } if message == "Bad Gateway"));
    }
}
