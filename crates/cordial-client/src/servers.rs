use tracing::{debug, warn};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::api::{NewChannel, NewMember, NewServer};
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::Server;

use crate::error::{ClientError, ClientResult};

/// Every new server starts with this channel.
pub const DEFAULT_CHANNEL: &str = "general";

pub struct ServerList {
    backend: SharedBackend,
    servers: Vec<Server>,
    selected: Option<Uuid>,
}

impl ServerList {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            servers: Vec::new(),
            selected: None,
        }
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn selected_server(&self) -> Option<&Server> {
        let id = self.selected?;
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter::table(Table::Servers).only(ChangeKind::Insert)
    }

    /// Loads every server; picks the first one when nothing valid is selected.
    pub async fn load(&mut self) -> ClientResult<()> {
        self.servers = self.backend.list_servers().await?;

        let still_there = self
            .selected
            .is_some_and(|id| self.servers.iter().any(|s| s.id == id));
        if !still_there {
            self.selected = self.servers.first().map(|s| s.id);
        }
        Ok(())
    }

    /// Adds newly created servers. Returns `true` when the list changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::Servers || event.kind != ChangeKind::Insert {
            return false;
        }
        let server: Server = match event.record_as() {
            Ok(Some(server)) => server,
            Ok(None) => return false,
            Err(e) => {
                warn!("Undecodable server change: {}", e);
                return false;
            }
        };

        if self.servers.iter().any(|s| s.id == server.id) {
            return false;
        }
        self.servers.push(server);
        true
    }

    /// Selects a server, joining it first when the user is not a member.
    pub async fn select(&mut self, server_id: Uuid, user_id: Uuid) -> ClientResult<()> {
        if self
            .backend
            .membership(server_id, user_id)
            .await?
            .is_none()
        {
            debug!("Joining server {}", server_id);
            self.backend
                .insert_member(&NewMember::new(server_id, user_id))
                .await?;
        }
        self.selected = Some(server_id);
        Ok(())
    }

    /// Creates a server with its default channel, then selects and joins it.
    pub async fn create(&mut self, name: &str, user_id: Uuid) -> ClientResult<Server> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyName);
        }

        let server = self.backend.insert_server(&NewServer::new(name)).await?;
        if !self.servers.iter().any(|s| s.id == server.id) {
            self.servers.push(server.clone());
        }

        self.select(server.id, user_id).await?;
        self.backend
            .insert_channel(&NewChannel::in_server(server.id, DEFAULT_CHANNEL))
            .await?;
        Ok(server)
    }
}
