use chrono::{DateTime, Utc};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::ServerMember;

use crate::error::ClientResult;

pub struct MemberList {
    backend: SharedBackend,
    server_id: Option<Uuid>,
    members: Vec<ServerMember>,
}

impl MemberList {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            server_id: None,
            members: Vec::new(),
        }
    }

    pub fn members(&self) -> &[ServerMember] {
        &self.members
    }

    /// Membership changes for the loaded server.
    pub fn member_filter(&self) -> Option<ChangeFilter> {
        self.server_id
            .map(|id| ChangeFilter::table(Table::ServerMembers).eq("server_id", id))
    }

    /// Profile and presence updates; narrowed to listed members in `apply`.
    pub fn user_filter(&self) -> ChangeFilter {
        ChangeFilter::table(Table::Users).only(ChangeKind::Update)
    }

    pub async fn load(&mut self, server_id: Uuid) -> ClientResult<()> {
        self.members = self.backend.list_members(server_id).await?;
        self.server_id = Some(server_id);
        Ok(())
    }

    /// Whether the event touches this list. Member rows carry joined user
    /// data, so any relevant change is handled with a full re-fetch.
    pub fn affects(&self, event: &ChangeEvent) -> bool {
        let Some(server_id) = self.server_id else {
            return false;
        };
        match event.table {
            Table::ServerMembers => {
                event.column("server_id").as_deref() == Some(server_id.to_string().as_str())
            }
            Table::Users => event
                .row_id()
                .is_some_and(|id| self.members.iter().any(|m| m.user_id == id)),
            _ => false,
        }
    }

    /// Re-fetches the list when the event affects it. Returns `true` then.
    pub async fn apply(&mut self, event: &ChangeEvent) -> ClientResult<bool> {
        if !self.affects(event) {
            return Ok(false);
        }
        if let Some(server_id) = self.server_id {
            self.load(server_id).await?;
        }
        Ok(true)
    }

    pub fn is_online(member: &ServerMember, now: DateTime<Utc>) -> bool {
        member.user.as_ref().is_some_and(|u| u.is_online(now))
    }

    /// Members counted as online at `now`.
    pub fn online(&self, now: DateTime<Utc>) -> usize {
        self.members
            .iter()
            .filter(|m| Self::is_online(m, now))
            .count()
    }
}
