use tracing::{debug, warn};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::api::NewChannel;
use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use cordial_types::models::Channel;

use crate::error::{ClientError, ClientResult};

/// Channel names containing this are voice rooms and stay out of the text list.
const VOICE_MARKER: &str = "voice";

/// Lowercase, trimmed, whitespace runs collapsed to `-`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub struct ChannelList {
    backend: SharedBackend,
    server_id: Option<Uuid>,
    me: Option<Uuid>,
    channels: Vec<Channel>,
    dms: Vec<Channel>,
    selected: Option<Uuid>,
}

impl ChannelList {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            server_id: None,
            me: None,
            channels: Vec::new(),
            dms: Vec::new(),
            selected: None,
        }
    }

    pub fn server_id(&self) -> Option<Uuid> {
        self.server_id
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn text_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels
            .iter()
            .filter(|c| !c.name.to_lowercase().contains(VOICE_MARKER))
    }

    pub fn dm_channels(&self) -> &[Channel] {
        &self.dms
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn selected_channel(&self) -> Option<&Channel> {
        let id = self.selected?;
        self.channels
            .iter()
            .chain(self.dms.iter())
            .find(|c| c.id == id)
    }

    pub fn select(&mut self, channel_id: Uuid) {
        self.selected = Some(channel_id);
    }

    /// Channel changes for the loaded server.
    pub fn filter(&self) -> Option<ChangeFilter> {
        self.server_id
            .map(|id| ChangeFilter::table(Table::Channels).eq("server_id", id))
    }

    /// Loads a server's channels and selects the first text channel.
    pub async fn load(&mut self, server_id: Uuid) -> ClientResult<()> {
        self.channels = self.backend.list_channels(server_id).await?;
        self.server_id = Some(server_id);
        let first = self.text_channels().next().map(|c| c.id);
        self.selected = first;
        Ok(())
    }

    pub async fn load_dms(&mut self, user_id: Uuid) -> ClientResult<()> {
        self.dms = self
            .backend
            .dm_channels_for(user_id)
            .await?
            .into_iter()
            .filter(|c| c.dm_peer(user_id).is_some())
            .collect();
        self.me = Some(user_id);
        Ok(())
    }

    /// Direct channel changes, for DMs other people open with us.
    pub fn dm_filter(&self) -> ChangeFilter {
        ChangeFilter::table(Table::Channels).eq("is_dm", true)
    }

    /// Merges channel inserts and updates for the loaded server, and for
    /// DMs the signed-in user takes part in.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::Channels || event.kind == ChangeKind::Delete {
            return false;
        }
        let channel: Channel = match event.record_as() {
            Ok(Some(channel)) => channel,
            Ok(None) => return false,
            Err(e) => {
                warn!("Undecodable channel change: {}", e);
                return false;
            }
        };

        let list = if channel.is_direct() {
            let mine = self.me.is_some_and(|me| channel.dm_peer(me).is_some());
            if !mine {
                return false;
            }
            &mut self.dms
        } else if channel.server_id == self.server_id {
            &mut self.channels
        } else {
            return false;
        };
        upsert(list, channel)
    }

    pub async fn create(&mut self, name: &str) -> ClientResult<Channel> {
        let server_id = self.server_id.ok_or(ClientError::NothingSelected("server"))?;
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(ClientError::EmptyName);
        }

        let channel = self
            .backend
            .insert_channel(&NewChannel::in_server(server_id, &slug))
            .await?;
        upsert(&mut self.channels, channel.clone());
        self.selected = Some(channel.id);
        Ok(channel)
    }

    /// Returns the DM channel for the pair, creating it on first use, and
    /// selects it.
    pub async fn open_dm(&mut self, me: Uuid, other: Uuid) -> ClientResult<Channel> {
        if me == other {
            return Err(ClientError::SelfDirectMessage);
        }
        let name = Channel::dm_name(me, other);
        self.me = Some(me);

        let channel = match self.backend.channel_by_name(&name).await? {
            Some(existing) => existing,
            None => match self.backend.insert_channel(&NewChannel::direct(&name)).await {
                Ok(created) => {
                    debug!("Created DM channel {}", name);
                    created
                }
                // Lost a race with the other participant.
                Err(e) => self
                    .backend
                    .channel_by_name(&name)
                    .await?
                    .ok_or(ClientError::Backend(e))?,
            },
        };

        upsert(&mut self.dms, channel.clone());
        self.selected = Some(channel.id);
        Ok(channel)
    }
}

fn upsert(list: &mut Vec<Channel>, channel: Channel) -> bool {
    match list.iter_mut().find(|c| c.id == channel.id) {
        Some(existing) if *existing == channel => false,
        Some(existing) => {
            *existing = channel;
            true
        }
        None => {
            list.push(channel);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_whitespace() {
        assert_eq!(slugify("  Off Topic  "), "off-topic");
        assert_eq!(slugify("Game\t\tNight  Plans"), "game-night-plans");
        assert_eq!(slugify("   "), "");
    }
}
