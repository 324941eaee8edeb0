use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::models::{Channel, ChannelRead};

use crate::error::ClientResult;

/// Tracks which of the user's channels have messages they have not seen.
pub struct UnreadTracker {
    backend: SharedBackend,
    user_id: Uuid,
    selected: Option<Uuid>,
    unread: HashSet<Uuid>,
}

/// Unread when the channel has activity after the last read, or activity
/// and no read record at all.
pub fn has_unread(channel: &Channel, last_read_at: Option<DateTime<Utc>>) -> bool {
    match (channel.last_message_at, last_read_at) {
        (Some(latest), Some(read)) => latest > read,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl UnreadTracker {
    pub fn new(backend: SharedBackend, user_id: Uuid) -> Self {
        Self {
            backend,
            user_id,
            selected: None,
            unread: HashSet::new(),
        }
    }

    pub fn unread(&self) -> &HashSet<Uuid> {
        &self.unread
    }

    pub fn is_unread(&self, channel_id: Uuid) -> bool {
        self.unread.contains(&channel_id)
    }

    /// Recomputes the unread set from the user's server channels and DMs.
    pub async fn poll(&mut self) -> ClientResult<()> {
        let server_ids: Vec<Uuid> = self
            .backend
            .memberships_for_user(self.user_id)
            .await?
            .into_iter()
            .map(|m| m.server_id)
            .collect();

        let mut channels = self.backend.channels_in_servers(&server_ids).await?;
        channels.extend(self.backend.dm_channels_for(self.user_id).await?);

        let reads: HashMap<Uuid, DateTime<Utc>> = self
            .backend
            .channel_reads(self.user_id)
            .await?
            .into_iter()
            .map(|r| (r.channel_id, r.last_read_at))
            .collect();

        self.unread = channels
            .iter()
            .filter(|c| Some(c.id) != self.selected)
            .filter(|c| has_unread(c, reads.get(&c.id).copied()))
            .map(|c| c.id)
            .collect();
        debug!("{} unread channels", self.unread.len());
        Ok(())
    }

    /// Marks a channel as the one being viewed and records it as read now.
    ///
    /// The channel being left is stamped too, so messages seen or sent
    /// while it was open do not count against it later.
    pub async fn select(&mut self, channel_id: Uuid) -> ClientResult<()> {
        let now = Utc::now();
        if let Some(previous) = self.selected.replace(channel_id) {
            if previous != channel_id {
                self.mark_read(previous, now).await?;
            }
        }
        self.unread.remove(&channel_id);
        self.mark_read(channel_id, now).await
    }

    async fn mark_read(&self, channel_id: Uuid, at: DateTime<Utc>) -> ClientResult<()> {
        let read = ChannelRead {
            user_id: self.user_id,
            channel_id,
            last_read_at: at,
        };
        self.backend.upsert_channel_read(&read).await?;
        Ok(())
    }

    /// Polls on a fixed interval until the task is dropped.
    pub async fn run(tracker: Arc<Mutex<Self>>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            if let Err(e) = tracker.lock().await.poll().await {
                warn!("Unread poll failed: {}", e);
            }
        }
    }
}
