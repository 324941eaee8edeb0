use std::collections::HashMap;

use tracing::{info, warn};
use uuid::Uuid;

use cordial_api::Backend;
use cordial_types::api::NewMessage;
use cordial_types::models::{Channel, Message, Server};

use crate::error::ClientResult;

const FORWARD_PREFIX: &str = "**Forwarded:** ";

/// A server the user belongs to, with the channels a message can go to.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub server: Server,
    pub channels: Vec<Channel>,
}

/// Every server the user is a member of with its text channels, in two
/// bulk reads rather than one per server.
pub async fn forward_targets(backend: &dyn Backend, user_id: Uuid) -> ClientResult<Vec<ForwardTarget>> {
    let server_ids: Vec<Uuid> = backend
        .memberships_for_user(user_id)
        .await?
        .into_iter()
        .map(|m| m.server_id)
        .collect();

    let servers = backend.servers_by_ids(&server_ids).await?;
    let mut by_server: HashMap<Uuid, Vec<Channel>> = HashMap::new();
    for channel in backend.channels_in_servers(&server_ids).await? {
        if channel.is_direct() {
            continue;
        }
        if let Some(server_id) = channel.server_id {
            by_server.entry(server_id).or_default().push(channel);
        }
    }

    Ok(servers
        .into_iter()
        .map(|server| {
            let mut channels = by_server.remove(&server.id).unwrap_or_default();
            channels.sort_by(|a, b| a.name.cmp(&b.name));
            ForwardTarget { server, channels }
        })
        .collect())
}

pub fn forwarded_content(original: &str) -> String {
    format!("{}{}", FORWARD_PREFIX, original)
}

/// Re-posts a message into another channel as the given user.
pub async fn forward(
    backend: &dyn Backend,
    message: &Message,
    channel_id: Uuid,
    user_id: Uuid,
) -> ClientResult<Message> {
    let mut new = NewMessage::text(channel_id, user_id, &forwarded_content(&message.content));
    new.media_url = message.media_url.clone();
    new.media_type = message.media_type;

    let sent = backend.insert_message(&new).await?;
    if let Err(e) = backend.touch_channel(channel_id, sent.created_at).await {
        warn!("Failed to update activity for channel {}: {}", channel_id, e);
    }
    info!("Forwarded message {} to channel {}", message.id, channel_id);
    Ok(sent)
}
