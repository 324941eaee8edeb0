use tracing::debug;
use uuid::Uuid;

use crate::chat::ChatView;
use crate::error::{ClientError, ClientResult};

impl ChatView {
    /// Adds or removes the user's `emoji` reaction on a message.
    ///
    /// The map is re-read before toggling so other users' reactions are kept,
    /// but concurrent toggles still race: the last write wins. Returns `true`
    /// when the reaction was added.
    pub async fn toggle_reaction(
        &mut self,
        message_id: Uuid,
        emoji: &str,
        user_id: Uuid,
    ) -> ClientResult<bool> {
        let mut reactions = match self.backend.message_by_id(message_id).await? {
            Some(fresh) => fresh.reactions,
            None => return Err(ClientError::UnknownMessage(message_id)),
        };

        let added = reactions.toggle(emoji, user_id);
        self.backend.update_reactions(message_id, &reactions).await?;
        debug!(
            "{} reaction {} on {}",
            if added { "Added" } else { "Removed" },
            emoji,
            message_id
        );

        if let Some(local) = self.messages.iter_mut().find(|m| m.id == message_id) {
            local.reactions = reactions;
        }
        Ok(added)
    }
}
