use chrono::Utc;
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::api::UserPatch;
use cordial_types::models::Status;

use crate::error::ClientResult;

/// Online status driven by window focus and a periodic heartbeat.
pub struct Presence {
    backend: SharedBackend,
    user_id: Uuid,
    focused: bool,
}

impl Presence {
    pub fn new(backend: SharedBackend, user_id: Uuid) -> Self {
        Self {
            backend,
            user_id,
            focused: false,
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub async fn focus(&mut self) -> ClientResult<()> {
        self.focused = true;
        self.stamp(Status::Online).await
    }

    pub async fn blur(&mut self) -> ClientResult<()> {
        self.focused = false;
        self.stamp(Status::Offline).await
    }

    /// Refreshes `last_seen_at` while focused; does nothing otherwise.
    pub async fn heartbeat(&mut self) -> ClientResult<()> {
        if !self.focused {
            return Ok(());
        }
        self.stamp(Status::Online).await
    }

    async fn stamp(&self, status: Status) -> ClientResult<()> {
        let patch = UserPatch {
            status: Some(status),
            last_seen_at: Some(Utc::now()),
            ..Default::default()
        };
        self.backend.update_user(self.user_id, &patch).await?;
        Ok(())
    }
}
