use tracing::warn;

use cordial_api::SharedBackend;
use cordial_types::events::{ChangeEvent, ChangeFilter, Table};

use crate::error::{ClientError, ClientResult};

pub const MESSAGE_KEY: &str = "announcement_message";
pub const ACTIVE_KEY: &str = "announcement_active";

/// Site-wide banner stored in two config rows.
pub struct AnnouncementBar {
    backend: SharedBackend,
    is_admin: bool,
    message: String,
    active: bool,
    dismissed: bool,
}

impl AnnouncementBar {
    pub fn new(backend: SharedBackend, is_admin: bool) -> Self {
        Self {
            backend,
            is_admin,
            message: String::new(),
            active: false,
            dismissed: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter::table(Table::AppConfig)
    }

    /// Admins always see the bar so they can edit it; everyone else sees it
    /// while it is active and they have not dismissed it this session.
    pub fn visible(&self) -> bool {
        self.is_admin || (self.active && !self.dismissed)
    }

    pub async fn load(&mut self) -> ClientResult<()> {
        if let Some(message) = self.backend.config_value(MESSAGE_KEY).await? {
            self.message = message;
        }
        if let Some(active) = self.backend.config_value(ACTIVE_KEY).await? {
            self.active = active == "true";
        }
        Ok(())
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::AppConfig {
            return false;
        }
        let (Some(key), Some(value)) = (event.column("key"), event.column("value")) else {
            warn!("Config change without key/value");
            return false;
        };

        match key.as_str() {
            MESSAGE_KEY => self.message = value,
            ACTIVE_KEY => self.active = value == "true",
            _ => return false,
        }
        true
    }

    pub async fn publish(&mut self, text: &str) -> ClientResult<()> {
        self.require_admin()?;
        self.backend.upsert_config(MESSAGE_KEY, text).await?;
        self.backend.upsert_config(ACTIVE_KEY, "true").await?;
        self.message = text.to_string();
        self.active = true;
        Ok(())
    }

    pub async fn disable(&mut self) -> ClientResult<()> {
        self.require_admin()?;
        self.backend.upsert_config(ACTIVE_KEY, "false").await?;
        self.active = false;
        Ok(())
    }

    /// Hides the bar until the next session.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    fn require_admin(&self) -> ClientResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ClientError::NotAdmin)
        }
    }
}
