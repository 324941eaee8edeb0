use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cordial_api::SharedBackend;
use cordial_types::api::{NewUser, UserPatch};
use cordial_types::models::{Status, User};

use crate::auth::{hash_password, verify_password};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    user_id: Option<Uuid>,
}

/// The one piece of client state that survives restarts: who is signed in.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> ClientResult<Option<Uuid>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str::<StoredSession>(&text)?.user_id),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, user_id: Uuid) -> ClientResult<()> {
        let text = serde_json::to_string(&StoredSession {
            user_id: Some(user_id),
        })?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }

    pub async fn clear(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

pub struct Session {
    backend: SharedBackend,
    store: SessionStore,
    user: Option<User>,
}

impl Session {
    pub fn new(backend: SharedBackend, store: SessionStore) -> Self {
        Self {
            backend,
            store,
            user: None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn require_user(&self) -> ClientResult<&User> {
        self.user.as_ref().ok_or(ClientError::NotSignedIn)
    }

    /// Replaces the cached user after a profile change.
    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    /// Signs back in as the stored user. A stored id with no user behind it
    /// is cleared.
    pub async fn restore(&mut self) -> ClientResult<Option<&User>> {
        let Some(user_id) = self.store.load().await? else {
            return Ok(None);
        };

        match self.backend.user_by_id(user_id).await? {
            Some(user) => {
                info!("Restored session for {}", user.username);
                self.user = Some(user);
                Ok(self.user.as_ref())
            }
            None => {
                warn!("Stored user {} no longer exists, clearing session", user_id);
                self.store.clear().await?;
                Ok(None)
            }
        }
    }

    /// Signs in as `username`, creating the user when it does not exist yet.
    pub async fn enter(&mut self, username: &str, password: Option<&str>) -> ClientResult<&User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::EmptyUsername);
        }
        let password = password.filter(|p| !p.is_empty());

        let user = match self.backend.user_by_username(username).await? {
            Some(existing) => {
                if let Some(hash) = &existing.password_hash {
                    match password {
                        Some(p) if verify_password(p, hash) => {}
                        _ => return Err(ClientError::WrongPassword),
                    }
                }
                existing
            }
            None => {
                let password_hash = password.map(hash_password).transpose()?;
                let user = self
                    .backend
                    .insert_user(&NewUser::new(username, password_hash))
                    .await?;
                info!("Created user {}", user.username);
                user
            }
        };

        self.store.save(user.id).await?;
        Ok(self.user.insert(user))
    }

    pub async fn logout(&mut self) -> ClientResult<()> {
        if let Some(user) = self.user.take() {
            let patch = UserPatch {
                status: Some(Status::Offline),
                ..Default::default()
            };
            if let Err(e) = self.backend.update_user(user.id, &patch).await {
                warn!("Failed to mark {} offline: {}", user.username, e);
            }
        }
        self.store.clear().await
    }
}
