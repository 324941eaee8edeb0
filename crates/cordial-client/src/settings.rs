use chrono::{DateTime, Utc};
use tracing::info;

use cordial_api::Backend;
use cordial_types::api::UserPatch;
use cordial_types::models::User;

use crate::auth::hash_password;
use crate::error::{ClientError, ClientResult};

pub const USERNAME_COOLDOWN_DAYS: i64 = 30;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Days left before the username may change again, if any. Partial days
/// do not count as elapsed.
pub fn cooldown_days_left(last_change: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    let elapsed = (now - last_change?).num_days();
    (elapsed < USERNAME_COOLDOWN_DAYS).then(|| USERNAME_COOLDOWN_DAYS - elapsed)
}

/// Renames the user. An unchanged name is a no-op that returns the user as is.
pub async fn change_username(
    backend: &dyn Backend,
    user: &User,
    new_name: &str,
    now: DateTime<Utc>,
) -> ClientResult<User> {
    let new_name = new_name.trim();
    if new_name.is_empty() {
        return Err(ClientError::EmptyUsername);
    }
    if new_name == user.username {
        return Ok(user.clone());
    }
    if let Some(days_left) = cooldown_days_left(user.last_username_change, now) {
        return Err(ClientError::UsernameCooldown { days_left });
    }
    if let Some(existing) = backend.user_by_username(new_name).await? {
        if existing.id != user.id {
            return Err(ClientError::UsernameTaken(new_name.to_string()));
        }
    }

    let patch = UserPatch {
        username: Some(new_name.to_string()),
        last_username_change: Some(now),
        ..Default::default()
    };
    let updated = backend
        .update_user(user.id, &patch)
        .await?
        .ok_or(ClientError::NotSignedIn)?;
    info!("Renamed {} to {}", user.username, updated.username);
    Ok(updated)
}

pub async fn change_password(
    backend: &dyn Backend,
    user: &User,
    new_password: &str,
    confirm: &str,
) -> ClientResult<()> {
    if new_password != confirm {
        return Err(ClientError::PasswordMismatch);
    }
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::PasswordTooShort(MIN_PASSWORD_LEN));
    }

    let patch = UserPatch {
        password_hash: Some(hash_password(new_password)?),
        ..Default::default()
    };
    backend
        .update_user(user.id, &patch)
        .await?
        .ok_or(ClientError::NotSignedIn)?;
    info!("Password updated for {}", user.username);
    Ok(())
}
