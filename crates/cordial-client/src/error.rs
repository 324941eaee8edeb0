use thiserror::Error;
use uuid::Uuid;

use cordial_api::BackendError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("not signed in")]
    NotSignedIn,

    #[error("incorrect password")]
    WrongPassword,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("username is required")]
    EmptyUsername,

    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("you can change your username again in {days_left} days")]
    UsernameCooldown { days_left: i64 },

    #[error("passwords don't match")]
    PasswordMismatch,

    #[error("password must be at least {0} characters")]
    PasswordTooShort(usize),

    #[error("cannot open a direct message with yourself")]
    SelfDirectMessage,

    #[error("no user named '{0}'")]
    UnknownUser(String),

    #[error("message {0} not found")]
    UnknownMessage(Uuid),

    #[error("name is required")]
    EmptyName,

    #[error("no {0} selected")]
    NothingSelected(&'static str),

    #[error("only admins can change the announcement")]
    NotAdmin,

    #[error("session file: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("session file: {0}")]
    SessionFormat(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
