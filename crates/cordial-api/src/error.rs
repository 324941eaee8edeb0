use thiserror::Error;

use cordial_gateway::GatewayError;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("local store: {0:#}")]
    Local(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0} missing from response")]
    Missing(&'static str),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

pub type BackendResult<T> = Result<T, BackendError>;
