use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid realtime url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported url scheme: {0}")]
    Scheme(String),

    #[error("realtime connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("realtime connection closed")]
    Closed,
}
