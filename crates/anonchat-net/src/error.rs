use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend rejected request ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend returned no row")]
    EmptyResponse,

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Invalid backend configuration: {0}")]
    Config(String),

    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime protocol error: {0}")]
    Realtime(String),

    #[error("Change subscription closed")]
    Closed,

    #[error("Injected failure for {0}")]
    Injected(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
