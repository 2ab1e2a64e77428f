use botdesk_protocol::{ErrorShape, error_codes};

/// Errors surfaced by the gateway client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("handshake timed out")]
    ConnectionTimeout,

    #[error("no protocol overlap with gateway: {0}")]
    ProtocolMismatch(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("request '{method}' timed out")]
    RequestTimeout { method: String },

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("config hash conflict: {0}")]
    ConfigHashConflict(String),

    #[error("gateway error {code}: {message}")]
    Remote {
        code: String,
        message: String,
        retryable: Option<bool>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map a remote `{code, message}` error shape onto the client taxonomy.
    pub fn from_remote(error: Option<ErrorShape>) -> Self {
        let Some(error) = error else {
            return Self::Protocol("error response without error shape".into());
        };
        match error.code.as_str() {
            error_codes::AUTH_REJECTED => Self::AuthRejected(error.message),
            error_codes::PROTOCOL_MISMATCH => Self::ProtocolMismatch(error.message),
            error_codes::CONFIG_HASH_CONFLICT => Self::ConfigHashConflict(error.message),
            _ => Self::Remote {
                code: error.code,
                message: error.message,
                retryable: error.retryable,
            },
        }
    }
}
