//! Receive direction error types.

use thiserror::Error;

/// Result type alias using [`ReceiveError`].
pub type Result<T> = std::result::Result<T, ReceiveError>;

/// Errors raised while talking to ThingsBoard.
///
/// All of these end the current session. The connection manager logs
/// them and reconnects after the fixed delay.
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// Non-success status from one of the token exchange steps.
    #[error("requesting {step} tokens failed: {status} {message}")]
    Auth {
        step: &'static str,
        status: u16,
        message: String,
    },

    /// Non-success status from a REST request other than authentication.
    #[error("{request} failed: {status} {message}")]
    Request {
        request: &'static str,
        status: u16,
        message: String,
    },

    /// HTTP transport error (resolution, refusal, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Websocket closed by the server.
    #[error("websocket closed")]
    Closed,

    /// Keepalive ping went unanswered.
    #[error("ping timed out after {0} s")]
    PingTimeout(u64),

    /// Malformed JSON from the server.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message() {
        let err = ReceiveError::Auth {
            step: "login",
            status: 401,
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "requesting login tokens failed: 401 Authentication failed"
        );
    }
}
