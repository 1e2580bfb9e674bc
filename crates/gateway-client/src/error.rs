use gatelink_protocol::ErrorShape;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("gateway not connected")]
    NotConnected,

    #[error("gateway request timed out: {method} after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("gateway connection closed ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("gateway client stopped")]
    Stopped,

    /// The gateway answered with `ok: false`; displays the server's message.
    #[error("{0}")]
    Gateway(ErrorShape),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The handshake reply was not a usable `hello-ok`.
    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Error code reported by the gateway, if this is a gateway error.
    pub fn gateway_code(&self) -> Option<&str> {
        match self {
            Self::Gateway(shape) => Some(shape.code.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_displays_server_message() {
        let err = Error::Gateway(ErrorShape::new("NOT_FOUND", "job not found"));
        assert_eq!(err.to_string(), "job not found");
        assert_eq!(err.gateway_code(), Some("NOT_FOUND"));
    }

    #[test]
    fn timeout_names_method() {
        let err = Error::Timeout {
            method: "cron.list".into(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "gateway request timed out: cron.list after 250ms"
        );
        assert!(err.gateway_code().is_none());
    }

    #[test]
    fn closed_includes_code() {
        let err = Error::ConnectionClosed {
            code: 4008,
            reason: "connect failed".into(),
        };
        assert!(err.to_string().contains("4008"));
    }
}
