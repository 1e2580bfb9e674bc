use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status; `message` is the server's error text when
    /// the body carried one.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// An `error` event sent inside the stream.
    #[error("{0}")]
    Stream(String),

    #[error("chat request cancelled")]
    Cancelled,

    #[error(transparent)]
    Auth(#[from] gatelink_auth::Error),
}

impl Error {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_displays_server_text() {
        assert_eq!(Error::Stream("boom".into()).to_string(), "boom");
    }

    #[test]
    fn status_error_exposes_code() {
        let err = Error::Status {
            status: 402,
            message: "insufficient balance".into(),
        };
        assert_eq!(err.to_string(), "insufficient balance");
        assert_eq!(err.status(), Some(402));
        assert_eq!(Error::Cancelled.status(), None);
    }

    #[test]
    fn refresh_failure_surfaces_reason() {
        let err: Error = gatelink_auth::Error::Refresh("refresh failed: 401".into()).into();
        assert_eq!(err.to_string(), "refresh failed: 401");
    }
}
