use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error("device identity: {0}")]
    Identity(String),

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("{0}")]
    Refresh(String),
}

impl Error {
    #[must_use]
    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn refresh_error_displays_reason() {
        let err = Error::Refresh("refresh failed: 401 Unauthorized".into());
        assert_eq!(err.to_string(), "refresh failed: 401 Unauthorized");
    }

    #[test]
    fn identity_error_is_prefixed() {
        let err = Error::identity("bad key length");
        assert_eq!(err.to_string(), "device identity: bad key length");
    }
}
