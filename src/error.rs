//! Error types
//!
//! Each concern of the relay has its own error enum; [`Error`] wraps them so
//! callers can use a single `Result` alias.

use reqwest::StatusCode;

/// Boxed error used for upstream read failures of arbitrary byte sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed multipart Content-Type header
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Malformed or unsupported Digest challenge
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Upstream connection failure or unexpected status
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Write to a viewer sink failed
    #[error(transparent)]
    ViewerWrite(#[from] ViewerWriteError),

    /// Invalid relay configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification of an [`Error`], carried by lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Auth,
    Upstream,
    ViewerWrite,
    Config,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_) => ErrorKind::Parse,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Upstream(_) => ErrorKind::Upstream,
            Error::ViewerWrite(_) => ErrorKind::ViewerWrite,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

/// Boundary extraction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// No `boundary=` parameter in the Content-Type header
    #[error("no multipart boundary in content type {0:?}")]
    MissingBoundary(String),

    /// `boundary=` present but the token is empty
    #[error("empty multipart boundary in content type {0:?}")]
    EmptyBoundary(String),
}

/// Digest challenge errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Challenge does not use the Digest scheme
    #[error("unsupported authentication scheme in challenge {0:?}")]
    UnsupportedScheme(String),

    /// A required challenge parameter is absent
    #[error("digest challenge is missing {0}")]
    MissingField(&'static str),

    /// Challenge does not offer `qop=auth`
    #[error("unsupported digest qop {0:?}")]
    UnsupportedQop(String),

    /// Challenge requests an algorithm other than MD5
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),
}

/// Upstream connection errors
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The HTTP request could not be sent or its headers never arrived
    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Upstream answered with a non-2xx status
    #[error("upstream returned status {0}")]
    Status(StatusCode),

    /// Upstream rejected the request after the Digest retry, or asked for
    /// credentials that are not configured
    #[error("upstream rejected credentials")]
    Unauthorized,

    /// 401 response without a `WWW-Authenticate` header
    #[error("upstream sent 401 without a challenge")]
    MissingChallenge,

    /// Connect handshake or a chunk read exceeded its deadline
    #[error("upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Reading the upstream body failed mid-stream
    #[error("upstream read failed: {0}")]
    Read(#[source] BoxError),

    /// The relay session was shut down
    #[error("relay session is shut down")]
    Shutdown,
}

/// Viewer sink write errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewerWriteError {
    /// The viewer's transport has gone away
    #[error("viewer {0} disconnected")]
    Closed(u64),

    /// The viewer is not draining its buffer fast enough
    #[error("viewer {0} buffer is full")]
    Backpressure(u64),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Source URL could not be parsed
    #[error("invalid source url {0:?}")]
    InvalidUrl(String),

    /// Source URL scheme is not http or https
    #[error("unsupported source url scheme {0:?}")]
    UnsupportedScheme(String),

    /// Viewer buffer capacity must be non-zero
    #[error("viewer buffer must hold at least one chunk")]
    ZeroViewerBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_passthrough() {
        let err: Error = ParseError::MissingBoundary("image/jpeg".into()).into();
        assert_eq!(
            err.to_string(),
            "no multipart boundary in content type \"image/jpeg\""
        );

        let err: Error = AuthError::MissingField("nonce").into();
        assert_eq!(err.to_string(), "digest challenge is missing nonce");
    }

    #[test]
    fn test_error_kind() {
        let err: Error = UpstreamError::Unauthorized.into();
        assert_eq!(err.kind(), ErrorKind::Upstream);

        let err: Error = ViewerWriteError::Closed(3).into();
        assert_eq!(err.kind(), ErrorKind::ViewerWrite);
    }

    #[test]
    fn test_upstream_status_display() {
        let err = UpstreamError::Status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "upstream returned status 503 Service Unavailable");
    }
}
