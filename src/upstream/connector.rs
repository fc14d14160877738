//! HTTP upstream connector
//!
//! Opens the source stream, answering one Digest challenge if the source asks
//! for credentials:
//!
//! ```text
//! Relay                                    Camera
//!   |                                        |
//!   |------- GET (no credentials) --------->|
//!   |<------ 401 + WWW-Authenticate ---------|   Unauthenticated -> ChallengeReceived
//!   |                                        |
//!   |------- GET + Authorization: Digest -->|
//!   |<------ 200 multipart/x-mixed-replace --|   ChallengeReceived -> Streaming
//!   |<====== body chunks ===================|
//! ```
//!
//! A second 401, any other non-2xx status, or a missing boundary moves the
//! attempt to `Failed`. There is no retry.

use std::future::Future;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode, Url};

use crate::auth::{authorize, cnonce_from_time, DigestChallenge};
use crate::error::{AuthError, ParseError, Result, UpstreamError};
use crate::multipart::extract_boundary;
use crate::server::config::{RelayConfig, SourceConfig};

/// An open upstream body together with its multipart boundary
pub struct UpstreamStream {
    /// Boundary token from the response Content-Type
    pub boundary: String,

    /// Raw body chunks
    pub body: BoxStream<'static, std::result::Result<Bytes, UpstreamError>>,
}

impl UpstreamStream {
    /// Wrap an arbitrary byte stream
    pub fn new<S>(boundary: impl Into<String>, body: S) -> Self
    where
        S: futures::Stream<Item = std::result::Result<Bytes, UpstreamError>> + Send + 'static,
    {
        Self {
            boundary: boundary.into(),
            body: body.boxed(),
        }
    }
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

/// Something that can open the upstream byte stream for a relay session
pub trait SourceConnector: Send + Sync + 'static {
    /// Source URL, used in logs and error notifications
    fn source_url(&self) -> &str;

    /// Open a new upstream connection
    fn connect(&self) -> impl Future<Output = Result<UpstreamStream>> + Send;
}

/// Phase of a single connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    /// First request sent without credentials
    Unauthenticated,
    /// Source sent a Digest challenge; retrying once with credentials
    ChallengeReceived,
    /// Source accepted the request; body is flowing
    Streaming,
    /// Attempt is over
    Failed,
}

impl ConnectPhase {
    /// Phase after receiving a response with `status`
    pub fn on_status(self, status: StatusCode, has_credentials: bool) -> Self {
        match self {
            ConnectPhase::Streaming | ConnectPhase::Failed => self,
            _ if status.is_success() => ConnectPhase::Streaming,
            ConnectPhase::Unauthenticated
                if status == StatusCode::UNAUTHORIZED && has_credentials =>
            {
                ConnectPhase::ChallengeReceived
            }
            _ => ConnectPhase::Failed,
        }
    }
}

/// Connects to an HTTP MJPEG source
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
    url: Url,
    source: SourceConfig,
    config: RelayConfig,
}

impl HttpConnector {
    /// Create a connector for the configured source
    pub fn new(config: RelayConfig) -> Result<Self> {
        let url = config.validate()?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(UpstreamError::Request)?;

        Ok(Self {
            client,
            url,
            source: config.source.clone(),
            config,
        })
    }

    /// Request target used as the Digest `uri` (path plus query)
    pub fn digest_uri(&self) -> String {
        request_target(&self.url)
    }

    async fn handshake(&self) -> Result<UpstreamStream> {
        let mut phase = ConnectPhase::Unauthenticated;
        let mut authorization: Option<String> = None;

        loop {
            let response = self.send(authorization.as_deref()).await?;
            let status = response.status();
            let next = phase.on_status(status, self.source.has_credentials());

            tracing::debug!(
                url = %self.url,
                status = %status,
                from = ?phase,
                to = ?next,
                "Upstream response"
            );
            phase = next;

            match phase {
                ConnectPhase::ChallengeReceived => {
                    let challenge = select_challenge(&response);
                    // Single-connection sources need the first response gone
                    drop(response);

                    let challenge = challenge.ok_or(UpstreamError::MissingChallenge)??;
                    authorization = Some(self.authorization(&challenge));
                }
                ConnectPhase::Streaming => return self.open(response),
                ConnectPhase::Unauthenticated | ConnectPhase::Failed => {
                    if status == StatusCode::UNAUTHORIZED {
                        return Err(UpstreamError::Unauthorized.into());
                    }
                    return Err(UpstreamError::Status(status).into());
                }
            }
        }
    }

    async fn send(&self, authorization: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(self.url.clone());
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        Ok(request.send().await.map_err(UpstreamError::Request)?)
    }

    fn authorization(&self, challenge: &DigestChallenge) -> String {
        let username = self.source.username.as_deref().unwrap_or_default();
        let password = self.source.password.as_deref().unwrap_or_default();
        authorize(
            challenge,
            "GET",
            &self.digest_uri(),
            username,
            password,
            &cnonce_from_time(),
        )
    }

    fn open(&self, response: Response) -> Result<UpstreamStream> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ParseError::MissingBoundary(String::new()))?;
        let boundary = extract_boundary(content_type)?;

        tracing::info!(url = %self.url, boundary = %boundary, "Upstream streaming");

        let body = response
            .bytes_stream()
            .map_err(|e| UpstreamError::Read(Box::new(e)));
        Ok(UpstreamStream::new(boundary, body))
    }
}

impl SourceConnector for HttpConnector {
    fn source_url(&self) -> &str {
        &self.source.url
    }

    async fn connect(&self) -> Result<UpstreamStream> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout).into()),
        }
    }
}

/// Pick the Digest challenge among possibly several `WWW-Authenticate`
/// headers; with no Digest offer, the first header decides the error.
fn select_challenge(
    response: &Response,
) -> Option<std::result::Result<DigestChallenge, AuthError>> {
    let offers: Vec<&str> = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let digest = offers.iter().find(|offer| {
        offer
            .trim_start()
            .get(..6)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
    });

    digest.or(offers.first()).map(|offer| DigestChallenge::parse(offer))
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_direct_success() {
        let phase = ConnectPhase::Unauthenticated.on_status(StatusCode::OK, false);
        assert_eq!(phase, ConnectPhase::Streaming);
    }

    #[test]
    fn test_phase_challenge_then_success() {
        let phase = ConnectPhase::Unauthenticated.on_status(StatusCode::UNAUTHORIZED, true);
        assert_eq!(phase, ConnectPhase::ChallengeReceived);

        let phase = phase.on_status(StatusCode::OK, true);
        assert_eq!(phase, ConnectPhase::Streaming);
    }

    #[test]
    fn test_phase_second_challenge_fails() {
        let phase = ConnectPhase::ChallengeReceived.on_status(StatusCode::UNAUTHORIZED, true);
        assert_eq!(phase, ConnectPhase::Failed);
    }

    #[test]
    fn test_phase_challenge_without_credentials_fails() {
        let phase = ConnectPhase::Unauthenticated.on_status(StatusCode::UNAUTHORIZED, false);
        assert_eq!(phase, ConnectPhase::Failed);
    }

    #[test]
    fn test_phase_other_status_fails() {
        let phase = ConnectPhase::Unauthenticated.on_status(StatusCode::NOT_FOUND, true);
        assert_eq!(phase, ConnectPhase::Failed);
    }

    #[test]
    fn test_phase_failed_is_absorbing() {
        let phase = ConnectPhase::Failed.on_status(StatusCode::OK, true);
        assert_eq!(phase, ConnectPhase::Failed);
    }

    #[test]
    fn test_digest_uri_includes_query() {
        let config = RelayConfig::new(SourceConfig::new(
            "http://10.0.0.5:8080/axis-cgi/mjpg/video.cgi?camera=1&resolution=1024x768",
        ));
        let connector = HttpConnector::new(config).unwrap();

        assert_eq!(
            connector.digest_uri(),
            "/axis-cgi/mjpg/video.cgi?camera=1&resolution=1024x768"
        );
        assert_eq!(
            connector.source_url(),
            "http://10.0.0.5:8080/axis-cgi/mjpg/video.cgi?camera=1&resolution=1024x768"
        );
    }

    #[test]
    fn test_invalid_source_rejected() {
        let config = RelayConfig::new(SourceConfig::new("ftp://cam/video"));
        assert!(HttpConnector::new(config).is_err());
    }
}
