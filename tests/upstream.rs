//! HTTP connector and viewer endpoint against a mock camera

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mjpeg_relay::error::{ParseError, UpstreamError};
use mjpeg_relay::{
    Error, HttpConnector, ProxyEndpoint, RelayConfig, RelaySession, SourceConfig,
    SourceConnector, UpstreamStream,
};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const MULTIPART: &str = "multipart/x-mixed-replace; boundary=myboundary";
const CHALLENGE: &str = r#"Digest realm="IP Camera", nonce="4d3f2a", qop="auth", opaque="c0ffee""#;
const BODY: &[u8] = b"--myboundary\r\nContent-Type: image/jpeg\r\n\r\nJPEG1--myboundary\r\nContent-Type: image/jpeg\r\n\r\nJPEG2\r\n";
const REPAIRED: &[u8] = b"--myboundary\r\nContent-Type: image/jpeg\r\n\r\nJPEG1\r\n--myboundary\r\nContent-Type: image/jpeg\r\n\r\nJPEG2\r\n";

/// Matches the Digest answer to `CHALLENGE`
struct DigestAnswer;

impl Match for DigestAnswer {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.starts_with(r#"Digest username="admin",realm="IP Camera",nonce="4d3f2a",uri="/video","#)
                    && v.contains(r#"nc=00000001"#)
                    && v.contains(r#"qop="auth""#)
                    && v.ends_with(r#",opaque="c0ffee""#)
            })
    }
}

fn stream_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(BODY.to_vec(), MULTIPART)
}

fn challenge() -> ResponseTemplate {
    ResponseTemplate::new(401).insert_header("www-authenticate", CHALLENGE)
}

fn connector(server: &MockServer, credentials: bool) -> HttpConnector {
    HttpConnector::new(config(server, credentials)).unwrap()
}

fn config(server: &MockServer, credentials: bool) -> RelayConfig {
    let mut source = SourceConfig::new(format!("{}/video", server.uri()));
    if credentials {
        source = source.credentials("admin", "secret");
    }
    RelayConfig::new(source)
}

async fn collect(mut upstream: UpstreamStream) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(chunk) = upstream.body.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    body
}

#[tokio::test]
async fn test_open_without_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video"))
        .respond_with(stream_ok())
        .expect(1)
        .mount(&server)
        .await;

    let upstream = connector(&server, false).connect().await.unwrap();

    assert_eq!(upstream.boundary, "myboundary");
    assert_eq!(collect(upstream).await, BODY);
}

#[tokio::test]
async fn test_digest_challenge_answered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video"))
        .and(DigestAnswer)
        .respond_with(stream_ok())
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/video"))
        .respond_with(challenge())
        .expect(1)
        .with_priority(2)
        .mount(&server)
        .await;

    let upstream = connector(&server, true).connect().await.unwrap();

    assert_eq!(upstream.boundary, "myboundary");
}

#[tokio::test]
async fn test_digest_picked_among_several_challenges() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(DigestAnswer)
        .respond_with(stream_ok())
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .append_header("www-authenticate", r#"Basic realm="IP Camera""#)
                .append_header("www-authenticate", CHALLENGE),
        )
        .expect(1)
        .with_priority(2)
        .mount(&server)
        .await;

    let upstream = connector(&server, true).connect().await.unwrap();

    assert_eq!(upstream.boundary, "myboundary");
}

#[tokio::test]
async fn test_second_challenge_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video"))
        .respond_with(challenge())
        .expect(2)
        .mount(&server)
        .await;

    let err = connector(&server, true).connect().await.unwrap_err();

    assert!(matches!(err, Error::Upstream(UpstreamError::Unauthorized)));
}

#[tokio::test]
async fn test_challenge_without_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(challenge())
        .expect(1)
        .mount(&server)
        .await;

    let err = connector(&server, false).connect().await.unwrap_err();

    assert!(matches!(err, Error::Upstream(UpstreamError::Unauthorized)));
}

#[tokio::test]
async fn test_challenge_header_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = connector(&server, true).connect().await.unwrap_err();

    assert!(matches!(err, Error::Upstream(UpstreamError::MissingChallenge)));
}

#[tokio::test]
async fn test_basic_challenge_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("www-authenticate", r#"Basic realm="cam""#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = connector(&server, true).connect().await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
}

#[tokio::test]
async fn test_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = connector(&server, true).connect().await.unwrap_err();

    match err {
        Error::Upstream(UpstreamError::Status(status)) => assert_eq!(status.as_u16(), 500),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_boundary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"\xff\xd8".to_vec(), "image/jpeg"))
        .mount(&server)
        .await;

    let err = connector(&server, false).connect().await.unwrap_err();

    assert!(matches!(err, Error::Parse(ParseError::MissingBoundary(_))));
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(stream_ok().set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let config = config(&server, false).connect_timeout(Duration::from_millis(100));
    let err = HttpConnector::new(config).unwrap().connect().await.unwrap_err();

    assert!(matches!(err, Error::Upstream(UpstreamError::Timeout(_))));
}

#[tokio::test]
async fn test_no_credentials_sent_without_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(stream_ok())
        .expect(1)
        .mount(&server)
        .await;

    // A source that streams straight away never sees credentials
    connector(&server, true).connect().await.unwrap();
}

async fn serve(session: Arc<RelaySession>) -> String {
    let app = ProxyEndpoint::new(session).router("/stream");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/stream", addr)
}

#[tokio::test]
async fn test_endpoint_relays_repaired_stream() {
    let camera = MockServer::start().await;
    Mock::given(method("GET"))
        .and(DigestAnswer)
        .respond_with(stream_ok())
        .with_priority(1)
        .mount(&camera)
        .await;
    Mock::given(method("GET"))
        .respond_with(challenge())
        .with_priority(2)
        .mount(&camera)
        .await;

    let session = Arc::new(RelaySession::new(config(&camera, true)).unwrap());
    let url = serve(Arc::clone(&session)).await;

    let response = reqwest::get(&url).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let headers = response.headers();
    assert_eq!(
        headers["content-type"],
        "multipart/x-mixed-replace;boundary=myboundary"
    );
    assert_eq!(headers["expires"], "Mon, 01 Jul 1980 00:00:00 GMT");
    assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(headers["pragma"], "no-cache");

    let body = tokio::time::timeout(Duration::from_secs(5), response.bytes())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&body[..], REPAIRED);
    assert_eq!(session.stats().upstream_connects, 1);
}

#[tokio::test]
async fn test_endpoint_reports_bad_gateway() {
    let camera = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&camera)
        .await;

    let session = Arc::new(RelaySession::new(config(&camera, false)).unwrap());
    let url = serve(session).await;

    let response = reqwest::get(&url).await.unwrap();

    assert_eq!(response.status().as_u16(), 502);
    assert_eq!(
        response.text().await.unwrap(),
        "upstream returned status 500 Internal Server Error"
    );
}
