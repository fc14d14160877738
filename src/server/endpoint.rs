//! HTTP viewer endpoint
//!
//! Each GET joins the relay session and streams the multipart body back. A
//! failed upstream start answers `502 Bad Gateway` instead of leaving the
//! request hanging.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::relay::viewer::{CACHE_CONTROL, EXPIRES, PRAGMA};
use crate::relay::RelaySession;
use crate::upstream::{HttpConnector, SourceConnector};

/// Serves one relay session over HTTP
pub struct ProxyEndpoint<C: SourceConnector = HttpConnector> {
    session: Arc<RelaySession<C>>,
}

impl<C: SourceConnector> Clone for ProxyEndpoint<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<C: SourceConnector> ProxyEndpoint<C> {
    /// Create an endpoint for a session
    pub fn new(session: Arc<RelaySession<C>>) -> Self {
        Self { session }
    }

    /// The relay session behind this endpoint
    pub fn session(&self) -> &Arc<RelaySession<C>> {
        &self.session
    }

    /// Answer one viewer request
    pub async fn handle(&self) -> Response {
        let viewer = match self.session.join().await {
            Ok(viewer) => viewer,
            Err(e) => {
                tracing::warn!(
                    url = %self.session.source_url(),
                    error = %e,
                    "Viewer request failed"
                );
                return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
            }
        };

        tracing::debug!(viewer = viewer.id(), "Streaming to viewer");

        let content_type = viewer.content_type();
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::EXPIRES, EXPIRES)
            .header(header::CACHE_CONTROL, CACHE_CONTROL)
            .header(header::PRAGMA, PRAGMA)
            .body(Body::from_stream(viewer))
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build viewer response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })
    }

    /// Mount the endpoint at `path`
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, get(serve::<C>)).with_state(self)
    }
}

async fn serve<C: SourceConnector>(State(endpoint): State<ProxyEndpoint<C>>) -> Response {
    endpoint.handle().await
}
