//! MJPEG relay
//!
//! Re-serves one upstream `multipart/x-mixed-replace` MJPEG stream to any
//! number of HTTP viewers over a single upstream connection.
//!
//! - The upstream is opened when the first viewer arrives and closed when the
//!   last one leaves.
//! - Sources protected by HTTP Digest authentication (`qop=auth`, MD5) are
//!   answered with one authenticated retry.
//! - A delimiter not preceded by CRLF is repaired before delivery.
//! - A viewer joining mid-stream starts at the next part boundary.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mjpeg_relay::{ProxyEndpoint, RelayConfig, RelaySession, SourceConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = SourceConfig::new("http://camera.local/video").credentials("admin", "secret");
//! let session = Arc::new(RelaySession::new(RelayConfig::new(source))?);
//!
//! let app = ProxyEndpoint::new(session).router("/stream");
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod multipart;
pub mod relay;
pub mod server;
pub mod stats;
pub mod upstream;

pub use error::{Error, ErrorKind, Result};
pub use relay::{RelayEvent, RelaySession, ViewerStream};
pub use server::{ProxyEndpoint, RelayConfig, SourceConfig};
pub use stats::StatsSnapshot;
pub use upstream::{HttpConnector, SourceConnector, UpstreamStream};
