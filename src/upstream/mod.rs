//! Upstream source connection
//!
//! [`SourceConnector`] is the seam between the relay and whatever produces
//! the multipart byte stream. [`HttpConnector`] is the real implementation:
//! an HTTP GET with an optional Digest retry.

pub mod connector;

pub use connector::{ConnectPhase, HttpConnector, SourceConnector, UpstreamStream};
