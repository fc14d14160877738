//! HTTP surface of the relay
//!
//! [`RelayConfig`] carries the source and tuning options; [`ProxyEndpoint`]
//! turns a [`RelaySession`](crate::relay::RelaySession) into an axum route.

pub mod config;
pub mod endpoint;

pub use config::{RelayConfig, SourceConfig};
pub use endpoint::ProxyEndpoint;
