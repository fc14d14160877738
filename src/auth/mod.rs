//! Upstream authentication
//!
//! Sources that require credentials answer the first request with a Digest
//! challenge; see [`digest`].

pub mod digest;

pub use digest::{authorize, cnonce_from_time, DigestChallenge};
