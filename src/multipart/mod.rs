//! Multipart stream handling
//!
//! Boundary extraction from the upstream Content-Type and CRLF framing repair
//! of the relayed byte stream.

pub mod boundary;
pub mod framing;

pub use boundary::{extract_boundary, marker_for};
pub use framing::FramingRepair;
pub(crate) use framing::find_marker;
