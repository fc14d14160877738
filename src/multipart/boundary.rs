//! Multipart boundary extraction
//!
//! Pulls the boundary token out of a `multipart/*` Content-Type header.
//! Cameras are sloppy here: some quote the token, some repeat the leading
//! `--` of the delimiter line, and mjpg-streamer terminates the header value
//! with a stray `\r`.

use crate::error::ParseError;

const BOUNDARY_PARAM: &str = "boundary=";

/// Extract the boundary token from a Content-Type header value
///
/// All whitespace, including a stray `\r`, is removed first. The token runs
/// from `boundary=` to the next `;` or the end of the value. Surrounding
/// quotes and one leading `--` are stripped.
pub fn extract_boundary(content_type: &str) -> Result<String, ParseError> {
    let compact: String = content_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let start = compact
        .find(BOUNDARY_PARAM)
        .ok_or_else(|| ParseError::MissingBoundary(content_type.to_string()))?
        + BOUNDARY_PARAM.len();

    let rest = &compact[start..];
    let end = rest.find(';').unwrap_or(rest.len());

    let token = rest[..end].replace('"', "");
    let token = token.strip_prefix("--").unwrap_or(&token);

    if token.is_empty() {
        return Err(ParseError::EmptyBoundary(content_type.to_string()));
    }

    Ok(token.to_string())
}

/// Delimiter line for a boundary token (`--` + token)
pub fn marker_for(boundary: &str) -> Vec<u8> {
    let mut marker = Vec::with_capacity(boundary.len() + 2);
    marker.extend_from_slice(b"--");
    marker.extend_from_slice(boundary.as_bytes());
    marker
}
