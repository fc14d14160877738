//! CRLF framing repair for multipart byte streams
//!
//! A multipart delimiter line `--<boundary>` must be preceded by CRLF. Several
//! IP cameras glue the delimiter straight onto the end of the JPEG payload,
//! which iOS (6+) and some other clients refuse to parse. [`FramingRepair`]
//! rewrites such delimiters as `CRLF--<boundary>` while the stream flows
//! through, without dropping or duplicating payload bytes.
//!
//! The scanner keeps a match in progress across chunk splits: when a chunk ends
//! with a proper prefix of the delimiter, those bytes are withheld and
//! re-examined together with the next chunk. As a consequence a delimiter is
//! never split across two emitted chunks.

use bytes::{Bytes, BytesMut};

use super::boundary::marker_for;

const CRLF: &[u8; 2] = b"\r\n";

/// Find the first occurrence of `needle` in `haystack`
pub(crate) fn find_marker(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Streaming delimiter scanner for one upstream connection
#[derive(Debug)]
pub struct FramingRepair {
    /// `--` + boundary
    marker: Vec<u8>,
    /// Trailing partial delimiter withheld from the previous chunk
    held: BytesMut,
    /// Last two bytes emitted (valid once `emitted >= 2`)
    last: [u8; 2],
    /// Total bytes emitted so far, including inserted CRLFs
    emitted: u64,
    /// Number of delimiters that needed a CRLF inserted
    repaired: u64,
}

impl FramingRepair {
    /// Create a scanner for the given boundary token
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: marker_for(boundary),
            held: BytesMut::new(),
            last: [0; 2],
            emitted: 0,
            repaired: 0,
        }
    }

    /// The delimiter being scanned for
    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// Number of delimiters repaired so far
    pub fn repaired(&self) -> u64 {
        self.repaired
    }

    /// Total bytes emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Repair one upstream chunk
    ///
    /// Returns the bytes ready for delivery. The result may be shorter than
    /// the input when a trailing partial delimiter is withheld, and may be
    /// empty. When nothing needs rewriting the returned `Bytes` shares the
    /// input allocation.
    pub fn repair(&mut self, chunk: Bytes) -> Bytes {
        let input = if self.held.is_empty() {
            chunk
        } else {
            self.held.extend_from_slice(&chunk);
            self.held.split().freeze()
        };

        let mut splices = Vec::new();
        let mut cursor = 0;
        while let Some(offset) = find_marker(&input[cursor..], &self.marker) {
            let at = cursor + offset;
            if !self.preceded_by_crlf(&input, at) {
                splices.push(at);
            }
            cursor = at + self.marker.len();
        }

        let keep = input.len() - self.partial_suffix_len(&input[cursor..]);

        let out = if splices.is_empty() {
            input.slice(..keep)
        } else {
            let mut buf = BytesMut::with_capacity(keep + CRLF.len() * splices.len());
            let mut from = 0;
            for &at in &splices {
                buf.extend_from_slice(&input[from..at]);
                buf.extend_from_slice(CRLF);
                from = at;
            }
            buf.extend_from_slice(&input[from..keep]);
            buf.freeze()
        };

        if keep < input.len() {
            self.held.extend_from_slice(&input[keep..]);
        }

        if !splices.is_empty() {
            tracing::trace!(count = splices.len(), "Inserted CRLF before boundary");
        }
        self.repaired += splices.len() as u64;
        self.record(&out);
        out
    }

    /// Release any withheld bytes at end of stream
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.held.is_empty() {
            return None;
        }
        let rest = self.held.split().freeze();
        self.record(&rest);
        Some(rest)
    }

    fn preceded_by_crlf(&self, input: &[u8], at: usize) -> bool {
        match at {
            // Opening delimiter of the body
            0 if self.emitted == 0 => true,
            0 => self.emitted >= 2 && self.last == *CRLF,
            1 => self.emitted >= 1 && self.last[1] == b'\r' && input[0] == b'\n',
            _ => &input[at - 2..at] == CRLF,
        }
    }

    /// Length of the longest suffix of `tail` that is a proper prefix of the marker
    fn partial_suffix_len(&self, tail: &[u8]) -> usize {
        let max = (self.marker.len() - 1).min(tail.len());
        (1..=max)
            .rev()
            .find(|&len| tail.ends_with(&self.marker[..len]))
            .unwrap_or(0)
    }

    fn record(&mut self, out: &[u8]) {
        match out.len() {
            0 => {}
            1 => self.last = [self.last[1], out[0]],
            n => self.last = [out[n - 2], out[n - 1]],
        }
        self.emitted += out.len() as u64;
    }
}
