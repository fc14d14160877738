//! Audience registry
//!
//! Tracks the viewers of one relay session and which of them still wait for
//! their first multipart delimiter. Not synchronized on its own: the session
//! keeps it behind its state lock so a join or leave never lands in the middle
//! of a chunk's delivery.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;

use crate::error::ViewerWriteError;
use crate::multipart::find_marker;

use super::viewer::{ViewerId, ViewerSink};

/// Outcome of delivering one chunk to the audience
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Viewers that were written to
    pub delivered: usize,
    /// Viewers still waiting for a delimiter
    pub skipped: usize,
    /// Newly aligned viewers
    pub aligned: usize,
    /// Viewers removed because the write failed
    pub failed: Vec<ViewerWriteError>,
}

/// Active viewers and the subset pending alignment
#[derive(Debug, Default)]
pub struct AudienceRegistry {
    active: BTreeMap<ViewerId, ViewerSink>,
    pending: HashSet<ViewerId>,
}

impl AudienceRegistry {
    /// Create an empty audience
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active viewers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check whether nobody is watching
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Check whether a viewer is attached
    pub fn contains(&self, id: ViewerId) -> bool {
        self.active.contains_key(&id)
    }

    /// Check whether a viewer still waits for its first delimiter
    pub fn is_pending(&self, id: ViewerId) -> bool {
        self.pending.contains(&id)
    }

    /// Add a viewer; it receives nothing until the next delimiter
    pub fn join(&mut self, sink: ViewerSink) {
        let id = sink.id();
        self.pending.insert(id);
        self.active.insert(id, sink);
    }

    /// Remove a viewer; returns whether it was attached
    pub fn leave(&mut self, id: ViewerId) -> bool {
        self.pending.remove(&id);
        self.active.remove(&id).is_some()
    }

    /// Deliver one repaired chunk
    ///
    /// Viewers pending alignment get the chunk from the first `marker`
    /// onward, or nothing if the chunk has none. Everyone else gets the full
    /// chunk. A failed write removes that viewer only.
    pub fn broadcast(&mut self, chunk: &Bytes, marker: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let aligned_from = if self.pending.is_empty() {
            None
        } else {
            find_marker(chunk, marker)
        };

        for (id, sink) in &self.active {
            let payload = if self.pending.contains(id) {
                match aligned_from {
                    Some(at) => chunk.slice(at..),
                    None => {
                        report.skipped += 1;
                        continue;
                    }
                }
            } else {
                chunk.clone()
            };

            match sink.write(payload) {
                Ok(()) => {
                    report.delivered += 1;
                    if self.pending.remove(id) {
                        report.aligned += 1;
                    }
                }
                Err(e) => report.failed.push(e),
            }
        }

        for err in &report.failed {
            let id = match *err {
                ViewerWriteError::Closed(id) | ViewerWriteError::Backpressure(id) => id,
            };
            self.leave(id);
        }

        report
    }

    /// Put every viewer back into pending alignment
    pub fn realign_all(&mut self) {
        self.pending = self.active.keys().copied().collect();
    }

    /// Drop every sink, ending the viewers' response bodies
    ///
    /// Returns how many viewers were closed.
    pub fn close_all(&mut self) -> usize {
        let closed = self.active.len();
        self.active.clear();
        self.pending.clear();
        closed
    }
}
