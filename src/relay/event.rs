//! Lifecycle notifications
//!
//! Fan-out of relay lifecycle events to any number of observers (loggers,
//! metrics exporters). Delivery is best effort: with no subscribers, events
//! are dropped; a lagging subscriber loses the oldest ones.

use tokio::sync::broadcast;

use crate::error::{Error, ErrorKind};

/// A relay lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A viewer attached
    StreamStart {
        message: String,
        /// Audience size including the new viewer
        viewers: usize,
    },

    /// The upstream connection was closed
    StreamStop { message: String },

    /// Connecting to or reading from upstream failed
    Error {
        url: String,
        kind: ErrorKind,
        cause: String,
    },
}

impl RelayEvent {
    pub(crate) fn start(url: &str, viewers: usize) -> Self {
        RelayEvent::StreamStart {
            message: format!("Started streaming {}, viewers: {}", url, viewers),
            viewers,
        }
    }

    pub(crate) fn stop(url: &str, reason: &str) -> Self {
        RelayEvent::StreamStop {
            message: format!("{}, stopping stream {}", reason, url),
        }
    }

    pub(crate) fn error(url: &str, cause: &Error) -> Self {
        RelayEvent::Error {
            url: url.to_string(),
            kind: cause.kind(),
            cause: cause.to_string(),
        }
    }
}

/// Sender side of the event channel
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event
    pub(crate) fn emit(&self, event: RelayEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit(RelayEvent::stop("http://cam/video", "Upstream ended")), 0);
    }

    #[tokio::test]
    async fn test_emit_to_subscribers() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(RelayEvent::start("http://cam/video", 2)), 2);

        let expected = RelayEvent::StreamStart {
            message: "Started streaming http://cam/video, viewers: 2".into(),
            viewers: 2,
        };
        assert_eq!(a.recv().await.unwrap(), expected);
        assert_eq!(b.recv().await.unwrap(), expected);
    }

    #[test]
    fn test_error_event_fields() {
        let cause: Error = UpstreamError::Unauthorized.into();
        let event = RelayEvent::error("http://cam/video", &cause);

        assert_eq!(
            event,
            RelayEvent::Error {
                url: "http://cam/video".into(),
                kind: ErrorKind::Upstream,
                cause: "upstream rejected credentials".into(),
            }
        );
    }
}
