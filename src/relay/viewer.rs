//! Viewer sinks and streams
//!
//! Each viewer is a bounded channel. The relay owns the [`ViewerSink`] (write
//! side) inside its audience; the HTTP layer owns the [`ViewerStream`] (read
//! side) as the response body. Dropping either end detaches the viewer.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ViewerWriteError;

/// Identity of a viewer within a session
pub type ViewerId = u64;

/// `Expires` header value sent to viewers
pub const EXPIRES: &str = "Mon, 01 Jul 1980 00:00:00 GMT";

/// `Cache-Control` header value sent to viewers
pub const CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// `Pragma` header value sent to viewers
pub const PRAGMA: &str = "no-cache";

/// `Content-Type` header value for a boundary
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace;boundary={}", boundary)
}

/// Receives a notification when a viewer's transport closes
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ViewerId);
}

/// Create a connected sink/stream pair
pub(crate) fn channel(
    id: ViewerId,
    boundary: &str,
    capacity: usize,
    owner: Weak<dyn Detach>,
) -> (ViewerSink, ViewerStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = ViewerSink { id, tx };
    let stream = ViewerStream {
        id,
        boundary: boundary.to_string(),
        rx,
        owner,
    };
    (sink, stream)
}

/// Write side of a viewer
#[derive(Debug)]
pub struct ViewerSink {
    id: ViewerId,
    tx: mpsc::Sender<Bytes>,
}

impl ViewerSink {
    /// Viewer identity
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Queue a chunk without waiting
    ///
    /// Fails when the viewer has gone away or its buffer is full.
    pub fn write(&self, chunk: Bytes) -> Result<(), ViewerWriteError> {
        self.tx.try_send(chunk).map_err(|e| match e {
            TrySendError::Full(_) => ViewerWriteError::Backpressure(self.id),
            TrySendError::Closed(_) => ViewerWriteError::Closed(self.id),
        })
    }
}

/// Read side of a viewer: the response body
///
/// Ends when the relay closes the viewer. Dropping it removes the viewer from
/// the audience, which may close the upstream connection.
pub struct ViewerStream {
    id: ViewerId,
    boundary: String,
    rx: mpsc::Receiver<Bytes>,
    owner: Weak<dyn Detach>,
}

impl ViewerStream {
    /// Viewer identity
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Boundary token of the stream this viewer receives
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response `Content-Type` header
    pub fn content_type(&self) -> String {
        content_type(&self.boundary)
    }

    /// Receive the next chunk, or `None` once the relay closed this viewer
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for ViewerStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }
}

impl std::fmt::Debug for ViewerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerStream")
            .field("id", &self.id)
            .field("boundary", &self.boundary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        detached: Mutex<Vec<ViewerId>>,
    }

    impl Detach for Recorder {
        fn detach(&self, id: ViewerId) {
            self.detached.lock().unwrap().push(id);
        }
    }

    fn pair(capacity: usize) -> (ViewerSink, ViewerStream, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let owner: Weak<dyn Detach> = Arc::downgrade(&recorder) as Weak<dyn Detach>;
        let (sink, stream) = channel(7, "B", capacity, owner);
        (sink, stream, recorder)
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("myb"), "multipart/x-mixed-replace;boundary=myb");
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (sink, mut stream, _) = pair(4);

        sink.write(Bytes::from_static(b"--B\r\n")).unwrap();
        assert_eq!(stream.next().await, Some(Ok(Bytes::from_static(b"--B\r\n"))));

        drop(sink);
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_full_buffer_is_backpressure() {
        let (sink, _stream, _) = pair(1);

        sink.write(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            sink.write(Bytes::from_static(b"b")),
            Err(ViewerWriteError::Backpressure(7))
        );
    }

    #[test]
    fn test_dropped_stream_closes_sink_and_detaches() {
        let (sink, stream, recorder) = pair(4);

        drop(stream);

        assert_eq!(
            sink.write(Bytes::from_static(b"a")),
            Err(ViewerWriteError::Closed(7))
        );
        assert_eq!(*recorder.detached.lock().unwrap(), vec![7]);
    }
}
