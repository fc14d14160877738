//! Relay session implementation
//!
//! Owns the upstream connection for one source and fans its chunks out to
//! every attached viewer. The connection is opened by the first join and
//! closed when the last viewer leaves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, UpstreamError};
use crate::multipart::FramingRepair;
use crate::server::config::RelayConfig;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::upstream::{HttpConnector, SourceConnector, UpstreamStream};

use super::audience::AudienceRegistry;
use super::event::{EventBus, RelayEvent};
use super::viewer::{self, Detach, ViewerId, ViewerStream};

/// Relay for a single MJPEG source
///
/// Cheap to share behind an `Arc`. Dropping the session shuts it down.
pub struct RelaySession<C: SourceConnector = HttpConnector> {
    connector: C,
    shared: Arc<Shared>,
    /// Serializes connect attempts
    connect_gate: tokio::sync::Mutex<()>,
}

/// State reachable from the pump task and from viewer streams
struct Shared {
    url: String,
    config: RelayConfig,
    state: Mutex<SessionState>,
    events: EventBus,
    stats: RelayStats,
    next_viewer_id: AtomicU64,
}

#[derive(Default)]
struct SessionState {
    /// Boundary of the live connection
    boundary: Option<String>,
    upstream: Option<UpstreamHandle>,
    audience: AudienceRegistry,
    /// Bumped on every successful connect
    generation: u64,
    /// Set by shutdown; no connection is opened afterwards
    closed: bool,
}

/// The pump task of the live connection
struct UpstreamHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl RelaySession<HttpConnector> {
    /// Create a session relaying the configured HTTP source
    pub fn new(config: RelayConfig) -> Result<Self> {
        let connector = HttpConnector::new(config.clone())?;
        Ok(Self::with_connector(config, connector))
    }
}

impl<C: SourceConnector> RelaySession<C> {
    /// Create a session that reads from a custom source
    pub fn with_connector(config: RelayConfig, connector: C) -> Self {
        let shared = Arc::new(Shared {
            url: connector.source_url().to_string(),
            events: EventBus::new(config.event_capacity),
            config,
            state: Mutex::new(SessionState::default()),
            stats: RelayStats::new(),
            next_viewer_id: AtomicU64::new(1),
        });

        Self {
            connector,
            shared,
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach a new viewer
    ///
    /// Joins the live connection if there is one; otherwise connects first.
    /// Concurrent joins while disconnected open a single connection between
    /// them. The returned stream yields nothing until the next multipart
    /// delimiter and ends when the upstream does.
    pub async fn join(&self) -> Result<ViewerStream> {
        if let Some(viewer) = self.shared.attach_if_streaming() {
            return Ok(viewer);
        }

        let _gate = self.connect_gate.lock().await;

        // Another join may have connected while we waited
        if let Some(viewer) = self.shared.attach_if_streaming() {
            return Ok(viewer);
        }

        self.start().await
    }

    async fn start(&self) -> Result<ViewerStream> {
        if self.shared.state.lock().closed {
            return Err(UpstreamError::Shutdown.into());
        }

        tracing::info!(url = %self.shared.url, "Connecting to upstream");

        match self.connector.connect().await {
            Ok(upstream) => self.shared.begin(upstream),
            Err(err) => {
                self.shared.connect_failed(&err);
                Err(err)
            }
        }
    }

    /// Close the upstream connection and end every viewer's stream
    ///
    /// Permanent: later joins fail with [`UpstreamError::Shutdown`], including
    /// one whose connect was already in flight.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.shared.events.subscribe()
    }

    /// Current relay statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        self.shared.state.lock().audience.len()
    }

    /// Check whether an upstream connection is live
    pub fn is_streaming(&self) -> bool {
        self.shared.state.lock().upstream.is_some()
    }

    /// Boundary of the live connection
    pub fn boundary(&self) -> Option<String> {
        self.shared.state.lock().boundary.clone()
    }

    /// Source URL
    pub fn source_url(&self) -> &str {
        &self.shared.url
    }
}

impl<C: SourceConnector> Drop for RelaySession<C> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl<C: SourceConnector + std::fmt::Debug> std::fmt::Debug for RelaySession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("url", &self.shared.url)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn attach_if_streaming(self: &Arc<Self>) -> Option<ViewerStream> {
        let (viewer, viewers) = {
            let mut state = self.state.lock();
            if state.upstream.is_none() {
                return None;
            }
            let boundary = state.boundary.clone().unwrap_or_default();
            let viewer = self.attach(&mut state, &boundary);
            (viewer, state.audience.len())
        };

        self.events.emit(RelayEvent::start(&self.url, viewers));
        Some(viewer)
    }

    /// Install a freshly opened connection and attach the viewer that opened it
    fn begin(self: &Arc<Self>, upstream: UpstreamStream) -> Result<ViewerStream> {
        let UpstreamStream { boundary, body } = upstream;

        let (viewer, viewers, generation) = {
            let mut state = self.state.lock();
            if state.closed {
                tracing::debug!(url = %self.url, "Dropping connection opened during shutdown");
                return Err(UpstreamError::Shutdown.into());
            }
            state.generation += 1;
            let generation = state.generation;

            // Viewers kept across an upstream error wait for the new stream's
            // first delimiter
            state.audience.realign_all();
            let viewer = self.attach(&mut state, &boundary);

            let task = tokio::spawn(pump(
                Arc::clone(self),
                generation,
                FramingRepair::new(&boundary),
                body,
                self.config.idle_timeout,
            ));
            state.boundary = Some(boundary.clone());
            state.upstream = Some(UpstreamHandle { generation, task });

            (viewer, state.audience.len(), generation)
        };

        self.stats.record_connect();
        tracing::info!(
            url = %self.url,
            boundary = %boundary,
            generation = generation,
            "Upstream connected"
        );
        self.events.emit(RelayEvent::start(&self.url, viewers));
        Ok(viewer)
    }

    /// Must be called with the state lock held
    fn attach(self: &Arc<Self>, state: &mut SessionState, boundary: &str) -> ViewerStream {
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let owner: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        let (sink, stream) = viewer::channel(id, boundary, self.config.viewer_buffer, owner);

        state.audience.join(sink);
        self.stats.record_join();

        tracing::debug!(viewer = id, viewers = state.audience.len(), "Viewer joined");
        stream
    }

    fn connect_failed(&self, err: &Error) {
        self.stats.record_upstream_error();
        tracing::warn!(url = %self.url, error = %err, "Upstream connect failed");
        self.events.emit(RelayEvent::error(&self.url, err));
    }

    fn is_current(state: &SessionState, generation: u64) -> bool {
        state
            .upstream
            .as_ref()
            .is_some_and(|upstream| upstream.generation == generation)
    }

    /// Broadcast one repaired chunk
    ///
    /// Returns false once `generation` is no longer the live connection, at
    /// which point the pump must stop.
    fn deliver(&self, generation: u64, chunk: &Bytes, marker: &[u8]) -> bool {
        if chunk.is_empty() {
            return true;
        }

        let (report, stopped) = {
            let mut state = self.state.lock();
            if !Self::is_current(&state, generation) {
                return false;
            }

            let report = state.audience.broadcast(chunk, marker);

            // Write failures can empty the audience just like a leave
            let stopped = !report.failed.is_empty() && state.audience.is_empty();
            if stopped {
                state.upstream = None;
                state.boundary = None;
            }
            (report, stopped)
        };

        self.stats.record_chunk(chunk.len());
        tracing::trace!(
            bytes = chunk.len(),
            delivered = report.delivered,
            skipped = report.skipped,
            "Chunk relayed"
        );
        if report.aligned > 0 {
            tracing::debug!(viewers = report.aligned, "Viewers aligned to delimiter");
        }
        for failure in &report.failed {
            self.stats.record_write_failure();
            self.stats.record_leave();
            tracing::warn!(error = %failure, "Dropping viewer");
            self.events
                .emit(RelayEvent::error(&self.url, &Error::from(*failure)));
        }

        if stopped {
            self.stop("No viewers left");
            return false;
        }
        true
    }

    /// The upstream body ended cleanly
    fn upstream_ended(&self, generation: u64) {
        let closed = {
            let mut state = self.state.lock();
            if !Self::is_current(&state, generation) {
                return;
            }
            state.upstream = None;
            state.boundary = None;
            state.audience.close_all()
        };

        self.record_leaves(closed);
        tracing::info!(url = %self.url, viewers = closed, "Upstream ended");
        self.stop("Upstream ended");
    }

    /// Reading the upstream body failed
    fn upstream_failed(&self, generation: u64, err: Error) {
        let closed = {
            let mut state = self.state.lock();
            if !Self::is_current(&state, generation) {
                return;
            }
            state.upstream = None;
            state.boundary = None;
            if self.config.close_viewers_on_error {
                state.audience.close_all()
            } else {
                state.audience.realign_all();
                0
            }
        };

        self.record_leaves(closed);
        self.stats.record_upstream_error();
        tracing::warn!(
            url = %self.url,
            error = %err,
            viewers_closed = closed,
            "Upstream failed"
        );
        self.events.emit(RelayEvent::error(&self.url, &err));
    }

    fn shutdown(&self) {
        let (upstream, closed) = {
            let mut state = self.state.lock();
            state.closed = true;
            state.boundary = None;
            (state.upstream.take(), state.audience.close_all())
        };

        self.record_leaves(closed);
        if let Some(upstream) = upstream {
            upstream.task.abort();
            tracing::info!(url = %self.url, viewers = closed, "Relay shut down");
            self.stop("Relay shut down");
        }
    }

    fn stop(&self, reason: &str) {
        tracing::info!(url = %self.url, reason = reason, "Stopping stream");
        self.events.emit(RelayEvent::stop(&self.url, reason));
    }

    fn record_leaves(&self, count: usize) {
        for _ in 0..count {
            self.stats.record_leave();
        }
    }
}

impl Detach for Shared {
    fn detach(&self, id: ViewerId) {
        let stopped = {
            let mut state = self.state.lock();
            if !state.audience.leave(id) {
                return;
            }
            if state.audience.is_empty() {
                state.boundary = None;
                state.upstream.take()
            } else {
                None
            }
        };

        self.stats.record_leave();
        tracing::debug!(viewer = id, "Viewer left");

        if let Some(upstream) = stopped {
            upstream.task.abort();
            self.stop("No viewers left");
        }
    }
}

/// Read the upstream body until it ends, fails, or is superseded
async fn pump(
    shared: Arc<Shared>,
    generation: u64,
    mut framing: FramingRepair,
    mut body: BoxStream<'static, std::result::Result<Bytes, UpstreamError>>,
    idle_timeout: Option<Duration>,
) {
    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(UpstreamError::Timeout(limit))),
            },
            None => body.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                let before = framing.repaired();
                let chunk = framing.repair(chunk);
                shared.stats.record_repairs(framing.repaired() - before);

                if !shared.deliver(generation, &chunk, framing.marker()) {
                    return;
                }
            }
            Some(Err(err)) => {
                shared.upstream_failed(generation, err.into());
                return;
            }
            None => {
                if let Some(rest) = framing.finish() {
                    shared.deliver(generation, &rest, framing.marker());
                }
                shared.upstream_ended(generation);
                return;
            }
        }
    }
}
