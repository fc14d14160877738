//! MJPEG fan-out relay
//!
//! A [`RelaySession`] keeps at most one connection to the source open and
//! copies each repaired chunk into a bounded channel per viewer.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<RelaySession>
//!                 ┌────────────────────────────┐
//!   join() ──────►│ connect_gate (tokio Mutex) │──► SourceConnector::connect()
//!                 │ state (parking_lot Mutex) {│
//!                 │   boundary, upstream,      │
//!                 │   audience: {active,       │
//!                 │              pending},     │
//!                 │ }                          │
//!                 └─────────────┬──────────────┘
//!                               │
//!   pump task: body.next() ──► FramingRepair ──► audience.broadcast()
//!                                                      │
//!              ┌───────────────────────┬───────────────┤
//!              ▼                       ▼               ▼
//!         [ViewerStream]         [ViewerStream]   [ViewerStream]
//!          HTTP body              HTTP body        HTTP body
//! ```
//!
//! # Alignment
//!
//! A viewer that joins mid-stream is *pending* until a chunk contains the
//! delimiter; it then receives that chunk from the delimiter onward, so every
//! viewer's body starts on a part boundary.
//!
//! # Zero-Copy
//!
//! Chunks are `bytes::Bytes`. Aligned viewers share the chunk allocation, and
//! a pending viewer gets a slice of it.

pub mod audience;
pub mod event;
pub mod session;
pub mod viewer;

pub use audience::{AudienceRegistry, BroadcastReport};
pub use event::RelayEvent;
pub use session::RelaySession;
pub use viewer::{ViewerId, ViewerSink, ViewerStream};
