//! # Core Distribution Module
//!
//! The live half of the system: the latest-quote cache, the hub that owns every
//! connected session, and the per-connection pumps bridging a transport to it.
//!
//! ## Core Components:
//!
//! - **`snapshot`**: Symbol to latest quote. Many concurrent readers (API
//!   handlers), one writer (the poller).
//! - **`hub`**: A single event loop that owns the session registry and every
//!   subscription set. Register, unregister, command and publish events are
//!   processed strictly one at a time, in submission order.
//! - **`session`**: The reader and writer pumps of one connection. The reader
//!   forwards commands to the hub; the writer drains the session's bounded
//!   outbound queue onto the transport.

/// Latest quote per symbol.
pub mod snapshot;
/// The serialized routing loop and its cloneable handle.
pub mod hub;
/// Per-connection reader/writer pumps.
pub mod session;

// --- Public API Re-exports ---
pub use hub::{Hub, HubError, HubHandle, OutboundFrame, SessionId};
pub use session::{register_session, OutboundMessage, SessionHandles, WireMessage};
pub use snapshot::SnapshotCache;
