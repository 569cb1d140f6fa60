//! # Distribution Hub
//!
//! The hub is a single event loop that exclusively owns the registry of live
//! sessions and every session's subscription set. Nothing outside the loop ever
//! touches either: pumps, the poller and the API layer talk to it only by
//! submitting [`HubEvent`]s through a cloneable [`HubHandle`].
//!
//! ## Core Design Principles:
//!
//! 1.  **Total Order**: Register, unregister, subscription commands and publishes
//!     are processed one at a time in submission order. Routing of a quote only
//!     depends on the subscription state at the moment its publish event is
//!     handled, never on the timing of concurrent callers.
//!
//! 2.  **Zero-Copy Fan-out**: A quote is serialized once into an `Arc<str>` and
//!     every subscribed session receives a pointer to the same buffer. Nothing is
//!     serialized when no session is subscribed to the symbol.
//!
//! 3.  **Evict, Never Block**: Delivery uses `try_send` on each session's bounded
//!     queue. A full (or already closed) queue evicts the session on the spot:
//!     it is removed from the registry and its sender dropped, which closes the
//!     queue so the writer pump can finish. A slow client can never apply
//!     backpressure to the loop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::models::{Action, ClientCommand, Quote};

/// Identifies one registered session for its whole lifetime.
pub type SessionId = u64;

/// A serialized quote, shared by every session it is routed to.
pub type OutboundFrame = Arc<str>;

/// Capacity of the hub's own inbound event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub event loop is no longer running")]
    Closed,
}

/// Everything the loop can be asked to do.
#[derive(Debug)]
pub enum HubEvent {
    Register {
        id: SessionId,
        outbound: mpsc::Sender<OutboundFrame>,
        closed: CancellationToken,
    },
    Unregister(SessionId),
    Command {
        id: SessionId,
        command: ClientCommand,
    },
    Publish(Quote),
    SessionCount(oneshot::Sender<usize>),
}

/// Registry entry. The hub holds the only sender of the session's queue.
/// Dropping the entry closes the queue and cancels the session's token, which
/// releases pumps stuck on a transport that stopped draining.
struct SessionEntry {
    outbound: mpsc::Sender<OutboundFrame>,
    subscriptions: HashSet<String>,
    _closed: DropGuard,
}

/// # Hub
///
/// The loop state. Construct with [`Hub::new`], hand the returned [`HubHandle`]
/// to producers and sessions, then drive the loop with [`Hub::run`].
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    sessions: HashMap<SessionId, SessionEntry>,
}

/// # Hub Handle
///
/// Cheap to clone. Every method enqueues one event; the methods only fail when
/// the loop has stopped.
#[derive(Clone, Debug)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    /// Creates the loop state and its handle. `event_capacity` bounds the
    /// number of events waiting for the loop.
    pub fn new(event_capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(event_capacity.max(1));
        let hub = Self {
            events: rx,
            sessions: HashMap::new(),
        };
        let handle = HubHandle {
            events: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// # Run
    ///
    /// Processes events until `shutdown` is cancelled or every handle has been
    /// dropped. On exit all remaining sessions are dropped, which closes their
    /// queues and lets their writer pumps send a close notification.
    pub async fn run(mut self, shutdown: CancellationToken) {
        log::info!("Hub event loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Hub received shutdown signal");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        log::info!("All hub handles dropped");
                        break;
                    }
                },
            }
        }
        let remaining = self.sessions.len();
        self.sessions.clear();
        self.events.close();
        log::info!("Hub event loop stopped, closed {} session(s)", remaining);
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register {
                id,
                outbound,
                closed,
            } => {
                self.sessions.insert(
                    id,
                    SessionEntry {
                        outbound,
                        subscriptions: HashSet::new(),
                        _closed: closed.drop_guard(),
                    },
                );
                log::debug!("Session {} registered ({} live)", id, self.sessions.len());
            }
            HubEvent::Unregister(id) => {
                // Dropping the entry drops the only sender and closes the queue.
                if self.sessions.remove(&id).is_some() {
                    log::debug!("Session {} unregistered ({} live)", id, self.sessions.len());
                }
            }
            HubEvent::Command { id, command } => self.apply(id, command),
            HubEvent::Publish(quote) => self.route(&quote),
            HubEvent::SessionCount(reply) => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn apply(&mut self, id: SessionId, command: ClientCommand) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        match command.action {
            Action::Subscribe => entry.subscriptions.extend(command.symbols),
            Action::Unsubscribe => {
                for symbol in &command.symbols {
                    entry.subscriptions.remove(symbol);
                }
            }
        }
    }

    fn route(&mut self, quote: &Quote) {
        let symbol = quote.symbol.as_str();
        if !self
            .sessions
            .values()
            .any(|entry| entry.subscriptions.contains(symbol))
        {
            return;
        }

        let frame: OutboundFrame = match serde_json::to_string(quote) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                log::warn!("Dropping quote for {}: cannot serialize: {}", symbol, e);
                return;
            }
        };

        self.sessions.retain(|id, entry| {
            if !entry.subscriptions.contains(symbol) {
                return true;
            }
            match entry.outbound.try_send(Arc::clone(&frame)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Session {} is not keeping up, evicting", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Session {} queue already closed, evicting", id);
                    false
                }
            }
        });
    }
}

impl HubHandle {
    /// Allocates a process-unique session id.
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a session with an empty subscription set. The hub takes ownership
    /// of `outbound`; callers must not keep another sender for it. `closed` is
    /// cancelled once the hub drops the session for any reason.
    pub async fn register(
        &self,
        id: SessionId,
        outbound: mpsc::Sender<OutboundFrame>,
        closed: CancellationToken,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::Register {
            id,
            outbound,
            closed,
        })
        .await
    }

    /// Removes a session and closes its queue. Unknown ids are a no-op.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.submit(HubEvent::Unregister(id)).await
    }

    /// Applies a subscribe/unsubscribe command to the session's set.
    pub async fn apply(&self, id: SessionId, command: ClientCommand) -> Result<(), HubError> {
        self.submit(HubEvent::Command { id, command }).await
    }

    /// Routes `quote` to every session subscribed to its symbol.
    pub async fn publish(&self, quote: Quote) -> Result<(), HubError> {
        self.submit(HubEvent::Publish(quote)).await
    }

    /// Number of live sessions, answered in order with the other events.
    pub async fn session_count(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubEvent::SessionCount(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}
