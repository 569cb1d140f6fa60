//! # Client Session
//!
//! Bridges one persistent transport connection to the [`Hub`](crate::core::hub::Hub)
//! with two independent pumps:
//!
//! - **Reader**: decodes inbound frames as [`ClientCommand`]s and forwards them to
//!   the hub. Malformed commands are ignored. A close frame or a read error ends
//!   the pump, which then unregisters the session. This is the only path that
//!   ends a session's lifecycle from the client side.
//! - **Writer**: drains the session's bounded queue onto the transport. When the
//!   hub closes the queue (eviction, unregister or shutdown) it sends a
//!   best-effort close frame and stops. Write errors stop it silently.
//!
//! Dropping a session in the hub also cancels the session's token. A pump that
//! is parked on a transport at that moment (a peer that stopped reading, or one
//! that never sends) gives up, so both halves of the connection are released.
//!
//! Both pumps are generic over `Stream`/`Sink` so that the web layer can plug a
//! WebSocket in and tests can plug in-memory channels.

use std::fmt::Display;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::hub::{HubError, HubHandle, OutboundFrame, SessionId};
use crate::models::ClientCommand;

/// Transport-neutral frame received from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
    /// Ping/pong and anything else the transport handles on its own.
    Control,
}

/// What the writer pump puts on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(OutboundFrame),
    Close,
}

/// Join handles of a registered session's pumps.
#[derive(Debug)]
pub struct SessionHandles {
    pub id: SessionId,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// # Register Session
///
/// Allocates an id and a bounded outbound queue of `queue_capacity`, registers
/// the session with the hub (which takes sole ownership of the queue's sender)
/// and spawns both pumps.
pub async fn register_session<S, K, E>(
    hub: &HubHandle,
    inbound: S,
    outbound: K,
    queue_capacity: usize,
) -> Result<SessionHandles, HubError>
where
    S: Stream<Item = Result<WireMessage, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    K: Sink<OutboundMessage> + Send + Unpin + 'static,
    K::Error: Display + Send,
{
    let id = hub.next_session_id();
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let closed = CancellationToken::new();
    hub.register(id, tx, closed.clone()).await?;

    let writer = tokio::spawn(writer_pump(id, outbound, rx, closed.clone()));
    let reader = tokio::spawn(reader_pump(id, inbound, hub.clone(), closed));
    log::info!("Session {} connected", id);

    Ok(SessionHandles { id, reader, writer })
}

/// Reads commands until the connection closes or fails, or the hub drops the
/// session, then unregisters.
pub async fn reader_pump<S, E>(
    id: SessionId,
    mut inbound: S,
    hub: HubHandle,
    closed: CancellationToken,
) where
    S: Stream<Item = Result<WireMessage, E>> + Unpin,
    E: Display,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            message = inbound.next() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let command = match message {
            Ok(WireMessage::Text(text)) => serde_json::from_str::<ClientCommand>(&text),
            Ok(WireMessage::Binary(bytes)) => serde_json::from_slice::<ClientCommand>(&bytes),
            Ok(WireMessage::Control) => continue,
            Ok(WireMessage::Close) => break,
            Err(e) => {
                log::debug!("Session {} read error: {}", id, e);
                break;
            }
        };
        match command {
            Ok(command) => {
                if hub.apply(id, command).await.is_err() {
                    break;
                }
            }
            Err(e) => log::debug!("Session {} sent a malformed command: {}", id, e),
        }
    }

    // Closing the queue here is what stops the writer and the transport.
    let _ = hub.unregister(id).await;
    log::info!("Session {} disconnected", id);
}

/// Writes queued frames until the hub closes the queue or a write fails. A
/// write still pending once the session is closed is abandoned.
pub async fn writer_pump<K>(
    id: SessionId,
    mut outbound: K,
    mut queue: mpsc::Receiver<OutboundFrame>,
    closed: CancellationToken,
) where
    K: Sink<OutboundMessage> + Unpin,
    K::Error: Display,
{
    while let Some(frame) = queue.recv().await {
        let sent = tokio::select! {
            biased;
            sent = outbound.send(OutboundMessage::Text(frame)) => sent,
            _ = closed.cancelled() => {
                log::debug!("Session {} transport stalled after close, dropping it", id);
                return;
            }
        };
        if let Err(e) = sent {
            log::debug!("Session {} write failed: {}", id, e);
            return;
        }
    }
    tokio::select! {
        biased;
        _ = async {
            let _ = outbound.send(OutboundMessage::Close).await;
            let _ = outbound.close().await;
        } => {}
        _ = closed.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hub::Hub;
    use crate::models::Quote;
    use futures_channel::mpsc as fmpsc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    type Inbound = fmpsc::UnboundedSender<Result<WireMessage, std::io::Error>>;
    type Outbound = fmpsc::UnboundedReceiver<OutboundMessage>;

    struct Harness {
        handle: HubHandle,
        shutdown: CancellationToken,
        session: SessionHandles,
        client_tx: Inbound,
        client_rx: Outbound,
    }

    async fn connect(capacity: usize) -> Harness {
        let (hub, handle) = Hub::new(64);
        let shutdown = CancellationToken::new();
        tokio::spawn(hub.run(shutdown.clone()));

        let (client_tx, inbound) = fmpsc::unbounded();
        let (outbound, client_rx) = fmpsc::unbounded();
        let session = register_session(&handle, inbound, outbound, capacity)
            .await
            .unwrap();
        Harness {
            handle,
            shutdown,
            session,
            client_tx,
            client_rx,
        }
    }

    fn text(s: &str) -> Result<WireMessage, std::io::Error> {
        Ok(WireMessage::Text(s.to_string()))
    }

    fn quote(symbol: &str, price: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
            ..Quote::default()
        }
    }

    /// Publishes until the session receives a frame; the reader applies
    /// commands asynchronously so the first publishes may race it.
    async fn publish_until_delivered(h: &mut Harness, q: Quote) -> OutboundMessage {
        for _ in 0..50 {
            h.handle.publish(q.clone()).await.unwrap();
            if let Ok(Some(msg)) = timeout(Duration::from_millis(20), h.client_rx.next()).await {
                return msg;
            }
        }
        panic!("no frame delivered for {}", q.symbol);
    }

    #[tokio::test]
    async fn subscribed_quotes_reach_the_transport() {
        let mut h = connect(8).await;
        h.client_tx
            .unbounded_send(text(r#"{"action":"subscribe","symbols":["AAA"]}"#))
            .unwrap();

        let msg = publish_until_delivered(&mut h, quote("AAA", 10.0)).await;
        let json = match msg {
            OutboundMessage::Text(json) => json,
            other => panic!("expected a text frame, got {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["code"], "AAA");
        assert_eq!(value["price"], 10.0);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn malformed_commands_keep_the_session_open() {
        let mut h = connect(8).await;
        h.client_tx.unbounded_send(text("not json")).unwrap();
        h.client_tx
            .unbounded_send(text(r#"{"action":"explode","symbols":["AAA"]}"#))
            .unwrap();
        h.client_tx
            .unbounded_send(Ok(WireMessage::Binary(
                br#"{"action":"subscribe","symbols":["BBB"]}"#.to_vec(),
            )))
            .unwrap();

        let msg = publish_until_delivered(&mut h, quote("BBB", 3.5)).await;
        assert!(matches!(msg, OutboundMessage::Text(ref s) if s.contains("BBB")));
        assert_eq!(h.handle.session_count().await.unwrap(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn client_close_unregisters_and_closes_transport() {
        let mut h = connect(8).await;
        h.client_tx.unbounded_send(Ok(WireMessage::Close)).unwrap();

        timeout(Duration::from_secs(1), &mut h.session.reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.handle.session_count().await.unwrap(), 0);

        let last = timeout(Duration::from_secs(1), h.client_rx.next()).await.unwrap();
        assert_eq!(last, Some(OutboundMessage::Close));
        timeout(Duration::from_secs(1), &mut h.session.writer)
            .await
            .unwrap()
            .unwrap();
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn read_error_ends_the_session() {
        let mut h = connect(8).await;
        h.client_tx
            .unbounded_send(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
            .unwrap();

        timeout(Duration::from_secs(1), &mut h.session.reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.handle.session_count().await.unwrap(), 0);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn hub_shutdown_sends_close_frame() {
        let mut h = connect(8).await;
        h.shutdown.cancel();

        let last = timeout(Duration::from_secs(1), h.client_rx.next()).await.unwrap();
        assert_eq!(last, Some(OutboundMessage::Close));
        assert_eq!(timeout(Duration::from_secs(1), h.client_rx.next()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_stops_silently_on_write_error() {
        let (queue_tx, queue_rx) = mpsc::channel::<OutboundFrame>(4);
        let (sink, sink_rx) = fmpsc::unbounded::<OutboundMessage>();
        drop(sink_rx);

        queue_tx.send(Arc::from("{}")).await.unwrap();
        let writer = tokio::spawn(writer_pump(1, sink, queue_rx, CancellationToken::new()));
        timeout(Duration::from_secs(1), writer).await.unwrap().unwrap();
        assert!(queue_tx.is_closed());
    }

    #[tokio::test]
    async fn evicted_session_with_stalled_transport_is_torn_down() {
        let (hub, handle) = Hub::new(64);
        let shutdown = CancellationToken::new();
        tokio::spawn(hub.run(shutdown.clone()));

        let (client_tx, inbound) = fmpsc::unbounded::<Result<WireMessage, std::io::Error>>();
        // Accepts one frame, then never drains.
        let (stalled, _stalled_rx) = fmpsc::channel::<OutboundMessage>(0);
        let mut session = register_session(&handle, inbound, stalled, 2).await.unwrap();
        client_tx
            .unbounded_send(text(r#"{"action":"subscribe","symbols":["AAA"]}"#))
            .unwrap();

        for i in 0..100 {
            handle.publish(quote("AAA", i as f64)).await.unwrap();
            if handle.session_count().await.unwrap() == 0 {
                break;
            }
        }
        assert_eq!(handle.session_count().await.unwrap(), 0);

        timeout(Duration::from_secs(1), &mut session.writer)
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_secs(1), &mut session.reader)
            .await
            .unwrap()
            .unwrap();
        // The reader let go of the inbound half.
        assert!(client_tx.is_closed());
        shutdown.cancel();
    }
}
