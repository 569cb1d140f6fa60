//! End-to-end tests of the live pipeline: poller -> snapshot + hub -> sessions,
//! with an in-memory quote feed and in-memory transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc as fmpsc;
use futures_util::StreamExt;
use lib_realtime::core::{
    Hub, HubHandle, OutboundMessage, SnapshotCache, WireMessage, register_session,
};
use lib_realtime::ingestors::QuotePoller;
use lib_realtime::markets::sina::{QuoteError, QuoteFeed, QuoteSource};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Every request answers each symbol with a price that grows per request.
struct CountingFeed {
    requests: AtomicU64,
}

#[async_trait]
impl QuoteFeed for CountingFeed {
    async fn request_batch(&self, symbols: &[String]) -> Result<String, QuoteError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(symbols
            .iter()
            .map(|s| format!("var hq_str_{s}=\"{s},1,1,{n}.0,1,1,0,0,500\";\n"))
            .collect())
    }
}

struct Pipeline {
    hub: HubHandle,
    snapshot: Arc<SnapshotCache>,
    poller: QuotePoller,
    shutdown: CancellationToken,
}

fn pipeline(symbols: &[&str]) -> Pipeline {
    let (hub, handle) = Hub::new(1024);
    let shutdown = CancellationToken::new();
    tokio::spawn(hub.run(shutdown.clone()));

    let snapshot = Arc::new(SnapshotCache::new());
    let source = Arc::new(QuoteSource::new(Arc::new(CountingFeed {
        requests: AtomicU64::new(0),
    })));
    let poller = QuotePoller::new(
        source,
        Arc::clone(&snapshot),
        handle.clone(),
        symbols.iter().map(|s| s.to_string()).collect(),
        Duration::from_secs(3),
    );
    Pipeline {
        hub: handle,
        snapshot,
        poller,
        shutdown,
    }
}

type ClientTx = fmpsc::UnboundedSender<Result<WireMessage, std::io::Error>>;

type ClientRx = fmpsc::UnboundedReceiver<OutboundMessage>;

async fn connect(hub: &HubHandle, capacity: usize) -> (ClientTx, ClientRx) {
    let (client_tx, inbound) = fmpsc::unbounded();
    let (outbound, client_rx) = fmpsc::unbounded();
    register_session(hub, inbound, outbound, capacity).await.unwrap();
    (client_tx, client_rx)
}

fn subscribe(tx: &ClientTx, symbols: &[&str]) {
    let command = serde_json::json!({ "action": "subscribe", "symbols": symbols });
    tx.unbounded_send(Ok(WireMessage::Text(command.to_string()))).unwrap();
}

fn code_of(message: &OutboundMessage) -> String {
    match message {
        OutboundMessage::Text(json) => {
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            value["code"].as_str().unwrap().to_string()
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

/// Polls until the first frame reaches the client; the reader pump applies the
/// subscription asynchronously, so the first polls may precede it.
async fn poll_until_frame(p: &Pipeline, rx: &mut ClientRx) -> OutboundMessage {
    for _ in 0..50 {
        p.poller.poll_once().await;
        if let Ok(Some(frame)) = timeout(Duration::from_millis(20), rx.next()).await {
            return frame;
        }
    }
    panic!("no frame delivered");
}

#[tokio::test]
async fn subscriber_receives_only_its_symbol() {
    let p = pipeline(&["AAA", "BBB"]);
    let (tx, mut rx) = connect(&p.hub, 64).await;
    subscribe(&tx, &["AAA"]);

    let first = poll_until_frame(&p, &mut rx).await;
    assert_eq!(code_of(&first), "AAA");

    // Exactly one frame per publish of AAA, none for BBB.
    while let Ok(Some(extra)) = timeout(Duration::from_millis(20), rx.next()).await {
        assert_eq!(code_of(&extra), "AAA");
    }
    p.poller.poll_once().await;
    let next = timeout(Duration::from_secs(1), rx.next()).await.unwrap().unwrap();
    assert_eq!(code_of(&next), "AAA");
    assert!(timeout(Duration::from_millis(50), rx.next()).await.is_err());

    // The snapshot saw both symbols regardless of subscriptions.
    assert!(p.snapshot.get("AAA").is_some());
    assert!(p.snapshot.get("BBB").is_some());
    p.shutdown.cancel();
}

#[tokio::test]
async fn stalled_client_is_evicted_without_stalling_others() {
    let p = pipeline(&["AAA"]);

    // A transport that accepts a single frame and is never read.
    let (stalled_tx, stalled_inbound) = fmpsc::unbounded::<Result<WireMessage, std::io::Error>>();
    let (stalled_sink, _stalled_rx) = fmpsc::channel::<OutboundMessage>(0);
    let mut stalled = register_session(&p.hub, stalled_inbound, stalled_sink, 2)
        .await
        .unwrap();
    subscribe(&stalled_tx, &["AAA"]);

    let (healthy_tx, mut healthy_rx) = connect(&p.hub, 64).await;
    subscribe(&healthy_tx, &["AAA"]);
    poll_until_frame(&p, &mut healthy_rx).await;

    let mut evicted = false;
    for _ in 0..50 {
        p.poller.poll_once().await;
        if p.hub.session_count().await.unwrap() == 1 {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "stalled session was never evicted");

    // Both pumps of the evicted session finish even though its peer never drains.
    timeout(Duration::from_secs(1), &mut stalled.writer)
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(1), &mut stalled.reader)
        .await
        .unwrap()
        .unwrap();
    assert!(stalled_tx.is_closed());

    // The healthy session keeps receiving.
    while timeout(Duration::from_millis(20), healthy_rx.next()).await.is_ok() {}
    p.poller.poll_once().await;
    let frame = timeout(Duration::from_secs(1), healthy_rx.next()).await.unwrap().unwrap();
    assert_eq!(code_of(&frame), "AAA");
    p.shutdown.cancel();
}

#[tokio::test]
async fn reconnected_client_starts_without_subscriptions() {
    let p = pipeline(&["AAA"]);

    let (tx, mut rx) = connect(&p.hub, 64).await;
    subscribe(&tx, &["AAA"]);
    poll_until_frame(&p, &mut rx).await;
    tx.unbounded_send(Ok(WireMessage::Close)).unwrap();
    loop {
        match timeout(Duration::from_secs(1), rx.next()).await.unwrap() {
            Some(OutboundMessage::Close) | None => break,
            Some(_) => continue,
        }
    }

    let (_tx2, mut rx2) = connect(&p.hub, 64).await;
    p.poller.poll_once().await;
    assert!(timeout(Duration::from_millis(100), rx2.next()).await.is_err());
    assert_eq!(p.hub.session_count().await.unwrap(), 1);
    p.shutdown.cancel();
}
