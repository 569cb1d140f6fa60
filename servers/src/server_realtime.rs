use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_realtime::core::{Hub, SnapshotCache, hub::DEFAULT_EVENT_CAPACITY};
use lib_realtime::ingestors::{BackfillPool, QuotePoller};
use lib_realtime::markets::MarketOracle;
use lib_realtime::markets::sina::{QuoteSource, SinaHistoryFeed};
use lib_realtime::storage::{MemoryStore, TimeSeriesStore};

mod realtime_logic;
use realtime_logic::{config, logger, routes, schedule};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!("Starting server_realtime with {:?}", settings);

    let shutdown = CancellationToken::new();

    // --- Phase 1: Collaborators ---
    let store = Arc::new(MemoryStore::from_watchlist_file(&settings.watchlist_path));
    let symbols = match store.load_watchlist().await {
        Ok(symbols) => symbols,
        Err(e) => {
            log::warn!("Watchlist unavailable, starting with an empty universe: {}", e);
            Vec::new()
        }
    };
    log::info!("Watchlist loaded: {} symbols", symbols.len());

    let source = Arc::new(
        QuoteSource::sina(
            settings.quote_url.clone(),
            settings.referer.clone(),
            settings.http_timeout,
        )
        .context("Failed to build the realtime quote client")?,
    );
    let snapshot = Arc::new(SnapshotCache::new());
    let oracle = Arc::new(MarketOracle::new(Arc::clone(&source), settings.probe_symbol.clone()));

    // --- Phase 2: Live Pipeline ---
    let (hub, hub_handle) = Hub::new(DEFAULT_EVENT_CAPACITY);
    let hub_task = tokio::spawn(hub.run(shutdown.clone()));

    let poller = QuotePoller::new(
        Arc::clone(&source),
        Arc::clone(&snapshot),
        hub_handle.clone(),
        symbols,
        settings.poll_interval,
    );
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));

    // --- Phase 3: Backfill (startup run + daily schedule) ---
    let history = Arc::new(
        SinaHistoryFeed::new(settings.history_url.clone(), settings.http_timeout)
            .context("Failed to build the history client")?,
    );
    let pool = BackfillPool::new(history, store.clone(), settings.backfill.clone());
    let startup_backfill = {
        let pool = pool.clone();
        let store = Arc::clone(&store);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            schedule::backfill_watchlist(&pool, store.as_ref(), shutdown).await;
        })
    };
    let mut scheduler = schedule::start_daily_backfill(
        &settings.backfill_cron,
        pool,
        store.clone(),
        shutdown.clone(),
    )
    .await
    .context("Failed to schedule daily backfill")?;

    // --- Phase 4: HTTP / WebSocket Surface ---
    let app = routes::router(routes::AppState {
        hub: hub_handle,
        snapshot,
        oracle,
        queue_capacity: settings.session_queue_capacity,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("Realtime server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
                log::info!("HTTP server shutting down.");
            })
            .await
    });

    // Wait for shutdown signal
    wait_for_signal().await;

    // Send shutdown signal to all components
    shutdown.cancel();
    if let Err(e) = scheduler.shutdown().await {
        log::warn!("Scheduler did not stop cleanly: {}", e);
    }

    // Wait for components to shut down
    match server_task.await {
        Ok(Err(e)) => log::error!("HTTP server error: {}", e),
        Err(e) => log::error!("HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    let _ = tokio::join!(hub_task, poller_task, startup_backfill);

    log::info!("Shutdown complete.");
    Ok(())
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}
