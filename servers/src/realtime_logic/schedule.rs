use std::sync::Arc;

use anyhow::Result;
use chrono_tz::Asia::Shanghai;
use lib_realtime::ingestors::BackfillPool;
use lib_realtime::storage::TimeSeriesStore;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};
use tokio_util::sync::CancellationToken;

/// Loads the watchlist and backfills it. Shared by the startup run and the cron job.
pub async fn backfill_watchlist(
    pool: &BackfillPool,
    store: &dyn TimeSeriesStore,
    shutdown: CancellationToken,
) {
    let symbols = match store.load_watchlist().await {
        Ok(symbols) => symbols,
        Err(e) => {
            log::warn!("Skipping backfill, watchlist unavailable: {}", e);
            return;
        }
    };
    let summary = pool.run(symbols, shutdown).await;
    if !summary.abandoned.is_empty() {
        log::warn!("Backfill abandoned: {}", summary.abandoned.join(","));
    }
}

/// Schedules the daily backfill on `cron` (Asia/Shanghai) and starts the scheduler.
pub async fn start_daily_backfill(
    cron: &str,
    pool: BackfillPool,
    store: Arc<dyn TimeSeriesStore>,
    shutdown: CancellationToken,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = JobBuilder::new()
        .with_timezone(Shanghai)
        .with_cron_job_type()
        .with_schedule(cron)?
        .with_run_async(Box::new(move |uuid, mut l| {
            let pool = pool.clone();
            let store = Arc::clone(&store);
            let shutdown = shutdown.clone();
            Box::pin(async move {
                log::info!("Daily backfill job {} fired", uuid);
                backfill_watchlist(&pool, store.as_ref(), shutdown).await;
                match l.next_tick_for_job(uuid).await {
                    Ok(Some(ts)) => log::info!("Next daily backfill at {:?}", ts),
                    _ => log::warn!("Could not get next tick for daily backfill"),
                }
            })
        }))
        .build()?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    log::info!("Daily backfill scheduled with '{}' (Asia/Shanghai)", cron);
    Ok(scheduler)
}
