//! Indicator engine.
//!
//! Polls the snapshot watermark, waits a short safety delay for the
//! writer's sub-batches to land, then computes the indicator battery for
//! every bucket it has not yet processed, in strictly increasing order.
//! Single task: the work is memory-bound and parallelism would only
//! contend for the shared connection pool.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::StoreError;
use crate::services::backoff;
use crate::services::clock;
use crate::services::indicators::{compute_bucket_rows, group_window, OFFSETS_MINUTES};
use crate::services::monitor::{EventKind, EventLevel, MonitorClient, MonitorEvent};
use crate::services::store::SnapshotStore;

const DB_BACKOFF_CAP: Duration = Duration::from_secs(15);

/// Buckets processed per catch-up phase before yielding back to the poll
/// loop; a long backlog resumes on the next cycle.
const MAX_CATCHUP_PER_CYCLE: usize = 20;

/// Cold-start watermark: resume after the last computed bucket, or one
/// bucket behind the snapshot watermark when the indicator table is empty.
pub fn initial_watermark(
    latest_snapshot: i64,
    latest_indicator: Option<i64>,
    bucket_ms: i64,
) -> i64 {
    latest_indicator.unwrap_or(latest_snapshot - bucket_ms)
}

#[derive(Debug)]
struct BucketStats {
    assets_written: usize,
    assets_skipped: usize,
    indicators_written: usize,
    duration_ms: i64,
}

pub fn start_indicator_engine_job(
    store: SnapshotStore,
    monitor: MonitorClient,
    config: Arc<Config>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_engine(store, monitor, config, shutdown).await;
        tracing::info!("indicator engine stopped");
    })
}

async fn run_engine(
    store: SnapshotStore,
    monitor: MonitorClient,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_processed: Option<i64> = None;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let latest = match store.latest_bucket().await {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("watermark query failed: {}", e);
                continue;
            }
        };

        let mut last = match last_processed {
            Some(t) => t,
            None => match store.latest_indicator_bucket().await {
                Ok(existing) => initial_watermark(latest, existing, config.bucket_ms),
                Err(e) => {
                    tracing::warn!("indicator watermark query failed: {}", e);
                    continue;
                }
            },
        };

        if latest <= last {
            last_processed = Some(last);
            continue;
        }

        // New bucket(s) observed: pay the safety delay once, then catch up
        // without further waiting.
        monitor.emit(
            MonitorEvent::new(
                EventKind::IndicatorStart,
                EventLevel::Info,
                format!(
                    "new snapshot bucket {latest}, computing from {}",
                    last + config.bucket_ms
                ),
                clock::now_ms(),
            )
            .metric("latest_bucket_ms", latest)
            .metric("last_processed_ms", last),
        );

        tokio::select! {
            _ = tokio::time::sleep(config.safety_delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        let mut processed_this_cycle: usize = 0;
        while !*shutdown.borrow() && processed_this_cycle < MAX_CATCHUP_PER_CYCLE {
            let latest = match store.latest_bucket().await {
                Ok(Some(t)) => t,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("watermark query failed during catch-up: {}", e);
                    break;
                }
            };
            if latest <= last {
                break;
            }

            let next = last + config.bucket_ms;
            match compute_bucket(&store, &config, next).await {
                Ok(stats) => {
                    monitor.emit(
                        MonitorEvent::new(
                            EventKind::IndicatorSuccess,
                            EventLevel::Info,
                            format!(
                                "indicators computed for bucket {next}: {} rows across {} asset(s)",
                                stats.indicators_written, stats.assets_written
                            ),
                            clock::now_ms(),
                        )
                        .metric("aligned_time_ms", next)
                        .metric("assets_written", stats.assets_written as u64)
                        .metric("assets_skipped", stats.assets_skipped as u64)
                        .metric("indicators_written", stats.indicators_written as u64)
                        .metric("duration_ms", stats.duration_ms),
                    );
                    last = next;
                    processed_this_cycle += 1;
                }
                Err(e) => {
                    // Watermark does not advance; the bucket is retried on
                    // the next poll cycle.
                    monitor.emit(
                        MonitorEvent::new(
                            EventKind::IndicatorFailure,
                            EventLevel::Error,
                            format!("indicator computation failed for bucket {next}: {e}"),
                            clock::now_ms(),
                        )
                        .metric("aligned_time_ms", next),
                    );
                    break;
                }
            }
        }

        last_processed = Some(last);
    }
}

/// One bucket end to end: a single history-window read, in-memory battery
/// evaluation, and chunked upserts. Transient store failures retry the
/// whole bucket from the read.
async fn compute_bucket(
    store: &SnapshotStore,
    config: &Config,
    bucket_time: i64,
) -> Result<BucketStats, StoreError> {
    let started = Instant::now();

    let rows = with_retry(config.retries, || {
        store.history_window(bucket_time, &OFFSETS_MINUTES)
    })
    .await?;

    let window = group_window(bucket_time, rows);
    let output = compute_bucket_rows(bucket_time, &window, clock::now_ms());

    for chunk in output.rows.chunks(config.insert_batch_size) {
        with_retry(config.retries, || store.upsert_indicators(chunk)).await?;
    }

    if output.assets_skipped > 0 {
        tracing::debug!(
            bucket_time,
            skipped = output.assets_skipped,
            "assets skipped for missing inputs"
        );
    }

    Ok(BucketStats {
        assets_written: output.assets_written,
        assets_skipped: output.assets_skipped,
        indicators_written: output.rows.len(),
        duration_ms: started.elapsed().as_millis() as i64,
    })
}

async fn with_retry<T, F, Fut>(retries: u32, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let retries = retries.max(1);
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < retries => {
                let wait = backoff::delay(attempt, None, DB_BACKOFF_CAP);
                tracing::warn!(
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "store operation failed, retrying: {}",
                    e
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: i64 = 180_000;
    const T: i64 = 1_700_000_000_000 - (1_700_000_000_000 % BUCKET);

    #[test]
    fn cold_start_resumes_after_existing_indicators() {
        assert_eq!(initial_watermark(T, Some(T - 2 * BUCKET), BUCKET), T - 2 * BUCKET);
    }

    #[test]
    fn cold_start_with_empty_indicator_table_processes_one_bucket() {
        // last = latest - Δ means exactly the latest bucket gets computed.
        let last = initial_watermark(T, None, BUCKET);
        assert_eq!(last, T - BUCKET);
        assert_eq!(last + BUCKET, T);
    }

    #[test]
    fn catch_up_walks_buckets_in_order() {
        // Engine behind by five buckets advances strictly by Δ.
        let latest = T;
        let mut last = T - 5 * BUCKET;
        let mut visited = Vec::new();
        while last < latest {
            let next = last + BUCKET;
            visited.push(next);
            last = next;
        }
        assert_eq!(
            visited,
            vec![
                T - 4 * BUCKET,
                T - 3 * BUCKET,
                T - 2 * BUCKET,
                T - BUCKET,
                T
            ]
        );
        assert!(visited.windows(2).all(|w| w[1] == w[0] + BUCKET));
    }
}
