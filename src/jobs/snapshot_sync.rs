//! Ingest scheduler and paged fetcher.
//!
//! One tick per bucket boundary produces a complete snapshot of the tracked
//! catalog under a single aligned time. Pages stream through a bounded
//! channel into sub-batch upserts, so peak memory stays at
//! O(sub_batch + concurrency * page_size) regardless of catalog size.
//! Ticks never overlap: the loop is one task and the next boundary is only
//! scheduled after the previous tick resolves.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::entities::coin_data;
use crate::error::FetchError;
use crate::services::backoff;
use crate::services::clock;
use crate::services::coingecko::{normalize_page, CoinGeckoClient, MarketTicker};
use crate::services::monitor::{EventKind, EventLevel, MonitorClient, MonitorEvent};
use crate::services::store::{SnapshotStore, SyncLogEntry};

const DB_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Terminal result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Success,
    Partial,
    Failure,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Success => "success",
            TickOutcome::Partial => "partial",
            TickOutcome::Failure => "failure",
        }
    }

    fn event(&self) -> (EventKind, EventLevel) {
        match self {
            TickOutcome::Success => (EventKind::SyncSuccess, EventLevel::Info),
            TickOutcome::Partial => (EventKind::SyncPartial, EventLevel::Warn),
            TickOutcome::Failure => (EventKind::SyncFailure, EventLevel::Error),
        }
    }
}

/// Everything observed while running one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub aligned_time: i64,
    pub raw_time: i64,
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub batches_failed: u32,
    pub rows_written: u64,
    pub rows_rejected: u32,
    pub deadline_hit: bool,
    pub cancelled: bool,
    pub first_error: Option<String>,
}

impl TickReport {
    fn new(aligned_time: i64, raw_time: i64) -> Self {
        Self {
            aligned_time,
            raw_time,
            ..Default::default()
        }
    }

    fn record_error(&mut self, message: String) {
        if self.first_error.is_none() {
            self.first_error = Some(message);
        }
    }

    pub fn outcome(&self) -> TickOutcome {
        let clean = self.pages_failed == 0
            && self.batches_failed == 0
            && !self.deadline_hit
            && !self.cancelled;
        if clean {
            TickOutcome::Success
        } else if self.rows_written > 0 {
            TickOutcome::Partial
        } else {
            TickOutcome::Failure
        }
    }
}

/// Boundaries that elapsed while a tick was running and will not get their
/// own tick.
pub fn missed_boundaries(tick_aligned: i64, now_aligned: i64, bucket_ms: i64) -> i64 {
    ((now_aligned - tick_aligned) / bucket_ms).max(0)
}

pub fn start_snapshot_sync_job(
    store: SnapshotStore,
    client: CoinGeckoClient,
    monitor: MonitorClient,
    config: Arc<Config>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_scheduler(store, client, monitor, config, shutdown).await;
        tracing::info!("snapshot sync job stopped");
    })
}

async fn run_scheduler(
    store: SnapshotStore,
    client: CoinGeckoClient,
    monitor: MonitorClient,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) {
    // First tick fires immediately: catch-up of the current bucket.
    loop {
        if *shutdown.borrow() {
            break;
        }

        let report = run_tick(&store, &client, &monitor, &config, &mut shutdown).await;
        finalize_tick(&store, &monitor, &report).await;

        if report.cancelled || *shutdown.borrow() {
            break;
        }

        // Schedule the next boundary off the wall clock. A tick that overran
        // one or more boundaries (or a clock jump) lands on the new
        // align(now) and the missed ones are skipped.
        let now = clock::now_ms();
        let current = clock::align(now, config.bucket_ms);
        let missed = missed_boundaries(report.aligned_time, current, config.bucket_ms);
        if missed > 0 {
            monitor.emit(
                MonitorEvent::new(
                    EventKind::Health,
                    EventLevel::Info,
                    format!("skipped {missed} tick boundary(ies) while the previous tick ran"),
                    now,
                )
                .metric("skipped_boundaries", missed),
            );
        }

        let next = current + config.bucket_ms;
        let wait = Duration::from_millis((next - now).max(0) as u64);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_tick(
    store: &SnapshotStore,
    client: &CoinGeckoClient,
    monitor: &MonitorClient,
    config: &Config,
    shutdown: &mut watch::Receiver<bool>,
) -> TickReport {
    let raw_time = clock::now_ms();
    let aligned_time = clock::align(raw_time, config.bucket_ms);
    let started = Instant::now();
    let mut report = TickReport::new(aligned_time, raw_time);

    monitor.emit(
        MonitorEvent::new(
            EventKind::SyncStart,
            EventLevel::Info,
            format!("sync tick started for bucket {aligned_time}"),
            raw_time,
        )
        .metric("aligned_time_ms", aligned_time),
    );

    // Producer: issue pages with bounded concurrency, in order, stopping at
    // the first short page. Results stream through a bounded channel.
    let (tx, mut rx) = mpsc::channel::<(u32, Result<Vec<MarketTicker>, FetchError>)>(
        config.concurrency.max(1),
    );
    let page_size = config.page_size as usize;
    let pages_per_tick = config.pages_per_tick;
    let concurrency = config.concurrency;
    let fetch_client = client.clone();

    let producer = tokio::spawn(async move {
        let mut pages = futures_util::stream::iter(1..=pages_per_tick)
            .map(|page| {
                let client = fetch_client.clone();
                async move { (page, client.fetch_markets_page(page).await) }
            })
            .buffered(concurrency.max(1));

        while let Some((page, result)) = pages.next().await {
            let last_page = matches!(&result, Ok(items) if items.len() < page_size);
            if tx.send((page, result)).await.is_err() {
                break;
            }
            if last_page {
                break;
            }
        }
    });

    let deadline = started + config.tick_deadline();
    let mut buf: Vec<coin_data::Model> = Vec::with_capacity(config.insert_batch_size);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    report.cancelled = true;
                    report.record_error("shutdown requested mid-tick".to_string());
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                report.deadline_hit = true;
                report.record_error(format!(
                    "tick deadline of {:?} exceeded",
                    config.tick_deadline()
                ));
                break;
            }
            msg = rx.recv() => match msg {
                None => break,
                Some((page, Ok(items))) => {
                    report.pages_ok += 1;
                    let (rows, rejected) = normalize_page(items, aligned_time, raw_time);
                    if rejected > 0 {
                        tracing::warn!(page, rejected, "page had rejected rows");
                    }
                    report.rows_rejected += rejected;
                    buf.extend(rows);
                    while buf.len() >= config.insert_batch_size {
                        let batch: Vec<coin_data::Model> =
                            buf.drain(..config.insert_batch_size).collect();
                        flush_batch(store, config, &batch, &mut report).await;
                    }
                }
                Some((page, Err(e))) => {
                    report.pages_failed += 1;
                    report.record_error(format!("page {page}: {e}"));
                    tracing::error!(page, "page failed: {}", e);
                }
            }
        }
    }

    // Committed sub-batches stay committed; on cancellation or deadline the
    // rest of the buffer is dropped.
    if !report.cancelled && !report.deadline_hit && !buf.is_empty() {
        let batch: Vec<coin_data::Model> = std::mem::take(&mut buf);
        flush_batch(store, config, &batch, &mut report).await;
    }

    producer.abort();

    tracing::info!(
        aligned_time,
        pages_ok = report.pages_ok,
        pages_failed = report.pages_failed,
        rows_written = report.rows_written,
        rows_rejected = report.rows_rejected,
        duration_ms = started.elapsed().as_millis() as u64,
        outcome = report.outcome().as_str(),
        "tick finished"
    );

    report
}

async fn flush_batch(
    store: &SnapshotStore,
    config: &Config,
    rows: &[coin_data::Model],
    report: &mut TickReport,
) {
    let retries = config.retries.max(1);
    let mut attempt: u32 = 0;
    loop {
        match store.upsert_snapshots(rows).await {
            Ok(()) => {
                report.rows_written += rows.len() as u64;
                return;
            }
            Err(e) if e.is_transient() && attempt + 1 < retries => {
                let wait = backoff::delay(attempt, None, DB_BACKOFF_CAP);
                tracing::warn!(
                    rows = rows.len(),
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    "sub-batch upsert failed, retrying: {}",
                    e
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                report.batches_failed += 1;
                report.record_error(format!("sub-batch of {} rows: {e}", rows.len()));
                tracing::error!(rows = rows.len(), "sub-batch upsert failed: {}", e);
                return;
            }
        }
    }
}

async fn finalize_tick(store: &SnapshotStore, monitor: &MonitorClient, report: &TickReport) {
    let finished = clock::now_ms();
    let outcome = report.outcome();
    let (kind, level) = outcome.event();
    let duration_ms = finished - report.raw_time;

    // Verify the bucket is durable: every row this tick committed must be
    // visible before the terminal event goes out.
    if report.rows_written > 0 {
        match store.bucket_row_count(report.aligned_time).await {
            Ok(count) if count < report.rows_written => {
                tracing::warn!(
                    aligned_time = report.aligned_time,
                    committed = report.rows_written,
                    visible = count,
                    "bucket verification found fewer rows than were committed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("bucket verification query failed: {}", e),
        }
    }

    monitor.emit(
        MonitorEvent::new(
            kind,
            level,
            format!(
                "sync {} for bucket {}: {} rows across {} page(s)",
                outcome.as_str(),
                report.aligned_time,
                report.rows_written,
                report.pages_ok
            ),
            finished,
        )
        .metric("pages_ok", report.pages_ok)
        .metric("pages_failed", report.pages_failed)
        .metric("rows_written", report.rows_written)
        .metric("duration_ms", duration_ms)
        .metric("aligned_time_ms", report.aligned_time),
    );

    let entry = SyncLogEntry {
        aligned_time: report.aligned_time,
        started_at: report.raw_time,
        finished_at: finished,
        pages_attempted: (report.pages_ok + report.pages_failed) as i32,
        pages_succeeded: report.pages_ok as i32,
        rows_written: report.rows_written as i64,
        status: outcome.as_str().to_string(),
        first_error: report.first_error.clone(),
    };
    if let Err(e) = store.append_sync_log(entry).await {
        tracing::error!("failed to append sync log: {}", e);
    }
}
