pub mod schedule;
mod task;
pub mod window;


use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gateway::{BookingGateway, GatewayError, NotificationGateway, Session};
use crate::model::{BookingRecord, BookingState, DaySchedule, Epoch};
use crate::notify::Notifier;
use crate::observability;
use crate::store::RecordStore;

use task::{TaskContext, reconcile_record};

/// Tick-scoped cache of observed day schedules, shared by the tick's tasks
/// so records targeting the same date cost one remote query instead of one
/// each. Rebuilt every tick, so it can never serve yesterday's view.
pub(crate) struct ObservationCache {
    days: DashMap<String, Arc<DaySchedule>>,
}

impl ObservationCache {
    fn new() -> Self {
        Self {
            days: DashMap::new(),
        }
    }

    /// Concurrent tasks may race on a miss and fetch the same date twice;
    /// the second insert wins and both results are equally fresh.
    pub(crate) async fn observe(
        &self,
        gateway: &dyn BookingGateway,
        session: &Session,
        date: &str,
    ) -> Result<Arc<DaySchedule>, GatewayError> {
        if let Some(day) = self.days.get(date) {
            return Ok(day.clone());
        }
        let day = Arc::new(gateway.query_schedule(session, "", date).await?);
        self.days.insert(date.to_string(), day.clone());
        Ok(day)
    }
}

/// The per-tick control loop: fan out one task per record, join, apply the
/// cool-down, persist and announce.
pub struct Driver {
    store: Arc<RecordStore>,
    gateway: Arc<dyn BookingGateway>,
    notifier: Notifier,
    config: Arc<RwLock<Config>>,
}

impl Driver {
    pub fn new(
        store: RecordStore,
        gateway: Arc<dyn BookingGateway>,
        notifications: Arc<dyn NotificationGateway>,
        config: Config,
    ) -> Self {
        Self {
            store: Arc::new(store),
            gateway,
            notifier: Notifier::new(notifications),
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// The main loop. Ticks are aligned to the refresh interval; a shutdown
    /// signal is only observed between ticks, so an in-flight tick always
    /// completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        info!("start processing");
        loop {
            self.run_once().await?;

            let cfg = self.config.read().await.clone();
            if cfg.single_run {
                info!("single run done");
                return Ok(());
            }

            let delay = next_aligned_delay(cfg.refresh_interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping after completed tick");
                    return Ok(());
                }
            }
        }
    }

    /// One full cycle: load, reconcile, persist on change, announce.
    pub async fn run_once(&self) -> io::Result<bool> {
        let cfg = Arc::new(self.config.read().await.clone());
        let mut records = self.store.load_all().await?;
        let changed = self.run_tick(&mut records, cfg).await;
        if changed {
            let started = Instant::now();
            self.store.save_all(&records).await?;
            metrics::histogram!(observability::STORE_SAVE_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            self.notifier.announce(&records).await;
        }
        Ok(changed)
    }

    /// Reconcile every record once, concurrently, against an immutable
    /// configuration snapshot. Tasks own their records exclusively and hand
    /// them back through their join handles; nothing shared is mutated
    /// before the join barrier.
    pub async fn run_tick(&self, records: &mut Vec<BookingRecord>, cfg: Arc<Config>) -> bool {
        metrics::counter!(observability::TICKS_TOTAL).increment(1);
        let cache = Arc::new(ObservationCache::new());

        let mut done: Vec<BookingRecord> = Vec::with_capacity(records.len());
        let mut fallbacks = Vec::with_capacity(records.len());
        let mut handles = Vec::with_capacity(records.len());
        for mut record in records.drain(..) {
            record.changed = false;
            if record.state == BookingState::Delete {
                done.push(record);
                continue;
            }
            let ctx = TaskContext {
                cfg: cfg.clone(),
                gateway: self.gateway.clone(),
                cache: cache.clone(),
            };
            let timeout = cfg.task_timeout;
            // Kept so a panicking task loses one tick of progress, not the record.
            fallbacks.push(record.clone());
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                if tokio::time::timeout(timeout, reconcile_record(&mut record, &ctx))
                    .await
                    .is_err()
                {
                    warn!(
                        id = record.id,
                        resource = %record.resource,
                        "reconciliation timed out, record retries next tick"
                    );
                }
                metrics::histogram!(observability::TASK_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                record
            }));
        }

        // The join barrier: no shared write happens before this point.
        let joined = futures::future::join_all(handles).await;

        let now = schedule::now();
        let mut any_changed = false;
        for (fallback, outcome) in fallbacks.into_iter().zip(joined) {
            let mut record = match outcome {
                Ok(record) => record,
                Err(e) => {
                    error!("reconciliation task panicked: {e}");
                    fallback
                }
            };
            if record.changed {
                any_changed = true;
                metrics::counter!(observability::RECORDS_CHANGED_TOTAL).increment(1);
                apply_cooldown(&mut record, now);
                info!(
                    state = %record.state,
                    resource = %record.resource,
                    user = %record.credentials.username,
                    at = %record.date,
                    from = %record.time,
                    next = record.next_eligible,
                    "{}",
                    record.message
                );
            }
            done.push(record);
        }
        *records = done;
        any_changed
    }
}

/// At least 15 minutes on the quarter-hour grid — except for states that
/// want the very next tick (fallback retries, fresh blocks).
fn apply_cooldown(record: &mut BookingRecord, now: Epoch) {
    if record.state.skips_cooldown() {
        record.next_eligible = 0;
    } else if record.next_eligible <= now {
        record.next_eligible = schedule::cooldown_deadline(now);
    }
}

/// Sleep until the next instant aligned to `interval`, the way the tick has
/// always been paced.
fn next_aligned_delay(interval: Duration) -> Duration {
    let interval = interval.as_secs().max(1) as Epoch;
    let now = schedule::now();
    let next = (now / interval + 1) * interval;
    Duration::from_secs((next - now).max(1) as u64)
}
