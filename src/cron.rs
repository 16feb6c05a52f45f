use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tracing::info;
use ulid::Ulid;

use crate::engine::Engine;
use crate::notify::Notification;

const REMINDER_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const COMPACTOR_INTERVAL: Duration = Duration::from_secs(60);

/// Dispatch reminders not seen before; returns how many went out.
/// `sent` carries the dedup set across sweeps of the same target date.
fn dispatch_new(
    engine: &Engine,
    notifications: Vec<Notification>,
    sent: &mut HashSet<Ulid>,
) -> usize {
    let mut dispatched = 0;
    for notification in notifications {
        if sent.insert(notification.booking_id()) {
            info!(booking = %notification.booking_id(), "reminder due");
            metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
            engine.dispatcher.dispatch(notification);
            dispatched += 1;
        }
    }
    dispatched
}

/// Hourly sweep: every live booking dated tomorrow gets one reminder. The
/// dedup set resets when the target date rolls over, so a booking is
/// reminded at most once per process per day.
pub async fn run_reminders(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(REMINDER_SWEEP_INTERVAL);
    let mut sent: HashSet<Ulid> = HashSet::new();
    let mut sweep_date: Option<NaiveDate> = None;

    loop {
        interval.tick().await;
        let today = chrono::Local::now().date_naive();
        let Some(tomorrow) = today.checked_add_days(Days::new(1)) else {
            continue;
        };
        if sweep_date != Some(tomorrow) {
            sent.clear();
            sweep_date = Some(tomorrow);
        }
        dispatch_new(&engine, engine.collect_due_reminders(tomorrow), &mut sent);
    }
}

/// Compact the WAL once enough appends have accumulated since the last
/// compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACTOR_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!(appends, "WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
