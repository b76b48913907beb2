//! Background expiry of finalized quotes whose validity has lapsed. Reads already
//! expire lazily; the sweep keeps stored status current for listings and reports.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use proposal_engine::QuoteLifecycle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub async fn sweep_once(lifecycle: &QuoteLifecycle, now: DateTime<Utc>) -> usize {
    match lifecycle.expire_overdue(now).await {
        Ok(0) => {
            debug!(event_name = "quote.expiry.sweep_idle", correlation_id = "expiry-sweep", "no overdue quotes");
            0
        }
        Ok(expired) => {
            info!(
                event_name = "quote.expiry.sweep_completed",
                correlation_id = "expiry-sweep",
                expired,
                "overdue quotes expired"
            );
            expired
        }
        Err(failure) => {
            error!(
                event_name = "quote.expiry.sweep_failed",
                correlation_id = "expiry-sweep",
                error = %failure,
                "expiry sweep failed"
            );
            0
        }
    }
}

/// Runs [`sweep_once`] every `period` until `shutdown` flips to `true`.
pub fn spawn(
    lifecycle: Arc<QuoteLifecycle>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            event_name = "quote.expiry.sweep_started",
            correlation_id = "expiry-sweep",
            period_secs = period.as_secs(),
            "expiry sweep scheduled"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&lifecycle, Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(event_name = "quote.expiry.sweep_stopped", correlation_id = "expiry-sweep", "expiry sweep stopped");
    })
}
