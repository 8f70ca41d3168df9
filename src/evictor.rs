use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::shutdown::Shutdown;
use crate::table::FlowTable;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Periodically drops flows that have been idle longer than the TTL.
pub struct Evictor {
    table: Arc<FlowTable>,
    ttl: chrono::Duration,
    interval: Duration,
}

impl Evictor {
    pub fn new(table: Arc<FlowTable>, ttl: Duration, interval: Duration) -> Self {
        Evictor {
            table,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
            interval,
        }
    }

    /// One pass over the table. Returns how many flows were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self
            .table
            .keys()
            .iter()
            .filter(|key| self.table.remove_if_idle(key, now, self.ttl))
            .count();

        if removed > 0 {
            info!("Removed {} old connections", removed);
        } else {
            debug!("Sweep found nothing to evict ({} flows)", self.table.len());
        }
        removed
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Evictor started (ttl {}s, every {:?})",
            self.ttl.num_seconds(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
        info!("Evictor stopped");
    }
}
