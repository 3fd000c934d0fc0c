use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::SessionStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    interval: Duration,
}

impl SweeperConfig {
    /// Sweep once a minute.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_interval_seconds(self, seconds: u64) -> Self {
        self.with_interval(Duration::from_secs(seconds))
    }

    /// A zero interval would spin; clamp it to one second.
    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        Self { interval }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that removes expired sessions on a fixed cadence.
///
/// Sweeps run one after another on the same task, so they never overlap. The
/// task holds a weak reference and stops once the store is dropped.
pub fn spawn_sweeper(store: &Arc<SessionStore>, config: SweeperConfig) -> tokio::task::JoinHandle<()> {
    let store: Weak<SessionStore> = Arc::downgrade(store);
    let period = config.normalize().interval();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                debug!("session store dropped, stopping sweeper");
                break;
            };
            let removed = store.sweep().await;
            if removed > 0 {
                info!(removed, "expired sessions swept");
            }
        }
    })
}
