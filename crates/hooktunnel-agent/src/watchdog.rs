//! Lifetime and inactivity timers
//!
//! The watchdog owns no task: [`Watchdog::expired`] is a future the agent
//! races against its connection, so the timers go away with the run on
//! every exit path.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Which timer ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExpiry {
    Total,
    Inactivity,
}

#[derive(Debug)]
pub struct Watchdog {
    total: Option<Duration>,
    inactivity: Option<Duration>,
    started: Instant,
    last_activity: watch::Sender<Instant>,
}

impl Watchdog {
    /// Start both timers now; `None` disables a timer
    pub fn new(total: Option<Duration>, inactivity: Option<Duration>) -> Self {
        let started = Instant::now();
        let (last_activity, _) = watch::channel(started);
        Self {
            total,
            inactivity,
            started,
            last_activity,
        }
    }

    /// Record inbound traffic, restarting the inactivity timer
    pub fn touch(&self) {
        self.last_activity.send_replace(Instant::now());
    }

    /// Resolves when either timer fires
    pub async fn expired(&self) -> WatchdogExpiry {
        let total_deadline = self.total.map(|total| self.started + total);
        let mut activity = self.last_activity.subscribe();

        loop {
            let inactivity_deadline = self
                .inactivity
                .map(|inactivity| *activity.borrow_and_update() + inactivity);

            tokio::select! {
                _ = wait_until(total_deadline) => return WatchdogExpiry::Total,
                _ = wait_until(inactivity_deadline) => return WatchdogExpiry::Inactivity,
                changed = activity.changed() => {
                    // The sender lives in self, so this cannot fail while we run.
                    if changed.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
