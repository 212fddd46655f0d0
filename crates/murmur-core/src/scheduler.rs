//! Fixed-period ticker driving the typing expiry sweep.
//!
//! The scheduler owns no typing data. It only calls the sweep it was
//! started with, once per period, until stopped.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// A periodic sweep trigger.
#[derive(Debug)]
pub struct TimeoutScheduler {
    period: Duration,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TimeoutScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: None,
        }
    }

    /// Start calling `sweep` every period. Does nothing if already running.
    ///
    /// The first call happens one period after start.
    pub fn start<F>(&mut self, sweep: F)
    where
        F: Fn() + Send + 'static,
    {
        if self.is_running() {
            return;
        }

        let (shutdown, mut stop) = watch::channel(false);
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        trace!("Typing sweep tick");
                        sweep();
                    }
                }
            }
            debug!("Typing sweep stopped");
        });

        debug!(period_ms = period.as_millis() as u64, "Typing sweep started");
        self.running = Some(Running { shutdown, handle });
    }

    /// Stop the ticker. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            running.handle.abort();
        }
    }

    /// Whether the ticker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// The sweep period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
