//! Periodic throughput reporting.

use anyhow::Context;
use churn_core::ThroughputCounter;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// Drains a [`ThroughputCounter`] once per interval and logs the rate.
pub struct ThroughputReporter {
    counter: ThroughputCounter,
    interval: Duration,
}

/// Running reporter. [`ReporterHandle::finish`] performs the final drain.
pub struct ReporterHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

/// Ops per second over `elapsed`. Zero when no time has passed.
fn rate(ops: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        ops as f64 / secs
    } else {
        0.0
    }
}

impl ThroughputReporter {
    pub fn new(counter: ThroughputCounter, interval: Duration) -> Self {
        Self { counter, interval }
    }

    /// Start background reporting task
    pub fn start(self) -> ReporterHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut last = Instant::now();
            let mut interval_timer = tokio::time::interval_at(last + self.interval, self.interval);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut total = 0;

            loop {
                tokio::select! {
                    now = interval_timer.tick() => {
                        let ops = self.counter.drain();
                        total += ops;
                        info!("{:.0} ops/sec", rate(ops, now.duration_since(last)));
                        last = now;
                    }
                    _ = &mut shutdown_rx => {
                        let ops = self.counter.drain();
                        total += ops;
                        info!("Final interval: {} ops, {} ops total", ops, total);
                        break;
                    }
                }
            }

            total
        });

        ReporterHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl ReporterHandle {
    /// Stop reporting after one last drain. Returns every op drained over
    /// the reporter's lifetime.
    pub async fn finish(self) -> anyhow::Result<u64> {
        let _ = self.shutdown.send(());
        self.task.await.context("Throughput reporter task failed")
    }
}
