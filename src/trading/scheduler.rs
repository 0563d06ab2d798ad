//! Periodic background task that can be stopped between runs.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Runs a job every `period`, starting one period from now.
///
/// Stopping prevents future runs. A run already in progress is never
/// interrupted; [`ScheduledTask::join`] waits for it to finish.
pub struct ScheduledTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    // Fires on stop() and when the handle is dropped.
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *stopped.borrow() {
                    break;
                }
                job().await;
            }

            debug!(task = name, "Scheduled task stopped");
        });

        Self { shutdown, handle }
    }

    /// Cancel future runs.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait for an in-flight run to complete.
    pub async fn join(self) {
        self.stop();
        let _ = self.handle.await;
    }
}
