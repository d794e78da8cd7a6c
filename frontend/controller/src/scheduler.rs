//! Periodic reconciliation timer.
//!
//! The timer is an owned object: it starts when constructed and stops when
//! [`ReconciliationScheduler::shutdown`] is awaited or the value is dropped.
//! After either, the tick callback is never entered again.

use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct ReconciliationScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ReconciliationScheduler {
    /// Spawns the timer task. `tick` receives the tick number, starting at 1.
    ///
    /// The first tick fires one `period` after spawning. Ticks never overlap:
    /// a slow tick delays the next one and missed ticks are skipped.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut count: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                count += 1;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick(count) => {}
                }
            }
            debug!("Reconciliation timer stopped after {} ticks", count);
        });

        info!("Reconciliation timer started ({}ms period)", period.as_millis());
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancels the timer and waits for its task to finish.
    ///
    /// A tick that is mid-flight is abandoned at its next suspension point.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ReconciliationScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
