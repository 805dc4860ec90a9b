use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A named background loop that runs `work` once per `period`.
///
/// Ticks never overlap: the loop awaits each run of `work` before waiting
/// for the next tick, and a late tick is delayed rather than bursted.
/// Cancellation is only observed between ticks, never mid-run.
pub struct PeriodicTask {
    name: String,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl PeriodicTask {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// The first run happens one full `period` after spawning. When `trigger`
    /// is given, a notification runs `work` immediately as well.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        trigger: Option<Arc<Notify>>,
        mut work: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();

        let task_name = name.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(task = %task_name, period_ms = period.as_millis() as u64, "periodic task started");

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => work().await,
                    _ = notified(trigger.as_deref()) => work().await,
                }
            }
            tracing::debug!(task = %task_name, "periodic task stopped");
        });

        Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the loop and wait for an in-flight run to finish.
    /// Subsequent calls return immediately.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = match self.handle.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(task = %self.name, error = %e, "periodic task panicked");
            }
        }
    }
}

async fn notified(trigger: Option<&Notify>) {
    match trigger {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
