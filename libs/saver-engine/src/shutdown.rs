//! Ordered shutdown of registered components.
//!
//! Components register under an integer priority. `stop_all` stops every
//! tier in ascending priority; members of one tier stop concurrently and the
//! next tier starts only after the whole tier has finished. A failing
//! component is logged and never blocks the rest.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;

use saver_api::{SaverError, Stoppable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
}

struct Inner {
    tiers: BTreeMap<i32, Vec<Arc<dyn Stoppable>>>,
    state: ShutdownState,
}

/// Outcome of `stop_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    /// Names of components whose stop failed or panicked.
    pub failed: Vec<String>,
}

pub struct ShutdownCoordinator {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        let tiers: BTreeMap<i32, Vec<&str>> = inner
            .tiers
            .iter()
            .map(|(p, comps)| (*p, comps.iter().map(|c| c.name()).collect()))
            .collect();
        f.debug_struct("ShutdownCoordinator")
            .field("state", &inner.state)
            .field("tiers", &tiers)
            .finish()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tiers: BTreeMap::new(),
                state: ShutdownState::Running,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("shutdown coordinator lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn state(&self) -> ShutdownState {
        self.lock().state
    }

    /// Register a component. Lower priorities stop first.
    /// Fails once shutdown has begun.
    pub fn register(&self, priority: i32, component: Arc<dyn Stoppable>) -> Result<(), SaverError> {
        let mut inner = self.lock();
        if inner.state != ShutdownState::Running {
            return Err(SaverError::shutdown(format!(
                "cannot register '{}': shutdown already started",
                component.name()
            )));
        }
        tracing::debug!(component = %component.name(), priority, "registered for shutdown");
        inner.tiers.entry(priority).or_default().push(component);
        Ok(())
    }

    /// Stop every registered component, tier by tier.
    /// Only the first call does anything; later calls return an empty report.
    pub async fn stop_all(&self) -> ShutdownReport {
        let tiers = {
            let mut inner = self.lock();
            if inner.state != ShutdownState::Running {
                return ShutdownReport::default();
            }
            inner.state = ShutdownState::Stopping;
            std::mem::take(&mut inner.tiers)
        };

        let mut report = ShutdownReport::default();
        for (priority, components) in tiers {
            tracing::info!(priority, components = components.len(), "stopping tier");

            let mut set = JoinSet::new();
            for component in components {
                set.spawn(async move {
                    let name = component.name().to_string();
                    let result = component.stop().await;
                    (name, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => {
                        tracing::info!(component = %name, "stopped");
                        report.stopped += 1;
                    }
                    Ok((name, Err(e))) => {
                        tracing::error!(component = %name, error = %e, "error while stopping");
                        report.failed.push(name);
                    }
                    Err(e) => {
                        tracing::error!(priority, error = %e, "stop task panicked");
                        report.failed.push(format!("<panicked in tier {priority}>"));
                    }
                }
            }
        }

        self.lock().state = ShutdownState::Stopped;
        tracing::info!(stopped = report.stopped, failed = report.failed.len(), "shutdown complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Component {
        name: String,
        log: Log,
        delay: Duration,
        fail: bool,
        panic: bool,
    }

    impl Component {
        fn new(name: &str, log: &Log) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                delay: Duration::ZERO,
                fail: false,
                panic: false,
            }
        }

        fn delay(mut self, ms: u64) -> Self {
            self.delay = Duration::from_millis(ms);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn panicking(mut self) -> Self {
            self.panic = true;
            self
        }

        fn arc(self) -> Arc<dyn Stoppable> {
            Arc::new(self)
        }
    }

    impl Stoppable for Component {
        fn name(&self) -> &str {
            &self.name
        }

        fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("start:{}", self.name));
                tokio::time::sleep(self.delay).await;
                if self.panic {
                    panic!("component {} panicked", self.name);
                }
                self.log.lock().unwrap().push(format!("end:{}", self.name));
                if self.fail {
                    return Err(SaverError::io("component failure"));
                }
                Ok(())
            })
        }
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter().position(|e| e == entry).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn tiers_stop_in_ascending_priority() {
        let log: Log = Arc::default();
        let coordinator = ShutdownCoordinator::new();
        // Registered out of order on purpose.
        coordinator.register(2, Component::new("quota", &log).arc()).unwrap();
        coordinator.register(0, Component::new("source", &log).delay(50).arc()).unwrap();
        coordinator.register(1, Component::new("flush", &log).delay(20).arc()).unwrap();

        let report = coordinator.stop_all().await;
        assert_eq!(report.stopped, 3);
        assert!(report.failed.is_empty());

        let log = log.lock().unwrap().clone();
        assert!(position(&log, "end:source") < position(&log, "start:flush"));
        assert!(position(&log, "end:flush") < position(&log, "start:quota"));
    }

    #[tokio::test(start_paused = true)]
    async fn members_of_a_tier_stop_concurrently() {
        let log: Log = Arc::default();
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(1, Component::new("a", &log).delay(100).arc()).unwrap();
        coordinator.register(1, Component::new("b", &log).delay(100).arc()).unwrap();
        coordinator.register(2, Component::new("c", &log).arc()).unwrap();

        coordinator.stop_all().await;

        let log = log.lock().unwrap().clone();
        // Both members start before either finishes.
        assert!(position(&log, "start:a") < position(&log, "end:b"));
        assert!(position(&log, "start:b") < position(&log, "end:a"));
        assert!(position(&log, "end:a") < position(&log, "start:c"));
        assert!(position(&log, "end:b") < position(&log, "start:c"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_block_later_tiers() {
        let log: Log = Arc::default();
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(0, Component::new("bad", &log).failing().arc()).unwrap();
        coordinator.register(0, Component::new("boom", &log).panicking().arc()).unwrap();
        coordinator.register(1, Component::new("good", &log).arc()).unwrap();

        let report = coordinator.stop_all().await;
        assert_eq!(report.stopped, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.contains(&"bad".to_string()));
        assert!(log.lock().unwrap().contains(&"end:good".to_string()));
    }

    #[tokio::test]
    async fn stop_all_runs_once() {
        let log: Log = Arc::default();
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(0, Component::new("only", &log).arc()).unwrap();

        assert_eq!(coordinator.stop_all().await.stopped, 1);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(coordinator.stop_all().await, ShutdownReport::default());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn register_after_shutdown_is_rejected() {
        let log: Log = Arc::default();
        let coordinator = ShutdownCoordinator::new();
        coordinator.stop_all().await;

        let err = coordinator.register(0, Component::new("late", &log).arc()).unwrap_err();
        assert_eq!(err.kind, saver_api::ErrorKind::Shutdown);
    }

    #[tokio::test]
    async fn empty_coordinator_stops_cleanly() {
        let coordinator = ShutdownCoordinator::default();
        let report = coordinator.stop_all().await;
        assert_eq!(report, ShutdownReport::default());
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }
}
