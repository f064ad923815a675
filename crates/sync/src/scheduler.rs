//! Lifecycle owner for pollers and other background tasks.
//!
//! [`Scheduler`] holds a master [`CancellationToken`]. Every task it
//! spawns gets a child token, so [`Scheduler::shutdown`] stops them all
//! at once and then waits (bounded) for each to exit. Poller status
//! receivers are kept so callers can inspect source health.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tacmap_core::entity::EntityKind;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::SnapshotSource;
use crate::poller::{Poller, PollerConfig, PollerStatus};
use crate::store::{ReconciliationStore, Tracked};

/// How long shutdown waits for each task to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Scheduler {
    store: Arc<ReconciliationStore>,
    /// Running tasks indexed by name.
    tasks: RwLock<HashMap<String, ManagedTask>>,
    statuses: RwLock<HashMap<EntityKind, watch::Receiver<PollerStatus>>>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

struct ManagedTask {
    task_handle: JoinHandle<()>,
    /// Per-task token (child of the master token).
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(store: Arc<ReconciliationStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            tasks: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start polling `E` from `source`. One poller per entity kind.
    pub async fn spawn_poller<E: Tracked>(
        &self,
        config: PollerConfig,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<(), SchedulerError> {
        let name = E::KIND.as_str();
        self.ensure_available(name).await?;

        let poller = Poller::<E>::new(config, source, Arc::clone(&self.store));
        self.statuses.write().await.insert(E::KIND, poller.status());

        self.spawn_task(name, move |cancel| poller.run(cancel)).await
    }

    /// Spawn a named task that runs until its token is cancelled.
    pub async fn spawn_task<F, Fut>(&self, name: &str, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_available(name).await?;

        let task_cancel = self.cancel.child_token();
        let fut = task(task_cancel.clone());
        let task_name = name.to_string();
        let task_handle = tokio::spawn(async move {
            tracing::debug!(task = %task_name, "Task started");
            fut.await;
            tracing::debug!(task = %task_name, "Task exited");
        });

        self.tasks.write().await.insert(
            name.to_string(),
            ManagedTask {
                task_handle,
                cancel: task_cancel,
            },
        );
        tracing::info!(task = name, "Scheduled task");
        Ok(())
    }

    /// Latest status of the poller for `kind`.
    pub async fn status(&self, kind: EntityKind) -> Option<PollerStatus> {
        self.statuses
            .read()
            .await
            .get(&kind)
            .map(|rx| rx.borrow().clone())
    }

    /// Status of every poller, in [`EntityKind::ALL`] order.
    pub async fn statuses(&self) -> Vec<PollerStatus> {
        let statuses = self.statuses.read().await;
        EntityKind::ALL
            .iter()
            .filter_map(|kind| statuses.get(kind).map(|rx| rx.borrow().clone()))
            .collect()
    }

    /// Names of tasks that have not yet exited.
    pub async fn running_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|(_, t)| !t.task_handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop a single task. Returns `false` if no such task exists.
    pub async fn stop(&self, name: &str) -> bool {
        let Some(managed) = self.tasks.write().await.remove(name) else {
            return false;
        };
        tracing::info!(task = name, "Stopping task");
        managed.cancel.cancel();
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, managed.task_handle).await;
        true
    }

    /// Gracefully shut down all tasks.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down scheduler");
        self.cancel.cancel();

        let mut tasks = self.tasks.write().await;
        for (name, managed) in tasks.drain() {
            tracing::info!(task = %name, "Stopping task");
            managed.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, managed.task_handle)
                .await
                .is_err()
            {
                tracing::warn!(task = %name, "Task did not exit in time");
            }
        }

        tracing::info!("Scheduler shut down complete");
    }

    // ---- private helpers ----

    async fn ensure_available(&self, name: &str) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        if self.tasks.read().await.contains_key(name) {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }
        Ok(())
    }
}

/// Errors that can occur when scheduling tasks.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A task with this name is already registered.
    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    /// The scheduler has been shut down.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tacmap_core::entity::{PointOfInterest, Target};

    struct StaticSource(&'static str);

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn fetch(&self, _url: &str) -> Result<String, SyncError> {
            Ok(self.0.to_string())
        }
    }

    /// Serves whatever body was last set.
    struct SwitchableSource(Mutex<&'static str>);

    impl SwitchableSource {
        fn set(&self, body: &'static str) {
            *self.0.lock().unwrap() = body;
        }
    }

    #[async_trait]
    impl SnapshotSource for SwitchableSource {
        async fn fetch(&self, _url: &str) -> Result<String, SyncError> {
            Ok(self.0.lock().unwrap().to_string())
        }
    }

    fn config() -> PollerConfig {
        PollerConfig::new("http://test/targets", Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn poller_fills_store_and_reports_status() {
        let store = Arc::new(ReconciliationStore::new());
        let scheduler = Scheduler::new(Arc::clone(&store));
        let source = Arc::new(StaticSource(r#"[{"targetid":1,"x":50.0,"y":22.0}]"#));

        scheduler.spawn_poller::<Target>(config(), source).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.read::<Target>().len(), 1);
        let status = scheduler.status(EntityKind::Target).await.unwrap();
        assert_eq!(status.successes, 1);
        assert!(status.is_healthy());
        assert_eq!(scheduler.statuses().await.len(), 1);
        assert_eq!(scheduler.running_tasks().await, vec!["target".to_string()]);

        scheduler.shutdown().await;
        assert!(scheduler.running_tasks().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn respawned_poller_applies_fresh_snapshots() {
        let store = Arc::new(ReconciliationStore::new());
        let scheduler = Scheduler::new(Arc::clone(&store));
        let source = Arc::new(SwitchableSource(Mutex::new(
            r#"[{"crucialplaceid":1,"x":50.0,"y":22.0}]"#,
        )));
        let places = || PollerConfig::new("http://test/crucialplaces", Duration::from_secs(1));
        let ids = || {
            store
                .read::<PointOfInterest>()
                .iter()
                .map(|p| p.id)
                .collect::<Vec<_>>()
        };

        scheduler
            .spawn_poller::<PointOfInterest>(places(), source.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ids(), vec![1]);
        assert!(store.cycle::<PointOfInterest>() >= 3);

        assert!(scheduler.stop("point_of_interest").await);
        source.set(r#"[{"crucialplaceid":2,"x":51.0,"y":23.0}]"#);
        scheduler
            .spawn_poller::<PointOfInterest>(places(), source.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(ids(), vec![2]);
        let status = scheduler.status(EntityKind::PointOfInterest).await.unwrap();
        assert_eq!(status.successes, 1);
        assert_eq!(status.stale_discards, 0);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_and_post_shutdown_spawns_are_rejected() {
        let scheduler = Scheduler::new(Arc::new(ReconciliationStore::new()));
        let source: Arc<dyn SnapshotSource> = Arc::new(StaticSource("[]"));

        scheduler
            .spawn_poller::<Target>(config(), Arc::clone(&source))
            .await
            .unwrap();
        assert_matches!(
            scheduler.spawn_poller::<Target>(config(), Arc::clone(&source)).await,
            Err(SchedulerError::AlreadyRunning(name)) if name == "target"
        );

        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());
        assert_matches!(
            scheduler.spawn_task("late", |cancel| async move { cancel.cancelled().await }).await,
            Err(SchedulerError::ShuttingDown)
        );
    }

    #[tokio::test]
    async fn stop_cancels_single_task() {
        let scheduler = Scheduler::new(Arc::new(ReconciliationStore::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler
            .spawn_task("waiter", |cancel| async move {
                cancel.cancelled().await;
                let _ = tx.send(());
            })
            .await
            .unwrap();

        assert!(scheduler.stop("waiter").await);
        assert!(rx.await.is_ok());
        assert!(!scheduler.stop("waiter").await);
        assert!(!scheduler.is_shut_down());
    }
}
