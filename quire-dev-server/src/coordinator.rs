//! Update coordinator.
//!
//! Owns the current [`SiteModel`] and regenerates it whenever a watched input
//! changes. Regenerations run one at a time on a single worker task; triggers
//! that arrive while one is running are coalesced into one follow-up run, so
//! once triggers stop the installed model always comes from a run that
//! started after the last of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use quire_core::{PrepareError, PrepareOptions, SiteModel, SitePreparer};
use tokio::sync::{mpsc, watch};

use crate::error::DevError;
use crate::trigger::WatchTrigger;

/// Called with the outgoing model right before each regeneration.
pub type PreUpdateObserver = Box<dyn Fn(&Arc<SiteModel>) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerationStats {
    pub completed: u64,
    pub failed: u64,
}

pub struct CoordinatorBuilder {
    preparer: Arc<dyn SitePreparer>,
    source_dir: PathBuf,
    options: PrepareOptions,
    metadata: Option<mpsc::UnboundedReceiver<PathBuf>>,
    observers: Vec<PreUpdateObserver>,
}

impl CoordinatorBuilder {
    pub fn new(preparer: Arc<dyn SitePreparer>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            preparer,
            source_dir: source_dir.into(),
            options: PrepareOptions::default(),
            metadata: None,
            observers: Vec::new(),
        }
    }

    pub fn options(mut self, options: PrepareOptions) -> Self {
        self.options = options;
        self
    }

    /// Paths of pages whose front matter or headings changed in place.
    pub fn metadata_events(mut self, events: mpsc::UnboundedReceiver<PathBuf>) -> Self {
        self.metadata = Some(events);
        self
    }

    pub fn on_options_updated<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Arc<SiteModel>) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Run the first preparation and start the worker.
    ///
    /// # Errors
    ///
    /// Returns [`DevError::Initialization`] when the first preparation fails.
    pub async fn initialize(self) -> Result<UpdateCoordinator, DevError> {
        let model = prepare(&self.preparer, &self.source_dir, self.options)
            .await
            .map_err(DevError::Initialization)?;

        let (model_tx, model_rx) = watch::channel(Arc::new(model));
        let (stats_tx, stats_rx) = watch::channel(RegenerationStats::default());
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        if let Some(events) = self.metadata {
            tokio::spawn(forward_metadata(events, trigger_tx.clone()));
        }

        let worker = Worker {
            preparer: self.preparer,
            source_dir: self.source_dir,
            options: self.options,
            observers: self.observers,
            model_tx,
            stats_tx,
        };
        tokio::spawn(worker.run(trigger_rx));

        Ok(UpdateCoordinator {
            triggers: trigger_tx,
            model: model_rx,
            stats: stats_rx,
        })
    }
}

/// Handle to a running coordinator. Cheap to clone.
#[derive(Clone)]
pub struct UpdateCoordinator {
    triggers: mpsc::UnboundedSender<WatchTrigger>,
    model: watch::Receiver<Arc<SiteModel>>,
    stats: watch::Receiver<RegenerationStats>,
}

impl UpdateCoordinator {
    /// Request a regeneration.
    pub fn trigger(&self, reason: WatchTrigger) {
        if self.triggers.send(reason).is_err() {
            tracing::warn!("Update coordinator is gone, dropping trigger");
        }
    }

    /// The installed model. Always fully formed.
    pub fn current(&self) -> Arc<SiteModel> {
        Arc::clone(&self.model.borrow())
    }

    /// Receiver that is notified on every installed model.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SiteModel>> {
        self.model.clone()
    }

    pub fn stats(&self) -> watch::Receiver<RegenerationStats> {
        self.stats.clone()
    }
}

struct Worker {
    preparer: Arc<dyn SitePreparer>,
    source_dir: PathBuf,
    options: PrepareOptions,
    observers: Vec<PreUpdateObserver>,
    model_tx: watch::Sender<Arc<SiteModel>>,
    stats_tx: watch::Sender<RegenerationStats>,
}

impl Worker {
    async fn run(self, mut triggers: mpsc::UnboundedReceiver<WatchTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            let mut batch = vec![trigger];
            while let Ok(next) = triggers.try_recv() {
                batch.push(next);
            }

            self.regenerate(&batch).await;
        }

        tracing::debug!("Update coordinator stopped");
    }

    async fn regenerate(&self, batch: &[WatchTrigger]) {
        for trigger in batch {
            tracing::debug!(path = %trigger.path().display(), "Re-prepare due to {}", trigger.reason());
        }

        let outgoing = Arc::clone(&self.model_tx.borrow());
        for observer in &self.observers {
            observer(&outgoing);
        }

        match prepare(&self.preparer, &self.source_dir, self.options).await {
            Ok(model) => {
                self.model_tx.send_replace(Arc::new(model));
                self.stats_tx.send_modify(|stats| stats.completed += 1);
            }
            Err(source) => {
                let reason = batch.last().map(WatchTrigger::reason).unwrap_or_default();
                let err = DevError::Regeneration {
                    reason: reason.to_string(),
                    source,
                };
                tracing::error!("{err}");
                self.stats_tx.send_modify(|stats| stats.failed += 1);
            }
        }
    }
}

async fn prepare(
    preparer: &Arc<dyn SitePreparer>,
    source_dir: &Path,
    options: PrepareOptions,
) -> Result<SiteModel, PrepareError> {
    let preparer = Arc::clone(preparer);
    let source_dir = source_dir.to_path_buf();

    tokio::task::spawn_blocking(move || preparer.prepare(&source_dir, options))
        .await
        .unwrap_or_else(|e| Err(PrepareError::Aborted(e.to_string())))
}

async fn forward_metadata(
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    triggers: mpsc::UnboundedSender<WatchTrigger>,
) {
    while let Some(path) = events.recv().await {
        if triggers.send(WatchTrigger::MetadataChanged(path)).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use quire_core::SiteConfig;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    /// Builds models titled after a version counter standing in for the
    /// state of the source tree.
    #[derive(Clone, Default)]
    struct VersionedPreparer {
        version: Arc<AtomicU64>,
        calls: Arc<AtomicU64>,
        fail: Arc<AtomicBool>,
        delay: Duration,
    }

    impl VersionedPreparer {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn set_version(&self, version: u64) {
            self.version.store(version, Ordering::SeqCst);
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SitePreparer for VersionedPreparer {
        fn prepare(&self, source_dir: &Path, _: PrepareOptions) -> Result<SiteModel, PrepareError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let version = self.version.load(Ordering::SeqCst);
            std::thread::sleep(self.delay);

            if self.fail.load(Ordering::SeqCst) {
                return Err(PrepareError::Aborted("malformed config".to_string()));
            }

            let config = SiteConfig {
                title: Some(format!("v{version}")),
                ..SiteConfig::default()
            };
            Ok(SiteModel::new(source_dir.to_path_buf(), config, Vec::new()))
        }
    }

    fn page_added() -> WatchTrigger {
        WatchTrigger::PageAdded(PathBuf::from("new.md"))
    }

    async fn wait_for_stats<F>(coordinator: &UpdateCoordinator, done: F)
    where
        F: Fn(&RegenerationStats) -> bool,
    {
        let mut stats = coordinator.stats();
        tokio::time::timeout(Duration::from_secs(5), stats.wait_for(|s| done(s)))
            .await
            .expect("timed out waiting for regeneration")
            .expect("coordinator stopped");
    }

    #[tokio::test]
    async fn test_initialize_installs_first_model() {
        let preparer = VersionedPreparer::default();
        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .initialize()
            .await
            .unwrap();

        assert_eq!(coordinator.current().title(), "v0");
        assert_eq!(preparer.calls(), 1);
        assert_eq!(*coordinator.stats().borrow(), RegenerationStats::default());
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let preparer = VersionedPreparer::default();
        preparer.fail.store(true, Ordering::SeqCst);

        let result = CoordinatorBuilder::new(Arc::new(preparer), "/site")
            .initialize()
            .await;
        assert!(matches!(result, Err(DevError::Initialization(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_convergence() {
        let preparer = VersionedPreparer::with_delay(Duration::from_millis(30));
        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .initialize()
            .await
            .unwrap();

        for version in 1..=5 {
            preparer.set_version(version);
            coordinator.trigger(page_added());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut model = coordinator.subscribe();
        tokio::time::timeout(Duration::from_secs(5), model.wait_for(|m| m.title() == "v5"))
            .await
            .expect("model never converged")
            .unwrap();

        // Nothing older may land afterwards
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.current().title(), "v5");
        assert!(preparer.calls() <= 6);
    }

    #[tokio::test]
    async fn test_queued_triggers_coalesce() {
        let preparer = VersionedPreparer::with_delay(Duration::from_millis(20));
        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .initialize()
            .await
            .unwrap();

        preparer.set_version(1);
        for _ in 0..5 {
            coordinator.trigger(page_added());
        }

        wait_for_stats(&coordinator, |s| s.completed >= 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(coordinator.stats().borrow().completed, 1);
        assert_eq!(preparer.calls(), 2);
        assert_eq!(coordinator.current().title(), "v1");
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_previous_model() {
        let preparer = VersionedPreparer::default();
        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .initialize()
            .await
            .unwrap();

        preparer.set_version(1);
        preparer.fail.store(true, Ordering::SeqCst);
        coordinator.trigger(WatchTrigger::ConfigChanged(PathBuf::from(".vuepress/config.toml")));
        wait_for_stats(&coordinator, |s| s.failed == 1).await;
        assert_eq!(coordinator.current().title(), "v0");

        // Still live after the failure
        preparer.fail.store(false, Ordering::SeqCst);
        coordinator.trigger(page_added());
        wait_for_stats(&coordinator, |s| s.completed == 1).await;
        assert_eq!(coordinator.current().title(), "v1");
    }

    #[tokio::test]
    async fn test_observers_see_outgoing_snapshot() {
        let preparer = VersionedPreparer::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_observer = Arc::clone(&seen);

        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .on_options_updated(move |model| seen_by_observer.lock().push(model.title().to_string()))
            .initialize()
            .await
            .unwrap();

        preparer.set_version(1);
        coordinator.trigger(page_added());
        wait_for_stats(&coordinator, |s| s.completed == 1).await;

        preparer.set_version(2);
        coordinator.trigger(page_added());
        wait_for_stats(&coordinator, |s| s.completed == 2).await;

        assert_eq!(*seen.lock(), vec!["v0".to_string(), "v1".to_string()]);
    }

    #[tokio::test]
    async fn test_metadata_events_trigger_regeneration() {
        let preparer = VersionedPreparer::default();
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();

        let coordinator = CoordinatorBuilder::new(Arc::new(preparer.clone()), "/site")
            .metadata_events(metadata_rx)
            .initialize()
            .await
            .unwrap();

        preparer.set_version(3);
        metadata_tx.send(PathBuf::from("guide.md")).unwrap();
        wait_for_stats(&coordinator, |s| s.completed == 1).await;
        assert_eq!(coordinator.current().title(), "v3");
    }
}
