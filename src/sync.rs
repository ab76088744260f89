//! Lesson progress synchronizer.
//!
//! One `LessonSynchronizer` runs per (account, lesson) while the lesson is
//! open. It owns:
//!   - the catalog subscription and loader state
//!   - the completion tracker and its batched flush
//!   - the progress publisher
//!   - the remote progress subscription
//!
//! Observers receive `SyncEvent`s over a broadcast channel. All listeners are
//! torn down by `stop()` (and on drop), so nothing outlives the lesson.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{LessonPrefs, LocalCache};
use crate::catalog::{CatalogLoader, CatalogOutcome, LoaderState};
use crate::config::Timing;
use crate::domain::{
    AudioUnavailable, CompletionSet, LessonSchema, ProgressAggregate, VocabularyItem,
};
use crate::publisher::{ProgressPublisher, ProgressSource, PublishOutcome};
use crate::store::{
    CatalogSnapshot, FlagGroup, LessonProgressDoc, ProgressPatch, RemoteStore, StoreError,
};
use crate::tracker::CompletionTracker;
use crate::util::now_millis;

const EVENT_CAPACITY: usize = 64;

/// Notifications pushed to whoever is presenting the lesson.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    CatalogLoading,
    CatalogLoaded { count: usize },
    CatalogFailed { message: String },
    CompletionChanged { completed: Vec<String> },
    Progress { progress: ProgressAggregate },
    Congratulations { message: String },
    Notice { message: String },
}

/// Result of a completion tap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    Queued,
    AlreadyCompleted,
    UnknownItem,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    #[serde(flatten)]
    pub item: VocabularyItem,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_unavailable: Option<AudioUnavailable>,
}

/// Point-in-time view of a lesson for one account.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSnapshot {
    pub lesson: String,
    pub title: String,
    pub account: String,
    pub loader: LoaderState,
    pub items: Vec<ItemView>,
    pub progress: ProgressAggregate,
    pub congratulated: bool,
}

/// Aborts the listener task when dropped.
struct Listener(JoinHandle<()>);

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SyncCore<S: RemoteStore> {
    schema: Arc<LessonSchema>,
    account: String,
    store: Arc<S>,
    prefs: LessonPrefs,
    loader: Mutex<CatalogLoader>,
    catalog: RwLock<Arc<Vec<VocabularyItem>>>,
    tracker: CompletionTracker,
    publisher: Arc<ProgressPublisher<S>>,
    congratulated: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl<S: RemoteStore> ProgressSource for SyncCore<S> {
    fn progress_state(&self) -> (Arc<Vec<VocabularyItem>>, CompletionSet) {
        (self.catalog(), self.tracker.snapshot())
    }
}

impl<S: RemoteStore> SyncCore<S> {
    fn catalog(&self) -> Arc<Vec<VocabularyItem>> {
        self.catalog
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine; the lesson may be driven over plain HTTP.
        let _ = self.events.send(event);
    }

    fn emit_completion(&self) {
        let completed = self.tracker.snapshot().into_iter().collect();
        self.emit(SyncEvent::CompletionChanged { completed });
    }

    async fn publish(self: &Arc<Self>) -> PublishOutcome {
        let source: Arc<dyn ProgressSource> = self.clone();
        let outcome = self.publisher.publish(source).await;
        if let PublishOutcome::Published(progress) = &outcome {
            self.emit(SyncEvent::Progress { progress: progress.clone() });
        }
        outcome
    }

    /// Congratulate once per completion. Returns true when this call showed it.
    fn check_congratulations(&self) -> bool {
        let (catalog, completed) = self.progress_state();
        if !ProgressAggregate::compute(&catalog, &completed, 0).is_complete {
            return false;
        }
        if self.congratulated.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.prefs.set_congratulated(true);
        info!(target: "lesson", lesson = %self.schema.id, account = %self.account, "Lesson completed");
        self.emit(SyncEvent::Congratulations { message: self.schema.congratulations_message() });
        true
    }

    #[instrument(level = "debug", skip_all, fields(lesson = %self.schema.id))]
    async fn on_catalog(self: &Arc<Self>, snapshot: CatalogSnapshot) {
        let outcome = lock(&self.loader).apply(&snapshot, &self.prefs);
        match outcome {
            CatalogOutcome::Failed { message } => {
                self.emit(SyncEvent::CatalogFailed { message });
            }
            CatalogOutcome::Loaded { items, grew, previous, current } => {
                let count = items.len();
                *self.catalog.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(items);
                self.emit(SyncEvent::CatalogLoaded { count });
                if grew {
                    self.reopen_after_growth(previous, current).await;
                }
                self.restore_completions().await;
            }
        }
    }

    /// New items were added, so a finished lesson is open again.
    async fn reopen_after_growth(&self, previous: u32, current: u32) {
        info!(target: "lesson", lesson = %self.schema.id, previous, current, "New vocabulary items detected, resetting completion status");
        self.congratulated.store(false, Ordering::SeqCst);
        self.prefs.set_congratulated(false);

        let patch = ProgressPatch {
            is_complete: Some(false),
            last_updated: Some(now_millis()),
            ..ProgressPatch::default()
        };
        let written = self
            .store
            .update_progress(&self.account, &self.schema.id, patch)
            .await;
        let flagged = match written {
            Ok(()) => {
                self.store
                    .set_flag(&self.account, FlagGroup::Lessons, &self.schema.course_flag, false)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = flagged {
            warn!(target: "lesson", lesson = %self.schema.id, error = %e, "Failed to reset completion status");
        }
    }

    /// Merge the remote completion list into local state, drop stale
    /// identities, persist, then publish so both sides agree.
    async fn restore_completions(self: &Arc<Self>) {
        let remote = match self.store.read_progress(&self.account, &self.schema.id).await {
            Ok(doc) => Some(doc.and_then(|d| d.completed_items)),
            Err(e) => {
                warn!(target: "lesson", path = %self.schema.progress_path(&self.account), error = %e, "Failed to load progress from cloud");
                self.emit(SyncEvent::Notice { message: "Failed to load progress from cloud".into() });
                None
            }
        };
        let catalog = self.catalog();
        let stale = match &remote {
            Some(Some(items)) => self.tracker.reconcile(items.iter().cloned().collect(), &catalog),
            _ => self.tracker.prune(&catalog),
        };
        if !stale.is_empty() {
            debug!(target: "lesson", lesson = %self.schema.id, removed = stale.len(), "Dropped completions for removed items");
        }
        self.prefs.set_completed(&self.tracker.snapshot());
        self.emit_completion();
        self.check_congratulations();

        if remote.is_some() {
            let outcome = self.publish().await;
            debug!(target: "lesson", ?outcome, "Progress published after restore");
        }
    }

    /// Apply a remote progress push. Ignored until the catalog has loaded
    /// and when the document carries no completion list.
    fn on_remote_progress(&self, doc: LessonProgressDoc) {
        if !lock(&self.loader).is_loaded() {
            debug!(target: "lesson", lesson = %self.schema.id, "Catalog not loaded, skipping progress update");
            return;
        }
        let Some(items) = doc.completed_items else {
            return;
        };
        let before = self.tracker.snapshot();
        let merged = self.tracker.adopt_remote(items.into_iter().collect());
        if merged != before {
            self.prefs.set_completed(&merged);
            self.emit_completion();
        }
        self.check_congratulations();
    }

    /// Drain the queue until nothing is left. A flush that started while
    /// another was sleeping is picked up by the loop, not lost.
    async fn run_flush(self: Arc<Self>) {
        loop {
            if let Some(batch) = self.tracker.flush().await {
                info!(target: "lesson", lesson = %self.schema.id, count = batch.len(), "Processing completion updates");
                self.prefs.set_completed(&self.tracker.snapshot());
                let outcome = self.publish().await;
                debug!(target: "lesson", ?outcome, "Progress published after flush");
                self.check_congratulations();
            }
            if !self.tracker.has_pending() || self.tracker.is_flushing() {
                break;
            }
        }
    }
}

/// Keeps one lesson's completion state in step between the local cache and
/// the remote store.
pub struct LessonSynchronizer<S: RemoteStore> {
    core: Arc<SyncCore<S>>,
    catalog_listener: Mutex<Option<Listener>>,
    progress_listener: Mutex<Option<Listener>>,
    flushes: Mutex<JoinSet<()>>,
}

impl<S: RemoteStore> LessonSynchronizer<S> {
    pub fn new(
        schema: Arc<LessonSchema>,
        account: &str,
        store: Arc<S>,
        cache: Arc<dyn LocalCache>,
        timing: &Timing,
    ) -> Self {
        let prefs = LessonPrefs::new(cache, account, &schema);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let publisher = ProgressPublisher::new(
            store.clone(),
            schema.clone(),
            account.to_string(),
            prefs.clone(),
            events.clone(),
            timing.publish_interval(),
            timing.publish_retry(),
        );
        let core = SyncCore {
            loader: Mutex::new(CatalogLoader::new(&schema, timing.refetch_guard())),
            catalog: RwLock::new(Arc::new(Vec::new())),
            tracker: CompletionTracker::new(prefs.completed(), timing.batch_delay()),
            congratulated: AtomicBool::new(prefs.congratulated()),
            publisher: Arc::new(publisher),
            account: account.to_string(),
            schema,
            store,
            prefs,
            events,
        };
        Self {
            core: Arc::new(core),
            catalog_listener: Mutex::new(None),
            progress_listener: Mutex::new(None),
            flushes: Mutex::new(JoinSet::new()),
        }
    }

    pub fn schema(&self) -> &LessonSchema {
        &self.core.schema
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.core.events.subscribe()
    }

    /// Record that the account opened the lesson, load the catalog and start
    /// listening for remote progress.
    #[instrument(level = "info", skip(self), fields(lesson = %self.core.schema.id, account = %self.core.account))]
    pub async fn start(&self) -> Result<(), StoreError> {
        let core = &self.core;
        let started = ProgressPatch { started: Some(true), ..ProgressPatch::default() };
        if let Err(e) = core.store.update_progress(&core.account, &core.schema.id, started).await {
            warn!(target: "lesson", error = %e, "Failed to track progress");
            core.emit(SyncEvent::Notice { message: "Failed to track progress".into() });
        }

        self.load().await?;

        let rx = core.store.subscribe_progress(&core.account, &core.schema.id).await?;
        *lock(&self.progress_listener) = Some(Listener(tokio::spawn(progress_loop(core.clone(), rx))));
        Ok(())
    }

    /// (Re)subscribe to the catalog. Returns false when suppressed by the
    /// re-fetch guard.
    #[instrument(level = "debug", skip(self), fields(lesson = %self.core.schema.id))]
    pub async fn load(&self) -> Result<bool, StoreError> {
        let core = &self.core;
        if !lock(&core.loader).begin(Instant::now()) {
            return Ok(false);
        }
        core.emit(SyncEvent::CatalogLoading);

        let rx = match core.store.subscribe_catalog(&core.schema.catalog_path).await {
            Ok(rx) => rx,
            Err(e) => {
                let outcome = lock(&core.loader).apply(&Err(e.clone()), &core.prefs);
                if let CatalogOutcome::Failed { message } = outcome {
                    core.emit(SyncEvent::CatalogFailed { message });
                }
                return Err(e);
            }
        };
        *lock(&self.catalog_listener) = Some(Listener(tokio::spawn(catalog_loop(core.clone(), rx))));
        Ok(true)
    }

    /// Manual retry after a failed load.
    pub async fn retry(&self) -> Result<bool, StoreError> {
        info!(target: "lesson", lesson = %self.core.schema.id, "Retrying catalog load");
        self.load().await
    }

    /// Mark one item as learned. The completion reads as done immediately;
    /// the remote write happens after the batch delay.
    pub fn mark_complete(&self, identity: &str) -> MarkOutcome {
        let core = &self.core;
        if !core.catalog().iter().any(|i| i.identity() == identity) {
            return MarkOutcome::UnknownItem;
        }
        if !core.tracker.mark_complete(identity) {
            return MarkOutcome::AlreadyCompleted;
        }
        core.emit_completion();

        let mut flushes = lock(&self.flushes);
        while flushes.try_join_next().is_some() {}
        flushes.spawn(core.clone().run_flush());
        MarkOutcome::Queued
    }

    /// Wipe this account's progress for the lesson, remotely and locally.
    #[instrument(level = "info", skip(self), fields(lesson = %self.core.schema.id, account = %self.core.account))]
    pub async fn reset(&self) -> Result<(), StoreError> {
        let core = &self.core;
        let reset = ProgressPatch::reset(core.catalog().len(), now_millis());
        if let Err(e) = core
            .store
            .reset_lesson(&core.account, &core.schema.id, &core.schema.course_flag, reset)
            .await
        {
            warn!(target: "lesson", error = %e, "Failed to reset progress");
            core.emit(SyncEvent::Notice { message: "Failed to reset progress".into() });
            return Err(e);
        }

        core.tracker.clear();
        core.prefs.clear_progress();
        core.congratulated.store(false, Ordering::SeqCst);
        core.emit_completion();
        core.emit(SyncEvent::Notice { message: "Progress has been reset for this account".into() });
        Ok(())
    }

    #[cfg(test)]
    pub fn is_completed(&self, identity: &str) -> bool {
        self.core.tracker.is_completed(identity)
    }

    pub fn snapshot(&self) -> LessonSnapshot {
        let core = &self.core;
        let (catalog, completed) = core.progress_state();
        let items = catalog
            .iter()
            .map(|item| ItemView {
                completed: completed.contains(item.identity()),
                audio_unavailable: item.audio().err(),
                item: item.clone(),
            })
            .collect();
        LessonSnapshot {
            lesson: core.schema.id.clone(),
            title: core.schema.title.clone(),
            account: core.account.clone(),
            loader: lock(&core.loader).state().clone(),
            items,
            progress: ProgressAggregate::compute(&catalog, &completed, now_millis()),
            congratulated: core.congratulated.load(Ordering::SeqCst),
        }
    }

    /// Tear down every listener and pending write for this lesson.
    pub fn stop(&self) {
        lock(&self.catalog_listener).take();
        lock(&self.progress_listener).take();
        lock(&self.flushes).abort_all();
        self.core.publisher.shutdown();
        debug!(target: "lesson", lesson = %self.core.schema.id, account = %self.core.account, "Synchronizer stopped");
    }
}

impl<S: RemoteStore> Drop for LessonSynchronizer<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn catalog_loop<S: RemoteStore>(core: Arc<SyncCore<S>>, mut rx: watch::Receiver<CatalogSnapshot>) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        core.on_catalog(snapshot).await;
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn progress_loop<S: RemoteStore>(
    core: Arc<SyncCore<S>>,
    mut rx: watch::Receiver<Option<LessonProgressDoc>>,
) {
    loop {
        let doc = rx.borrow_and_update().clone();
        if let Some(doc) = doc {
            core.on_remote_progress(doc);
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}
