//! Progress publishing: the aggregate computed against the current catalog is
//! written to the remote store, throttled and single-flight, and always
//! mirrored to the local cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::LessonPrefs;
use crate::domain::{CompletionSet, LessonSchema, ProgressAggregate, VocabularyItem};
use crate::store::{FlagGroup, ProgressPatch, RemoteStore};
use crate::sync::SyncEvent;
use crate::util::{now_millis, SingleFlight};

/// Supplies the latest catalog and completion set at publish time, so a
/// deferred publish writes the newest state rather than the one it was asked with.
pub trait ProgressSource: Send + Sync + 'static {
  fn progress_state(&self) -> (Arc<Vec<VocabularyItem>>, CompletionSet);
}

#[derive(Clone, Debug, PartialEq)]
pub enum PublishOutcome {
  Published(ProgressAggregate),
  /// Inside the throttle window; one retry is scheduled.
  Deferred,
  /// Another publish is in flight; it publishes again once it finishes.
  Rejected,
  /// Nothing to publish (empty catalog or no account).
  Skipped,
  /// Remote write failed; the local cache was still updated.
  Failed(ProgressAggregate),
}

struct Throttle {
  last_publish: Option<Instant>,
  deferred: Option<JoinHandle<()>>,
}

pub struct ProgressPublisher<S: RemoteStore> {
  store: Arc<S>,
  schema: Arc<LessonSchema>,
  account: String,
  prefs: LessonPrefs,
  events: broadcast::Sender<SyncEvent>,
  flight: SingleFlight,
  /// Set by a rejected call; the in-flight publish re-arms a deferred publish.
  trailing: AtomicBool,
  throttle: Mutex<Throttle>,
  min_interval: Duration,
  retry_delay: Duration,
}

impl<S: RemoteStore> ProgressPublisher<S> {
  pub fn new(
    store: Arc<S>,
    schema: Arc<LessonSchema>,
    account: String,
    prefs: LessonPrefs,
    events: broadcast::Sender<SyncEvent>,
    min_interval: Duration,
    retry_delay: Duration,
  ) -> Self {
    Self {
      store,
      schema,
      account,
      prefs,
      events,
      flight: SingleFlight::default(),
      trailing: AtomicBool::new(false),
      throttle: Mutex::new(Throttle { last_publish: None, deferred: None }),
      min_interval,
      retry_delay,
    }
  }

  fn throttle(&self) -> MutexGuard<'_, Throttle> {
    self.throttle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Publish the current aggregate.
  ///
  /// Calls inside the throttle window collapse into one deferred publish that
  /// runs after `retry_delay` with whatever state is current then. A call
  /// rejected while another publish is in flight is not queued, but the
  /// in-flight publish schedules one more deferred publish when it finishes.
  #[instrument(level = "debug", skip_all, fields(lesson = %self.schema.id, account = %self.account))]
  pub async fn publish(self: &Arc<Self>, source: Arc<dyn ProgressSource>) -> PublishOutcome {
    let Some(flight) = self.flight.try_acquire() else {
      debug!(target: "lesson", "Progress update already in progress, skipping");
      self.trailing.store(true, Ordering::SeqCst);
      // The holder may have finished between the failed acquire and the store.
      if !self.flight.is_busy() && self.trailing.swap(false, Ordering::SeqCst) {
        self.defer(source);
      }
      return PublishOutcome::Rejected;
    };

    let outcome = self.publish_now(&source).await;
    drop(flight);
    if self.trailing.swap(false, Ordering::SeqCst) {
      debug!(target: "lesson", "Progress changed during publish, scheduling another");
      self.defer(source);
    }
    outcome
  }

  async fn publish_now(self: &Arc<Self>, source: &Arc<dyn ProgressSource>) -> PublishOutcome {
    let (catalog, completed) = source.progress_state();
    if catalog.is_empty() || self.account.is_empty() {
      return PublishOutcome::Skipped;
    }

    {
      let now = Instant::now();
      let mut throttle = self.throttle();
      let throttled = throttle
        .last_publish
        .is_some_and(|last| now.duration_since(last) < self.min_interval);
      if throttled {
        debug!(target: "lesson", retry_ms = self.retry_delay.as_millis() as u64, "Throttling rapid progress update");
        self.defer_locked(&mut throttle, source.clone());
        return PublishOutcome::Deferred;
      }
      throttle.last_publish = Some(now);
    }

    let agg = ProgressAggregate::compute(&catalog, &completed, now_millis());
    debug!(target: "lesson", completed = agg.completed, total = agg.total, complete = agg.is_complete, "Updating progress");

    let result = self
      .store
      .update_progress(&self.account, &self.schema.id, ProgressPatch::from_aggregate(&agg))
      .await;
    self.prefs.set_completed(&completed);

    match result {
      Ok(()) => {
        if agg.is_complete {
          if let Err(e) = self
            .store
            .set_flag(&self.account, FlagGroup::Lessons, &self.schema.course_flag, true)
            .await
          {
            warn!(target: "lesson", error = %e, flag = %self.schema.course_flag, "Failed to set course flag");
          }
        }
        info!(target: "lesson", completed = agg.completed, total = agg.total, percentage = agg.percentage, "Progress published");
        PublishOutcome::Published(agg)
      }
      Err(e) => {
        warn!(target: "lesson", error = %e, "Failed to sync progress");
        let _ = self.events.send(SyncEvent::Notice { message: "Failed to sync progress".into() });
        PublishOutcome::Failed(agg)
      }
    }
  }

  fn defer(self: &Arc<Self>, source: Arc<dyn ProgressSource>) {
    let mut throttle = self.throttle();
    self.defer_locked(&mut throttle, source);
  }

  /// Schedule the single deferred publish unless one is already waiting.
  fn defer_locked(self: &Arc<Self>, throttle: &mut Throttle, source: Arc<dyn ProgressSource>) {
    if throttle.deferred.as_ref().is_some_and(|h| !h.is_finished()) {
      return;
    }
    let this = Arc::clone(self);
    throttle.deferred = Some(tokio::spawn(async move {
      tokio::time::sleep(this.retry_delay).await;
      {
        // Leaving the slot empty lets this publish arm the next deferral.
        let mut throttle = this.throttle();
        throttle.last_publish = None;
        throttle.deferred = None;
      }
      let outcome = this.publish(source).await;
      debug!(target: "lesson", ?outcome, "Deferred progress update finished");
    }));
  }

  /// Cancel a pending deferred publish.
  pub fn shutdown(&self) {
    if let Some(handle) = self.throttle().deferred.take() {
      handle.abort();
    }
  }
}
