//! Completion tracking: the completion set, the pending queue, and the
//! single-flight batched flush that drains it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::domain::{CompletionSet, VocabularyItem};
use crate::util::SingleFlight;

#[derive(Default)]
struct Sets {
  completed: CompletionSet,
  pending: Vec<String>,
  /// Marked here but not yet seen in a remote document.
  unsynced: CompletionSet,
}

pub struct CompletionTracker {
  sets: Mutex<Sets>,
  flight: SingleFlight,
  batch_delay: Duration,
}

impl CompletionTracker {
  pub fn new(initial: CompletionSet, batch_delay: Duration) -> Self {
    Self {
      sets: Mutex::new(Sets { completed: initial, ..Sets::default() }),
      flight: SingleFlight::default(),
      batch_delay,
    }
  }

  fn sets(&self) -> MutexGuard<'_, Sets> {
    self.sets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Queue `identity`. Returns false when it is already completed or queued.
  /// The identity reads as completed right away; the queue drives the write.
  pub fn mark_complete(&self, identity: &str) -> bool {
    let mut sets = self.sets();
    if sets.completed.contains(identity) || sets.pending.iter().any(|p| p == identity) {
      return false;
    }
    sets.pending.push(identity.to_string());
    sets.completed.insert(identity.to_string());
    sets.unsynced.insert(identity.to_string());
    debug!(target: "lesson", %identity, "Added to completion queue");
    true
  }

  #[cfg(test)]
  pub fn is_completed(&self, identity: &str) -> bool { self.sets().completed.contains(identity) }

  #[cfg(test)]
  pub fn pending_len(&self) -> usize { self.sets().pending.len() }

  pub fn has_pending(&self) -> bool { !self.sets().pending.is_empty() }

  pub fn is_flushing(&self) -> bool { self.flight.is_busy() }

  pub fn snapshot(&self) -> CompletionSet { self.sets().completed.clone() }

  /// Wait the batch delay, then drain every queued identity in one batch and
  /// merge it into the completion set. Returns `None` when the queue is empty
  /// or another flush holds the flight.
  pub async fn flush(&self) -> Option<Vec<String>> {
    let _guard = self.flight.try_acquire()?;
    if !self.has_pending() {
      return None;
    }
    tokio::time::sleep(self.batch_delay).await;

    let mut sets = self.sets();
    let batch = std::mem::take(&mut sets.pending);
    sets.completed.extend(batch.iter().cloned());
    debug!(target: "lesson", count = batch.len(), "Drained completion queue");
    Some(batch)
  }

  /// Adopt a remote completion set. Local marks the remote side has not
  /// seen yet are kept, so an older push cannot undo a fresh tap.
  pub fn adopt_remote(&self, remote: CompletionSet) -> CompletionSet {
    let mut sets = self.sets();
    sets.unsynced.retain(|id| !remote.contains(id));
    let mut merged = remote;
    merged.extend(sets.pending.iter().cloned());
    merged.extend(sets.unsynced.iter().cloned());
    sets.completed = merged.clone();
    merged
  }

  /// Adopt `remote`, then drop whatever the catalog no longer has.
  /// Returns the identities that were pruned.
  pub fn reconcile(&self, remote: CompletionSet, catalog: &[VocabularyItem]) -> Vec<String> {
    self.adopt_remote(remote);
    self.prune(catalog)
  }

  /// Drop identities that are not in `catalog`; returns the removed ones.
  pub fn prune(&self, catalog: &[VocabularyItem]) -> Vec<String> {
    let current: HashSet<&str> = catalog.iter().map(|i| i.identity()).collect();
    let mut sets = self.sets();
    let stale: Vec<String> = sets
      .completed
      .iter()
      .filter(|id| !current.contains(id.as_str()))
      .cloned()
      .collect();
    for id in &stale {
      sets.completed.remove(id);
    }
    sets.pending.retain(|id| current.contains(id.as_str()));
    sets.unsynced.retain(|id| current.contains(id.as_str()));
    stale
  }

  pub fn clear(&self) {
    let mut sets = self.sets();
    sets.completed.clear();
    sets.pending.clear();
    sets.unsynced.clear();
  }
}
