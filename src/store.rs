//! Remote document store: lesson catalogs, per-account lesson progress,
//! course flags, activity quiz progress and exam progress.
//!
//! Reads that the app keeps open are push based: subscribing returns a
//! `watch::Receiver` that yields the current value first and every later
//! change after it. `MemoryStore` is the in-process implementation used by the
//! server and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::domain::ProgressAggregate;

/// Errors surfaced by store adapters.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// One raw child document of a catalog collection.
pub type RawDocument = Map<String, Value>;

/// What a catalog subscription delivers: the full collection, or why it failed.
pub type CatalogSnapshot = Result<Vec<RawDocument>, StoreError>;

/// Per-account progress document of one lesson.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressDoc {
  pub completed: usize,
  pub total: usize,
  pub percentage: f32,
  pub is_complete: bool,
  /// Absent until the first publish and after a reset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_items: Option<Vec<String>>,
  pub last_updated: u64,
  pub started: bool,
}

/// Partial update of a `LessonProgressDoc`; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressPatch {
  pub completed: Option<usize>,
  pub total: Option<usize>,
  pub percentage: Option<f32>,
  pub is_complete: Option<bool>,
  pub completed_items: Option<Vec<String>>,
  pub last_updated: Option<u64>,
  pub started: Option<bool>,
}

impl ProgressPatch {
  pub fn from_aggregate(agg: &ProgressAggregate) -> Self {
    Self {
      completed: Some(agg.completed),
      total: Some(agg.total),
      percentage: Some(agg.percentage),
      is_complete: Some(agg.is_complete),
      completed_items: Some(agg.completed_items.clone()),
      last_updated: Some(agg.last_updated),
      started: None,
    }
  }

  /// Values written when the user resets a lesson. The completed list is
  /// removed, not emptied.
  pub fn reset(total: usize, now_ms: u64) -> Self {
    Self {
      completed: Some(0),
      total: Some(total),
      percentage: Some(0.0),
      is_complete: Some(false),
      completed_items: None,
      last_updated: Some(now_ms),
      started: Some(false),
    }
  }

  pub fn apply(&self, doc: &mut LessonProgressDoc) {
    if let Some(v) = self.completed { doc.completed = v; }
    if let Some(v) = self.total { doc.total = v; }
    if let Some(v) = self.percentage { doc.percentage = v; }
    if let Some(v) = self.is_complete { doc.is_complete = v; }
    if let Some(v) = &self.completed_items { doc.completed_items = Some(v.clone()); }
    if let Some(v) = self.last_updated { doc.last_updated = v; }
    if let Some(v) = self.started { doc.started = v; }
  }
}

/// Boolean flag groups under an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlagGroup {
  Lessons,
  Activities,
  Exams,
}

impl FlagGroup {
  pub fn path(self) -> &'static str {
    match self {
      FlagGroup::Lessons => "lessonsProgress",
      FlagGroup::Activities => "activitiesProgress",
      FlagGroup::Exams => "examsProgress",
    }
  }
}

/// Persisted quiz state of one activity for one account.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProgressDoc {
  /// Question ids picked for the current round, in display order.
  pub active_questions: Vec<String>,
  /// Learner answers keyed by question id.
  #[serde(default)]
  pub answers: BTreeMap<String, String>,
  pub score: u32,
  pub total_questions: usize,
  pub feedback_visible: bool,
  pub last_attempt: u64,
}

/// Persisted exam state for one account.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExamProgressDoc {
  pub question_ids: Vec<String>,
  pub answered: Vec<bool>,
  pub scores: Vec<f64>,
  pub current_question_index: usize,
  pub correct_answers: usize,
  pub average_score: f64,
  #[serde(default)]
  pub completed: bool,
  pub last_attempt: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
  async fn subscribe_catalog(&self, path: &str) -> Result<watch::Receiver<CatalogSnapshot>, StoreError>;

  async fn subscribe_progress(
    &self,
    account: &str,
    lesson: &str,
  ) -> Result<watch::Receiver<Option<LessonProgressDoc>>, StoreError>;

  async fn read_progress(&self, account: &str, lesson: &str) -> Result<Option<LessonProgressDoc>, StoreError>;

  async fn update_progress(&self, account: &str, lesson: &str, patch: ProgressPatch) -> Result<(), StoreError>;

  async fn set_flag(&self, account: &str, group: FlagGroup, key: &str, value: bool) -> Result<(), StoreError>;

  async fn read_flags(&self, account: &str, group: FlagGroup) -> Result<BTreeMap<String, bool>, StoreError>;

  /// Reset the lesson document and clear its course flag in one write.
  async fn reset_lesson(
    &self,
    account: &str,
    lesson: &str,
    course_flag: &str,
    reset: ProgressPatch,
  ) -> Result<(), StoreError>;

  async fn read_activity_progress(&self, account: &str, activity: &str) -> Result<Option<ActivityProgressDoc>, StoreError>;

  async fn write_activity_progress(&self, account: &str, activity: &str, doc: ActivityProgressDoc) -> Result<(), StoreError>;

  async fn read_exam_progress(&self, account: &str, exam_id: &str) -> Result<Option<ExamProgressDoc>, StoreError>;

  async fn write_exam_progress(&self, account: &str, exam_id: &str, doc: ExamProgressDoc) -> Result<(), StoreError>;
}

type AccountKey = (String, String);

#[derive(Default)]
struct Inner {
  catalogs: HashMap<String, watch::Sender<CatalogSnapshot>>,
  progress: HashMap<AccountKey, watch::Sender<Option<LessonProgressDoc>>>,
  flags: HashMap<(String, FlagGroup), BTreeMap<String, bool>>,
  activities: HashMap<AccountKey, ActivityProgressDoc>,
  exams: HashMap<AccountKey, ExamProgressDoc>,
}

impl Inner {
  fn catalog(&mut self, path: &str) -> &watch::Sender<CatalogSnapshot> {
    self.catalogs
      .entry(path.to_string())
      .or_insert_with(|| watch::channel(Ok(Vec::new())).0)
  }

  fn progress(&mut self, account: &str, lesson: &str) -> &watch::Sender<Option<LessonProgressDoc>> {
    self.progress
      .entry((account.to_string(), lesson.to_string()))
      .or_insert_with(|| watch::channel(None).0)
  }
}

/// In-process document store with fault injection for tests.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
  fail_reads: AtomicBool,
  fail_writes: AtomicBool,
  write_delay_ms: AtomicU64,
  progress_writes: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn check_readable(&self) -> Result<(), StoreError> {
    if self.fail_reads.load(Ordering::SeqCst) {
      Err(StoreError::Unavailable("reads are failing".into()))
    } else {
      Ok(())
    }
  }

  /// Account documents are only writable for a signed-in account.
  fn check_writable(&self, account: &str) -> Result<(), StoreError> {
    if account.is_empty() {
      return Err(StoreError::PermissionDenied("no account".into()));
    }
    if self.fail_writes.load(Ordering::SeqCst) {
      Err(StoreError::Unavailable("writes are failing".into()))
    } else {
      Ok(())
    }
  }

  async fn write_latency(&self) {
    let ms = self.write_delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
      tokio::time::sleep(Duration::from_millis(ms)).await;
    }
  }

  /// Replace a catalog wholesale and notify subscribers.
  #[instrument(level = "debug", skip(self, docs), fields(count = docs.len()))]
  pub fn put_catalog(&self, path: &str, docs: Vec<RawDocument>) {
    self.lock().catalog(path).send_modify(|snapshot| *snapshot = Ok(docs));
  }

  /// Make a catalog subscription deliver an error.
  #[cfg(test)]
  pub fn fail_catalog(&self, path: &str, error: StoreError) {
    self.lock().catalog(path).send_modify(|snapshot| *snapshot = Err(error));
  }

  #[cfg(test)]
  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  #[cfg(test)]
  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Make every `update_progress` take this long before it lands.
  #[cfg(test)]
  pub fn set_write_delay(&self, delay: Duration) {
    self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
  }

  /// Number of successful `update_progress` calls.
  #[cfg(test)]
  pub fn progress_writes(&self) -> usize {
    self.progress_writes.load(Ordering::SeqCst)
  }

  #[cfg(test)]
  pub fn progress_now(&self, account: &str, lesson: &str) -> Option<LessonProgressDoc> {
    self.lock().progress(account, lesson).borrow().clone()
  }

  #[cfg(test)]
  pub fn flag_now(&self, account: &str, group: FlagGroup, key: &str) -> Option<bool> {
    self.lock()
      .flags
      .get(&(account.to_string(), group))
      .and_then(|m| m.get(key).copied())
  }
}

#[async_trait]
impl RemoteStore for MemoryStore {
  async fn subscribe_catalog(&self, path: &str) -> Result<watch::Receiver<CatalogSnapshot>, StoreError> {
    Ok(self.lock().catalog(path).subscribe())
  }

  async fn subscribe_progress(
    &self,
    account: &str,
    lesson: &str,
  ) -> Result<watch::Receiver<Option<LessonProgressDoc>>, StoreError> {
    Ok(self.lock().progress(account, lesson).subscribe())
  }

  async fn read_progress(&self, account: &str, lesson: &str) -> Result<Option<LessonProgressDoc>, StoreError> {
    self.check_readable()?;
    Ok(self.lock().progress(account, lesson).borrow().clone())
  }

  async fn update_progress(&self, account: &str, lesson: &str, patch: ProgressPatch) -> Result<(), StoreError> {
    self.check_writable(account)?;
    self.write_latency().await;
    self.lock().progress(account, lesson).send_modify(|doc| {
      patch.apply(doc.get_or_insert_with(LessonProgressDoc::default));
    });
    self.progress_writes.fetch_add(1, Ordering::SeqCst);
    debug!(target: "lesson", %account, %lesson, "progress document updated");
    Ok(())
  }

  async fn set_flag(&self, account: &str, group: FlagGroup, key: &str, value: bool) -> Result<(), StoreError> {
    self.check_writable(account)?;
    self.lock()
      .flags
      .entry((account.to_string(), group))
      .or_default()
      .insert(key.to_string(), value);
    debug!(target: "kapamtalk_backend", %account, flag = %format!("{}.{}", group.path(), key), value, "course flag set");
    Ok(())
  }

  async fn read_flags(&self, account: &str, group: FlagGroup) -> Result<BTreeMap<String, bool>, StoreError> {
    self.check_readable()?;
    Ok(self.lock().flags.get(&(account.to_string(), group)).cloned().unwrap_or_default())
  }

  async fn reset_lesson(
    &self,
    account: &str,
    lesson: &str,
    course_flag: &str,
    reset: ProgressPatch,
  ) -> Result<(), StoreError> {
    self.check_writable(account)?;
    let mut inner = self.lock();
    inner.progress(account, lesson).send_modify(|doc| {
      let mut fresh = LessonProgressDoc::default();
      reset.apply(&mut fresh);
      *doc = Some(fresh);
    });
    inner
      .flags
      .entry((account.to_string(), FlagGroup::Lessons))
      .or_default()
      .insert(course_flag.to_string(), false);
    Ok(())
  }

  async fn read_activity_progress(&self, account: &str, activity: &str) -> Result<Option<ActivityProgressDoc>, StoreError> {
    self.check_readable()?;
    Ok(self.lock().activities.get(&(account.to_string(), activity.to_string())).cloned())
  }

  async fn write_activity_progress(&self, account: &str, activity: &str, doc: ActivityProgressDoc) -> Result<(), StoreError> {
    self.check_writable(account)?;
    self.lock().activities.insert((account.to_string(), activity.to_string()), doc);
    Ok(())
  }

  async fn read_exam_progress(&self, account: &str, exam_id: &str) -> Result<Option<ExamProgressDoc>, StoreError> {
    self.check_readable()?;
    Ok(self.lock().exams.get(&(account.to_string(), exam_id.to_string())).cloned())
  }

  async fn write_exam_progress(&self, account: &str, exam_id: &str, doc: ExamProgressDoc) -> Result<(), StoreError> {
    self.check_writable(account)?;
    self.lock().exams.insert((account.to_string(), exam_id.to_string()), doc);
    Ok(())
  }
}
