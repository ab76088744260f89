//! Catalog loading: raw documents → validated, ordered vocabulary items, the
//! loader state machine and catalog-growth detection.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::LessonPrefs;
use crate::domain::{LessonSchema, VocabularyItem, DEFAULT_SORT_ORDER};
use crate::store::{CatalogSnapshot, RawDocument};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoaderState {
  Idle,
  Loading,
  Loaded { count: usize },
  Failed { message: String },
}

/// Result of applying one catalog snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum CatalogOutcome {
  Loaded { items: Vec<VocabularyItem>, grew: bool, previous: u32, current: u32 },
  Failed { message: String },
}

fn text(doc: &RawDocument, key: &str) -> Option<String> {
  doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn text_or_empty(doc: &RawDocument, keys: &[&str]) -> String {
  keys.iter().find_map(|k| text(doc, k)).unwrap_or_default()
}

/// Validate one document. Items without a non-empty identity or an English
/// gloss are rejected.
pub fn parse_item(doc: &RawDocument) -> Option<VocabularyItem> {
  let kapampangan = text(doc, "kapampangan").filter(|s| !s.trim().is_empty())?;
  let english = text(doc, "english")?;
  let sort_order = doc
    .get("sortOrder")
    .and_then(Value::as_i64)
    .unwrap_or(DEFAULT_SORT_ORDER);
  Some(VocabularyItem {
    kapampangan,
    english,
    pronunciation: text_or_empty(doc, &["pronunciation"]),
    usage: text_or_empty(doc, &["usage"]),
    example: text_or_empty(doc, &["example"]),
    translated: text_or_empty(doc, &["translated"]),
    category: text_or_empty(doc, &["category"]),
    audio_url: text_or_empty(doc, &["audioUrl"]),
    reference_locator: text_or_empty(doc, &["referencelocator", "referenceLocator"]),
    sort_order,
  })
}

/// Parse, drop invalid and duplicate identities (first wins), then sort by
/// `sort_order` keeping source order for ties.
pub fn parse_items(docs: &[RawDocument]) -> Vec<VocabularyItem> {
  let mut seen = HashSet::new();
  let mut items: Vec<VocabularyItem> = Vec::with_capacity(docs.len());
  for doc in docs {
    match parse_item(doc) {
      Some(item) if seen.insert(item.kapampangan.clone()) => items.push(item),
      Some(item) => warn!(target: "lesson", identity = %item.kapampangan, "Skipping duplicate vocabulary item"),
      None => warn!(target: "lesson", "Skipping invalid vocabulary item - missing required fields"),
    }
  }
  items.sort_by_key(|i| i.sort_order);
  items
}

/// Loader state for one lesson catalog.
pub struct CatalogLoader {
  title: String,
  state: LoaderState,
  last_fetch: Option<Instant>,
  refetch_guard: Duration,
}

impl CatalogLoader {
  pub fn new(schema: &LessonSchema, refetch_guard: Duration) -> Self {
    Self { title: schema.title.clone(), state: LoaderState::Idle, last_fetch: None, refetch_guard }
  }

  pub fn state(&self) -> &LoaderState { &self.state }

  pub fn is_loaded(&self) -> bool { matches!(self.state, LoaderState::Loaded { .. }) }

  /// Enter `Loading`. Returns false for a rapid re-fetch; a manual retry
  /// out of `Failed` is never suppressed.
  pub fn begin(&mut self, now: Instant) -> bool {
    let failed = matches!(self.state, LoaderState::Failed { .. });
    if let Some(last) = self.last_fetch {
      if !failed && now.duration_since(last) < self.refetch_guard {
        debug!(target: "lesson", title = %self.title, "Ignoring rapid re-fetch request");
        return false;
      }
    }
    self.last_fetch = Some(now);
    self.state = LoaderState::Loading;
    true
  }

  pub fn fail(&mut self, message: String) -> CatalogOutcome {
    self.state = LoaderState::Failed { message: message.clone() };
    CatalogOutcome::Failed { message }
  }

  /// Apply a snapshot. Never falls back to cached data: an error or an empty
  /// catalog is a failure. On success the observed document count is
  /// persisted as the new catalog version.
  pub fn apply(&mut self, snapshot: &CatalogSnapshot, prefs: &LessonPrefs) -> CatalogOutcome {
    let docs = match snapshot {
      Ok(docs) => docs,
      Err(e) => {
        warn!(target: "lesson", title = %self.title, error = %e, "Failed to load catalog");
        return self.fail(format!(
          "Error loading {}: {}\nPlease check your connection and try again.",
          self.title, e
        ));
      }
    };

    let items = parse_items(docs);
    if items.is_empty() {
      warn!(target: "lesson", title = %self.title, "No vocabulary items found");
      return self.fail(format!(
        "No {} available. Please check your connection and try again.",
        self.title
      ));
    }

    let previous = prefs.last_item_count();
    let current = u32::try_from(docs.len()).unwrap_or(u32::MAX);
    prefs.set_last_item_count(current);
    let grew = current > previous;
    info!(target: "lesson", title = %self.title, items = items.len(), previous, current, grew, "Catalog loaded");

    self.state = LoaderState::Loaded { count: items.len() };
    CatalogOutcome::Loaded { items, grew, previous, current }
  }
}
