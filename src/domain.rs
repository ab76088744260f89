//! Domain models: vocabulary items, lesson schema descriptors, completion sets
//! and the derived progress aggregate.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// Sort order assumed for items that carry none, so they sink to the end.
pub const DEFAULT_SORT_ORDER: i64 = 999;

/// Identities the user has marked done, per lesson and account.
pub type CompletionSet = BTreeSet<String>;

/// One vocabulary entry of a lesson catalog.
/// The Kapampangan term is the identity and must be non-empty.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
  pub kapampangan: String,
  pub english: String,
  #[serde(default)] pub pronunciation: String,
  #[serde(default)] pub usage: String,
  #[serde(default)] pub example: String,
  #[serde(default)] pub translated: String,
  #[serde(default)] pub category: String,
  #[serde(default)] pub audio_url: String,
  #[serde(default)] pub reference_locator: String,
  #[serde(default = "default_sort_order")] pub sort_order: i64,
}

fn default_sort_order() -> i64 { DEFAULT_SORT_ORDER }

impl VocabularyItem {
  pub fn identity(&self) -> &str { &self.kapampangan }

  /// Audio locator for playback. A missing locator is reported separately
  /// from a failed fetch, which only the player can observe.
  pub fn audio(&self) -> Result<&str, AudioUnavailable> {
    let url = self.audio_url.trim();
    if url.is_empty() {
      Err(AudioUnavailable::Missing)
    } else {
      Ok(url)
    }
  }
}

/// Why an item cannot be played back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUnavailable {
  /// The catalog entry has no audio locator at all.
  Missing,
}

/// Describes one lesson: where its catalog lives, where progress is written,
/// which course flag it owns and the local cache keys it uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LessonSchema {
  pub id: String,
  pub title: String,
  pub catalog_path: String,
  pub course_flag: String,
  pub completed_key: String,
  pub congrats_key: String,
  pub item_count_key: String,
}

impl LessonSchema {
  /// Remote document path holding this lesson's progress for `account`.
  pub fn progress_path(&self, account: &str) -> String {
    format!("users/{}/lessons/{}", account, self.id)
  }

  pub fn congratulations_message(&self) -> String {
    format!("Congratulations! You've completed the {} lesson!", self.title)
  }
}

/// Derived completion summary for one lesson and one account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAggregate {
  pub completed: usize,
  pub total: usize,
  pub percentage: f32,
  pub is_complete: bool,
  /// Raw completion set, stale identities included.
  pub completed_items: Vec<String>,
  pub last_updated: u64,
}

impl ProgressAggregate {
  /// Count only the completed identities present in `catalog`.
  pub fn compute(catalog: &[VocabularyItem], completed: &CompletionSet, now_ms: u64) -> Self {
    let current: HashSet<&str> = catalog.iter().map(|i| i.identity()).collect();
    let valid = completed.iter().filter(|id| current.contains(id.as_str())).count();
    let total = current.len();
    let percentage = if total == 0 { 0.0 } else { (valid as f64 * 100.0 / total as f64) as f32 };
    Self {
      completed: valid,
      total,
      percentage,
      is_complete: total > 0 && valid == total,
      completed_items: completed.iter().cloned().collect(),
      last_updated: now_ms,
    }
  }
}

/// Result returned by the pronunciation-scoring service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PronunciationScore {
  pub is_correct: bool,
  pub score: f64,
  pub feedback: String,
}

#[cfg(test)]
pub(crate) fn item(id: &str, order: i64) -> VocabularyItem {
  VocabularyItem {
    kapampangan: id.to_string(),
    english: format!("{id} (en)"),
    pronunciation: String::new(),
    usage: String::new(),
    example: String::new(),
    translated: String::new(),
    category: String::new(),
    audio_url: String::new(),
    reference_locator: format!("ref-{id}"),
    sort_order: order,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn set(ids: &[&str]) -> CompletionSet { ids.iter().map(|s| s.to_string()).collect() }

  #[test]
  fn aggregate_ignores_stale_identities() {
    let catalog = vec![item("a", 1), item("b", 2), item("c", 3)];
    let agg = ProgressAggregate::compute(&catalog, &set(&["a", "gone", "c"]), 42);
    assert_eq!(agg.completed, 2);
    assert_eq!(agg.total, 3);
    assert!(!agg.is_complete);
    assert_eq!(agg.completed_items.len(), 3);
    assert_eq!(agg.last_updated, 42);
  }

  #[test]
  fn four_of_five_is_eighty_percent() {
    let catalog: Vec<_> = (1..=5).map(|i| item(&format!("w{i}"), i)).collect();
    let agg = ProgressAggregate::compute(&catalog, &set(&["w1", "w2", "w3", "w4"]), 0);
    assert_eq!(agg.percentage, 80.0);
    assert!(!agg.is_complete);

    let agg = ProgressAggregate::compute(&catalog, &set(&["w1", "w2", "w3", "w4", "w5"]), 0);
    assert_eq!(agg.percentage, 100.0);
    assert!(agg.is_complete);
  }

  #[test]
  fn empty_catalog_is_never_complete() {
    let agg = ProgressAggregate::compute(&[], &set(&["a"]), 0);
    assert_eq!(agg.total, 0);
    assert_eq!(agg.percentage, 0.0);
    assert!(!agg.is_complete);
  }

  #[test]
  fn missing_audio_is_reported() {
    let mut it = item("a", 1);
    assert_eq!(it.audio(), Err(AudioUnavailable::Missing));
    it.audio_url = "https://cdn.example/a.mp3".into();
    assert_eq!(it.audio(), Ok("https://cdn.example/a.mp3"));
  }
}
