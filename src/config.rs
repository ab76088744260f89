//! Loading service configuration (timings, scoring endpoint, lesson descriptors,
//! optional catalog bank) from TOML.
//!
//! Every section is optional; missing values fall back to the defaults below.
//!
//! ```toml
//! [timing]
//! batch_delay_ms = 300
//! publish_interval_ms = 1000
//!
//! [scoring]
//! base_url = "https://scoring.example"
//!
//! [[catalogs.greetings]]
//! kapampangan = "Mayap a abak"
//! english = "Good morning"
//! sortOrder = 1
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::activity::ActivitySchema;
use crate::domain::LessonSchema;
use crate::seeds::{builtin_activities, builtin_lessons};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read { path: String, source: std::io::Error },
  #[error("failed to parse config file {path}: {source}")]
  Parse { path: String, source: toml::de::Error },
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub timing: Timing,
  pub scoring: ScoringConfig,
  pub exam: ExamConfig,
  pub activity: ActivityConfig,
  /// Overrides the built-in lesson descriptors when non-empty.
  pub lessons: Vec<LessonSchema>,
  /// Overrides the built-in activity question banks when non-empty.
  pub activities: Vec<ActivitySchema>,
  /// Catalog bank for the in-memory store, keyed by catalog path.
  pub catalogs: BTreeMap<String, Vec<Map<String, Value>>>,
  /// JSON file backing the local cache; in-memory when absent.
  pub cache_path: Option<String>,
}

/// Delays used by the lesson synchronizer.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Timing {
  /// Wait before draining the completion queue, so rapid taps share one write.
  pub batch_delay_ms: u64,
  /// Minimum interval between two progress publishes.
  pub publish_interval_ms: u64,
  /// Delay before the single deferred publish runs.
  pub publish_retry_ms: u64,
  /// Catalog loads closer together than this are ignored.
  pub refetch_guard_ms: u64,
}

impl Default for Timing {
  fn default() -> Self {
    Self { batch_delay_ms: 300, publish_interval_ms: 1000, publish_retry_ms: 1500, refetch_guard_ms: 2000 }
  }
}

impl Timing {
  pub fn batch_delay(&self) -> Duration { Duration::from_millis(self.batch_delay_ms) }
  pub fn publish_interval(&self) -> Duration { Duration::from_millis(self.publish_interval_ms) }
  pub fn publish_retry(&self) -> Duration { Duration::from_millis(self.publish_retry_ms) }
  pub fn refetch_guard(&self) -> Duration { Duration::from_millis(self.refetch_guard_ms) }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
  /// Scoring is disabled when no base URL is configured.
  pub base_url: Option<String>,
  pub endpoint: String,
  pub timeout_secs: u64,
  pub min_audio_bytes: usize,
  pub language: String,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      endpoint: "/evaluate".into(),
      timeout_secs: 180,
      min_audio_bytes: 1000,
      language: "kapampangan".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
  pub exam_id: String,
  pub catalog_path: String,
  pub total_questions: usize,
  pub passing_score: f64,
}

impl Default for ExamConfig {
  fn default() -> Self {
    Self {
      exam_id: "exam3".into(),
      catalog_path: "examItems/exam3".into(),
      total_questions: 5,
      passing_score: 70.0,
    }
  }
}

/// Written activity quizzes.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
  pub questions_per_session: usize,
  /// Percentage of correct answers needed to complete an activity.
  pub passing_score: u32,
}

impl Default for ActivityConfig {
  fn default() -> Self {
    Self { questions_per_session: 10, passing_score: 70 }
  }
}

impl AppConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(s)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let shown = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: shown.clone(), source })?;
    Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse { path: shown, source })
  }

  /// Lesson descriptors in effect: configured ones, or the built-in seven.
  pub fn lessons(&self) -> Vec<LessonSchema> {
    if self.lessons.is_empty() { builtin_lessons() } else { self.lessons.clone() }
  }

  pub fn activities(&self) -> Vec<ActivitySchema> {
    if self.activities.is_empty() { builtin_activities() } else { self.activities.clone() }
  }

  /// Environment overrides applied on top of the file (or the defaults).
  fn apply_env(&mut self) {
    if let Ok(url) = std::env::var("SCORING_BASE_URL") {
      self.scoring.base_url = Some(url);
    }
    if let Ok(path) = std::env::var("CACHE_PATH") {
      self.cache_path = Some(path);
    }
  }
}

/// Load `AppConfig` from KAPAMTALK_CONFIG_PATH, then apply env overrides.
/// On any IO/parse error the defaults are used and the error is logged.
pub fn load_config_from_env() -> AppConfig {
  let mut cfg = match std::env::var("KAPAMTALK_CONFIG_PATH") {
    Ok(path) => match AppConfig::load(Path::new(&path)) {
      Ok(cfg) => {
        info!(target: "kapamtalk_backend", %path, lessons = cfg.lessons.len(), catalogs = cfg.catalogs.len(), "Loaded config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "kapamtalk_backend", %path, error = %e, "Failed to load config; using defaults");
        AppConfig::default()
      }
    },
    Err(_) => AppConfig::default(),
  };
  cfg.apply_env();
  cfg
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = AppConfig::from_toml_str("").unwrap();
    assert_eq!(cfg.timing.batch_delay(), Duration::from_millis(300));
    assert_eq!(cfg.timing.publish_interval(), Duration::from_secs(1));
    assert_eq!(cfg.scoring.endpoint, "/evaluate");
    assert!(cfg.scoring.base_url.is_none());
    assert_eq!(cfg.exam.total_questions, 5);
    assert_eq!(cfg.lessons().len(), 7);
    assert_eq!(cfg.activity.questions_per_session, 10);
    assert_eq!(cfg.activity.passing_score, 70);
    assert!(!cfg.activities().is_empty());
  }

  #[test]
  fn parses_activity_bank() {
    let cfg = AppConfig::from_toml_str(
      r#"
      [activity]
      questions_per_session = 2

      [[activities]]
      id = "activity7"
      title = "Plants, Animals, and Objects"

      [[activities.questions]]
      id = "p1"
      text = "What is 'Dog' in Kapampangan?"
      kind = "multiple_choice"
      options = ["Asu", "Pusa", "Bale", "Sampaga"]
      correctAnswer = "Asu"

      [[activities.questions]]
      id = "p2"
      text = "Write the Kapampangan word for 'Cat':"
      kind = "fill_blank"
      correctAnswer = "Pusa"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.activity.questions_per_session, 2);
    assert_eq!(cfg.activity.passing_score, 70);
    let activities = cfg.activities();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].questions[1].kind, crate::activity::QuestionKind::FillBlank);
    assert!(activities[0].questions[1].options.is_empty());
  }

  #[test]
  fn parses_timing_lessons_and_catalog_bank() {
    let cfg = AppConfig::from_toml_str(
      r#"
      [timing]
      batch_delay_ms = 50

      [scoring]
      base_url = "http://127.0.0.1:9000"

      [[lessons]]
      id = "colors"
      title = "Colors"
      catalog_path = "colors"
      course_flag = "lesson8"
      completed_key = "completed_colors"
      congrats_key = "has_shown_colors_congratulations"
      item_count_key = "last_color_item_count"

      [[catalogs.colors]]
      kapampangan = "Malutu"
      english = "Red"
      sortOrder = 2
      "#,
    )
    .unwrap();
    assert_eq!(cfg.timing.batch_delay_ms, 50);
    assert_eq!(cfg.timing.publish_retry_ms, 1500);
    assert_eq!(cfg.scoring.base_url.as_deref(), Some("http://127.0.0.1:9000"));
    assert_eq!(cfg.lessons().len(), 1);
    let colors = &cfg.catalogs["colors"];
    assert_eq!(colors[0]["kapampangan"], "Malutu");
    assert_eq!(colors[0]["sortOrder"], 2);
  }

  #[test]
  fn missing_file_is_a_read_error() {
    let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }
}
