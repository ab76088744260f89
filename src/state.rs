//! Application state: configuration, the document store, the local cache,
//! the optional scoring client, and the open lesson, activity and exam sessions.
//!
//! This module owns:
//!   - one `LessonSynchronizer` per (account, lesson) that is open
//!   - one `ActivitySession` per (account, activity) that was started
//!   - one `ExamSession` per account with a running exam
//!   - the in-memory store seeded from built-in catalogs and the TOML bank

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};

use crate::activity::{ActivitySchema, ActivitySession};
use crate::cache::{FileCache, LocalCache, MemoryCache};
use crate::config::{load_config_from_env, AppConfig};
use crate::domain::LessonSchema;
use crate::error::ApiError;
use crate::exam::ExamSession;
use crate::scoring::PronunciationScorer;
use crate::seeds::seed_catalogs;
use crate::store::MemoryStore;
use crate::sync::LessonSynchronizer;

pub type LessonSession = LessonSynchronizer<MemoryStore>;

type SessionKey = (String, String);

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<dyn LocalCache>,
    pub scorer: Option<PronunciationScorer>,
    pub lessons: Vec<Arc<LessonSchema>>,
    pub activities: Vec<Arc<ActivitySchema>>,
    sessions: RwLock<HashMap<SessionKey, Arc<LessonSession>>>,
    pub activity_sessions: RwLock<HashMap<SessionKey, ActivitySession>>,
    pub exams: RwLock<HashMap<String, ExamSession>>,
}

pub fn require_account(account: &str) -> Result<&str, ApiError> {
    let account = account.trim();
    if account.is_empty() {
        return Err(ApiError::BadRequest("account is required".into()));
    }
    Ok(account)
}

impl AppState {
    /// Build state from env: load config, then everything else from it.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        Self::from_config(load_config_from_env())
    }

    pub fn from_config(config: AppConfig) -> Self {
        // Built-in starter catalogs first; the TOML bank replaces them per path.
        let store = Arc::new(MemoryStore::new());
        for (path, docs) in seed_catalogs() {
            store.put_catalog(&path, docs);
        }
        for (path, docs) in &config.catalogs {
            store.put_catalog(path, docs.clone());
        }

        let cache: Arc<dyn LocalCache> = match &config.cache_path {
            Some(path) => match FileCache::open(path) {
                Ok(c) => {
                    info!(target: "kapamtalk_backend", %path, "Local cache backed by file");
                    Arc::new(c)
                }
                Err(e) => {
                    error!(target: "kapamtalk_backend", %path, error = %e, "Failed to open cache file; using memory cache");
                    Arc::new(MemoryCache::new())
                }
            },
            None => Arc::new(MemoryCache::new()),
        };

        let scorer = PronunciationScorer::from_config(&config.scoring);
        if let Some(s) = &scorer {
            info!(target: "kapamtalk_backend", base_url = %s.base_url, language = %s.default_language, "Pronunciation scoring enabled.");
        } else {
            info!(target: "kapamtalk_backend", "Pronunciation scoring disabled (no scoring base URL).");
        }

        let lessons: Vec<Arc<LessonSchema>> = config.lessons().into_iter().map(Arc::new).collect();
        let activities: Vec<Arc<ActivitySchema>> = config.activities().into_iter().map(Arc::new).collect();
        info!(target: "kapamtalk_backend", lessons = lessons.len(), activities = activities.len(), catalogs = config.catalogs.len(), "Startup lesson inventory");

        Self {
            config,
            store,
            cache,
            scorer,
            lessons,
            activities,
            sessions: RwLock::new(HashMap::new()),
            activity_sessions: RwLock::new(HashMap::new()),
            exams: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self, lesson: &str) -> Result<Arc<LessonSchema>, ApiError> {
        self.lessons
            .iter()
            .find(|s| s.id == lesson)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown lesson: {lesson}")))
    }

    pub fn activity(&self, activity: &str) -> Result<Arc<ActivitySchema>, ApiError> {
        self.activities
            .iter()
            .find(|a| a.id == activity)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("unknown activity: {activity}")))
    }

    /// Attach to the account's running session for `lesson`, starting one if
    /// none is open.
    #[instrument(level = "info", skip(self))]
    pub async fn open_lesson(&self, account: &str, lesson: &str) -> Result<Arc<LessonSession>, ApiError> {
        let account = require_account(account)?;
        let schema = self.schema(lesson)?;
        let key = (account.to_string(), schema.id.clone());

        if let Some(s) = { self.sessions.read().await.get(&key).cloned() } {
            return Ok(s);
        }

        // Start outside the lock so one slow store round-trip does not hold up
        // every other open.
        let session = Arc::new(LessonSynchronizer::new(
            schema,
            account,
            self.store.clone(),
            self.cache.clone(),
            &self.config.timing,
        ));
        session.start().await?;

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&key) {
            // A concurrent open won the race; ours is dropped and stops.
            debug!(target: "lesson", %account, %lesson, "Lesson session already opened concurrently");
            return Ok(existing.clone());
        }
        sessions.insert(key, session.clone());
        info!(target: "lesson", %account, %lesson, open = sessions.len(), "Lesson session opened");
        Ok(session)
    }

    /// Stop and forget the session. Returns false when none was open.
    #[instrument(level = "info", skip(self))]
    pub async fn close_lesson(&self, account: &str, lesson: &str) -> Result<bool, ApiError> {
        let account = require_account(account)?;
        let key = (account.to_string(), lesson.to_string());
        let removed = self.sessions.write().await.remove(&key);
        match removed {
            Some(session) => {
                session.stop();
                info!(target: "lesson", %account, %lesson, "Lesson session closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn open_is_idempotent_and_close_stops() {
        let state = AppState::from_config(AppConfig::default());
        let a = state.open_lesson("u1", "greetings").await.unwrap();
        let b = state.open_lesson("u1", "greetings").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(state.open_sessions().await, 1);

        assert!(state.close_lesson("u1", "greetings").await.unwrap());
        assert!(!state.close_lesson("u1", "greetings").await.unwrap());
        assert_eq!(state.open_sessions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_opens_share_one_session() {
        let state = AppState::from_config(AppConfig::default());
        state.store.set_write_delay(std::time::Duration::from_millis(200));
        let (a, b) = tokio::join!(state.open_lesson("u1", "numbers"), state.open_lesson("u1", "numbers"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(state.open_sessions().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_lesson_and_blank_account_are_rejected() {
        let state = AppState::from_config(AppConfig::default());
        assert!(matches!(state.open_lesson("u1", "cooking").await, Err(ApiError::NotFound(_))));
        assert!(matches!(state.open_lesson("  ", "greetings").await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_catalog_loads_for_every_lesson() {
        let state = AppState::from_config(AppConfig::default());
        for schema in state.lessons.clone() {
            let session = state.open_lesson("u1", &schema.id).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            assert!(!session.snapshot().items.is_empty(), "{} has no items", schema.id);
        }
    }
}
