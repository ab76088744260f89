//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - The course summary (lesson, activity and exam flags)
//!   - Written activities: start, answer, submit, reset
//!   - Running the pronunciation exam: start, evaluate an attempt, advance

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{info, instrument, warn};

use crate::activity::{ActivitySession, Submission};
use crate::catalog::parse_items;
use crate::domain::VocabularyItem;
use crate::error::ApiError;
use crate::exam::{Advance, ExamSession};
use crate::protocol::{ActivityOut, AdvanceOut, CourseSummary, EvaluateOut, ExamOut, SubmitOut, Tally};
use crate::state::{require_account, AppState};
use crate::store::{FlagGroup, RemoteStore};
use crate::util::now_millis;

/// Number of activities and exams in the course, counted whether or not
/// they exist here.
pub const COURSE_ACTIVITIES: usize = 7;
pub const COURSE_EXAMS: usize = 7;

fn tally(flags: &BTreeMap<String, bool>, total: usize) -> Tally {
    let completed = flags.values().filter(|v| **v).count();
    let percentage = if total == 0 { 0 } else { completed * 100 / total };
    Tally { completed, total, percentage }
}

#[instrument(level = "info", skip(state))]
pub async fn course_summary(state: &AppState, account: &str) -> Result<CourseSummary, ApiError> {
    let lessons = state.store.read_flags(account, FlagGroup::Lessons).await?;
    let activities = state.store.read_flags(account, FlagGroup::Activities).await?;
    let exams = state.store.read_flags(account, FlagGroup::Exams).await?;
    Ok(CourseSummary {
        lessons: tally(&lessons, state.lessons.len()),
        activities: tally(&activities, COURSE_ACTIVITIES),
        exams: tally(&exams, COURSE_EXAMS),
    })
}

/// Resume the account's saved round for `activity`, or draw a fresh one.
#[instrument(level = "info", skip(state))]
pub async fn start_activity(state: &AppState, account: &str, activity: &str) -> Result<ActivityOut, ApiError> {
    let account = require_account(account)?;
    let schema = state.activity(activity)?;
    let cfg = &state.config.activity;
    let saved = state.store.read_activity_progress(account, &schema.id).await?.unwrap_or_default();
    let flags = state.store.read_flags(account, FlagGroup::Activities).await?;
    let completed = flags.get(&schema.id).copied().unwrap_or(false);

    let resumed = !saved.active_questions.is_empty();
    let session = ActivitySession::restore(
        &schema,
        &saved,
        completed,
        cfg.questions_per_session,
        cfg.passing_score,
        &mut rand::thread_rng(),
    );
    state.store.write_activity_progress(account, &schema.id, session.to_doc(now_millis())).await?;
    info!(target: "activity", %account, activity = %schema.id, questions = session.questions().len(), resumed, completed, "Activity started");

    let out = ActivityOut::from(&session);
    state.activity_sessions.write().await.insert((account.to_string(), schema.id.clone()), session);
    Ok(out)
}

/// Record one answer in the running round. A blank answer clears it.
#[instrument(level = "info", skip(state, answer))]
pub async fn answer_activity(
    state: &AppState,
    account: &str,
    activity: &str,
    question_id: &str,
    answer: &str,
) -> Result<ActivityOut, ApiError> {
    let account = require_account(account)?;
    let (doc, out) = {
        let mut sessions = state.activity_sessions.write().await;
        let session = sessions
            .get_mut(&(account.to_string(), activity.to_string()))
            .ok_or_else(|| ApiError::NotFound("no activity in progress".into()))?;
        if !session.answer(question_id, answer) {
            return Err(ApiError::BadRequest(format!("question {question_id} is not part of this round")));
        }
        (session.to_doc(now_millis()), ActivityOut::from(&*session))
    };
    if let Err(e) = state.store.write_activity_progress(account, activity, doc).await {
        warn!(target: "activity", %account, %activity, error = %e, "Failed to save activity answers");
    }
    Ok(out)
}

/// Grade the round. A first pass sets the activity's course flag.
#[instrument(level = "info", skip(state))]
pub async fn submit_activity(state: &AppState, account: &str, activity: &str) -> Result<SubmitOut, ApiError> {
    let account = require_account(account)?;
    let (outcome, doc, out) = {
        let mut sessions = state.activity_sessions.write().await;
        let session = sessions
            .get_mut(&(account.to_string(), activity.to_string()))
            .ok_or_else(|| ApiError::NotFound("no activity in progress".into()))?;
        let outcome = session.submit();
        (outcome, session.to_doc(now_millis()), ActivityOut::from(&*session))
    };

    if let Submission::Incomplete { answered, total } = outcome {
        info!(target: "activity", %account, %activity, answered, total, "Submission with unanswered questions");
        return Ok(SubmitOut { outcome, activity: out });
    }
    match &outcome {
        Submission::Incomplete { .. } => {}
        Submission::Passed { score, .. } => {
            state.store.set_flag(account, FlagGroup::Activities, activity, true).await?;
            info!(target: "activity", %account, %activity, score, "Activity passed");
        }
        Submission::Failed { score, .. } => {
            info!(target: "activity", %account, %activity, score, "Activity not passed");
        }
        Submission::Review { score, .. } => {
            info!(target: "activity", %account, %activity, score, "Completed activity reviewed");
        }
    }
    state.store.write_activity_progress(account, activity, doc).await?;
    Ok(SubmitOut { outcome, activity: out })
}

/// Throw away the round and its answers, draw new questions and clear the
/// activity's course flag.
#[instrument(level = "info", skip(state))]
pub async fn reset_activity(state: &AppState, account: &str, activity: &str) -> Result<ActivityOut, ApiError> {
    let account = require_account(account)?;
    let schema = state.activity(activity)?;
    let cfg = &state.config.activity;
    let session =
        ActivitySession::new(&schema, cfg.questions_per_session, cfg.passing_score, &mut rand::thread_rng());

    state.store.write_activity_progress(account, &schema.id, session.to_doc(now_millis())).await?;
    state.store.set_flag(account, FlagGroup::Activities, &schema.id, false).await?;
    info!(target: "activity", %account, activity = %schema.id, "Activity reset");

    let out = ActivityOut::from(&session);
    state.activity_sessions.write().await.insert((account.to_string(), schema.id.clone()), session);
    Ok(out)
}

async fn exam_catalog(state: &AppState) -> Result<Vec<VocabularyItem>, ApiError> {
    let rx = state.store.subscribe_catalog(&state.config.exam.catalog_path).await?;
    let snapshot = rx.borrow().clone();
    let items = parse_items(&snapshot?);
    if items.is_empty() {
        return Err(ApiError::Unavailable("No exam questions available. Please check your connection and try again.".into()));
    }
    Ok(items)
}

/// Resume the account's saved exam, or start a fresh one.
#[instrument(level = "info", skip(state))]
pub async fn start_exam(state: &AppState, account: &str) -> Result<ExamOut, ApiError> {
    let cfg = &state.config.exam;
    let catalog = exam_catalog(state).await?;
    let saved = state.store.read_exam_progress(account, &cfg.exam_id).await?;

    let restored = saved
        .as_ref()
        .and_then(|doc| ExamSession::restore(&cfg.exam_id, doc, &catalog, cfg.passing_score));
    let resumed = restored.is_some();
    let session = restored.unwrap_or_else(|| {
        ExamSession::new(&cfg.exam_id, &catalog, cfg.total_questions, cfg.passing_score, &mut rand::thread_rng())
    });

    state.store.write_exam_progress(account, &cfg.exam_id, session.to_doc(now_millis())).await?;
    info!(target: "exam", %account, exam = %cfg.exam_id, questions = session.len(), resumed, "Exam started");
    let out = ExamOut::from(&session);
    state.exams.write().await.insert(account.to_string(), session);
    Ok(out)
}

/// Score one recording for `question` and keep the best result.
#[instrument(level = "info", skip(state, audio_base64), fields(audio_len = audio_base64.len()))]
pub async fn evaluate_attempt(
    state: &AppState,
    account: &str,
    question: usize,
    audio_base64: &str,
    language: Option<&str>,
) -> Result<EvaluateOut, ApiError> {
    let scorer = state
        .scorer
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Pronunciation scoring is not configured.".into()))?;
    let audio = STANDARD
        .decode(audio_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("audioBase64 is not valid base64: {e}")))?;

    // Read the reference without holding the lock over the network call.
    let reference = {
        let exams = state.exams.read().await;
        let session = exams
            .get(account)
            .ok_or_else(|| ApiError::NotFound("no exam in progress".into()))?;
        session
            .question(question)
            .map(|q| q.reference_locator.clone())
            .ok_or_else(|| ApiError::BadRequest(format!("question {question} is out of range")))?
    };
    let language = language.unwrap_or(&scorer.default_language);
    let result = match scorer.evaluate(audio, &reference, language).await {
        Ok(result) => result,
        Err(e) => {
            warn!(target: "exam", %account, question, network = e.is_network(), error = %e, "Pronunciation evaluation failed");
            return Err(e.into());
        }
    };

    let (doc, out) = {
        let mut exams = state.exams.write().await;
        let session = exams
            .get_mut(account)
            .ok_or_else(|| ApiError::NotFound("no exam in progress".into()))?;
        session.record(question, &result);
        let best_score = session.scores().get(question).copied().unwrap_or(result.score);
        let out = EvaluateOut { result, best_score, exam: ExamOut::from(&*session) };
        (session.to_doc(now_millis()), out)
    };
    if let Err(e) = state.store.write_exam_progress(account, &state.config.exam.exam_id, doc).await {
        warn!(target: "exam", %account, error = %e, "Failed to save exam progress");
    }
    Ok(out)
}

/// Move to the next question. Finishing with a passing average sets the
/// exam's course flag.
#[instrument(level = "info", skip(state))]
pub async fn advance_exam(state: &AppState, account: &str) -> Result<AdvanceOut, ApiError> {
    let exam_id = &state.config.exam.exam_id;
    let (outcome, doc, exam) = {
        let mut exams = state.exams.write().await;
        let session = exams
            .get_mut(account)
            .ok_or_else(|| ApiError::NotFound("no exam in progress".into()))?;
        let outcome = session.advance();
        (outcome, session.to_doc(now_millis()), ExamOut::from(&*session))
    };

    match &outcome {
        Advance::Passed { average } => {
            state.store.set_flag(account, FlagGroup::Exams, exam_id, true).await?;
            info!(target: "exam", %account, exam = %exam_id, average, "Exam passed");
        }
        Advance::Failed { average } => {
            info!(target: "exam", %account, exam = %exam_id, average, "Exam not passed; back to first question");
        }
        Advance::Next { .. } => {}
    }
    state.store.write_exam_progress(account, exam_id, doc).await?;
    Ok(AdvanceOut { outcome, exam })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::PronunciationScore;

    #[test]
    fn tally_counts_only_true_flags() {
        let flags: BTreeMap<String, bool> =
            [("lesson1".to_string(), true), ("lesson2".to_string(), false), ("lesson3".to_string(), true)].into();
        assert_eq!(tally(&flags, 7), Tally { completed: 2, total: 7, percentage: 28 });
        assert_eq!(tally(&BTreeMap::new(), 0).percentage, 0);
    }

    #[tokio::test]
    async fn course_summary_reads_both_flag_groups() {
        let state = AppState::from_config(AppConfig::default());
        state.store.set_flag("u1", FlagGroup::Lessons, "lesson1", true).await.unwrap();
        state.store.set_flag("u1", FlagGroup::Lessons, "lesson2", false).await.unwrap();
        state.store.set_flag("u1", FlagGroup::Exams, "exam3", true).await.unwrap();
        state.store.set_flag("u1", FlagGroup::Activities, "activity1", true).await.unwrap();
        state.store.set_flag("u1", FlagGroup::Activities, "activity2", true).await.unwrap();

        let summary = course_summary(&state, "u1").await.unwrap();
        assert_eq!(summary.lessons, Tally { completed: 1, total: 7, percentage: 14 });
        assert_eq!(summary.activities, Tally { completed: 2, total: 7, percentage: 28 });
        assert_eq!(summary.exams, Tally { completed: 1, total: 7, percentage: 14 });
    }

    #[tokio::test]
    async fn exam_resumes_and_passing_sets_flag() {
        let state = AppState::from_config(AppConfig::default());
        let first = start_exam(&state, "u1").await.unwrap();
        assert_eq!(first.questions.len(), 5);

        let again = start_exam(&state, "u1").await.unwrap();
        let ids = |e: &ExamOut| e.questions.iter().map(|q| q.kapampangan.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&again));

        {
            let mut exams = state.exams.write().await;
            let session = exams.get_mut("u1").unwrap();
            for i in 0..session.len() {
                session.record(i, &PronunciationScore { is_correct: true, score: 90.0, feedback: String::new() });
            }
        }
        let mut last = None;
        for _ in 0..5 {
            last = Some(advance_exam(&state, "u1").await.unwrap().outcome);
        }
        assert_eq!(last, Some(Advance::Passed { average: 90.0 }));
        assert_eq!(state.store.flag_now("u1", FlagGroup::Exams, "exam3"), Some(true));
    }

    async fn answer_round(state: &AppState, account: &str, activity: &str, right: usize) {
        let questions = {
            let sessions = state.activity_sessions.read().await;
            let session = sessions.get(&(account.to_string(), activity.to_string())).unwrap();
            session
                .questions()
                .iter()
                .map(|q| (q.id.clone(), q.correct_answer.clone()))
                .collect::<Vec<_>>()
        };
        for (i, (id, correct)) in questions.into_iter().enumerate() {
            let given = if i < right { correct } else { "mali".to_string() };
            answer_activity(state, account, activity, &id, &given).await.unwrap();
        }
    }

    #[tokio::test]
    async fn activity_round_resumes_with_saved_answers() {
        let state = AppState::from_config(AppConfig::default());
        let first = start_activity(&state, "u1", "activity2").await.unwrap();
        assert_eq!(first.total, 9);
        assert!(first.questions.iter().all(|q| q.correct.is_none()));

        let qid = first.questions[0].id.clone();
        let out = answer_activity(&state, "u1", "activity2", &qid, "Metung").await.unwrap();
        assert_eq!(out.answered, 1);
        let err = answer_activity(&state, "u1", "activity2", "zz", "x").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        state.activity_sessions.write().await.clear();
        let again = start_activity(&state, "u1", "activity2").await.unwrap();
        let ids = |a: &ActivityOut| a.questions.iter().map(|q| q.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&again));
        assert_eq!(again.questions[0].answer.as_deref(), Some("Metung"));
    }

    #[tokio::test]
    async fn passing_activity_sets_flag_and_reset_clears_it() {
        let state = AppState::from_config(AppConfig::default());
        start_activity(&state, "u1", "activity1").await.unwrap();
        let early = submit_activity(&state, "u1", "activity1").await.unwrap();
        assert_eq!(early.outcome, Submission::Incomplete { answered: 0, total: 10 });

        answer_round(&state, "u1", "activity1", 6).await;
        let failed = submit_activity(&state, "u1", "activity1").await.unwrap();
        assert_eq!(failed.outcome, Submission::Failed { correct: 6, total: 10, score: 60 });
        assert!(failed.activity.feedback_visible);
        assert_eq!(failed.activity.questions.iter().filter(|q| q.correct == Some(true)).count(), 6);
        assert_eq!(state.store.flag_now("u1", FlagGroup::Activities, "activity1"), None);

        answer_round(&state, "u1", "activity1", 8).await;
        let passed = submit_activity(&state, "u1", "activity1").await.unwrap();
        assert_eq!(passed.outcome, Submission::Passed { correct: 8, total: 10, score: 80 });
        assert_eq!(state.store.flag_now("u1", FlagGroup::Activities, "activity1"), Some(true));

        let fresh = reset_activity(&state, "u1", "activity1").await.unwrap();
        assert_eq!((fresh.answered, fresh.score, fresh.completed), (0, 0, false));
        assert_eq!(state.store.flag_now("u1", FlagGroup::Activities, "activity1"), Some(false));
    }

    #[tokio::test]
    async fn completed_activity_is_reviewed_not_regraded() {
        let state = AppState::from_config(AppConfig::default());
        state.store.set_flag("u1", FlagGroup::Activities, "activity6", true).await.unwrap();
        let out = start_activity(&state, "u1", "activity6").await.unwrap();
        assert!(out.completed);
        let review = submit_activity(&state, "u1", "activity6").await.unwrap();
        assert_eq!(review.outcome, Submission::Review { correct: 0, total: 7, score: 0 });
        assert_eq!(state.store.flag_now("u1", FlagGroup::Activities, "activity6"), Some(true));
    }

    #[tokio::test]
    async fn unknown_activity_and_missing_round() {
        let state = AppState::from_config(AppConfig::default());
        assert!(matches!(start_activity(&state, "u1", "activity9").await, Err(ApiError::NotFound(_))));
        assert!(matches!(submit_activity(&state, "u1", "activity1").await, Err(ApiError::NotFound(_))));
        assert!(matches!(start_activity(&state, " ", "activity1").await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn evaluate_without_scorer_is_unavailable() {
        let state = AppState::from_config(AppConfig::default());
        start_exam(&state, "u1").await.unwrap();
        let err = evaluate_attempt(&state, "u1", 0, "AAAA", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }
}
