//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::activity::{ActivitySchema, ActivitySession, QuestionKind, Submission};
use crate::domain::{LessonSchema, PronunciationScore, VocabularyItem};
use crate::exam::{Advance, ExamSession};
use crate::sync::{LessonSnapshot, MarkOutcome, SyncEvent};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    MarkComplete { identity: String },
    Retry,
    Reset,
    Snapshot,
}

/// Messages the server sends over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Snapshot { snapshot: LessonSnapshot },
    Event { event: SyncEvent },
    Marked { identity: String, outcome: MarkOutcome },
    Error { message: String },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountIn {
    pub account: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteIn {
    pub account: String,
    pub identity: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteOut {
    pub outcome: MarkOutcome,
    pub snapshot: LessonSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RetryOut {
    /// False when the request fell inside the re-fetch guard.
    pub started: bool,
    pub snapshot: LessonSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ClosedOut {
    pub closed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOut {
    pub id: String,
    pub title: String,
    pub catalog_path: String,
    pub course_flag: String,
}

impl From<&LessonSchema> for LessonOut {
    fn from(s: &LessonSchema) -> Self {
        Self {
            id: s.id.clone(),
            title: s.title.clone(),
            catalog_path: s.catalog_path.clone(),
            course_flag: s.course_flag.clone(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Tally {
    pub completed: usize,
    pub total: usize,
    pub percentage: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CourseSummary {
    pub lessons: Tally,
    pub activities: Tally,
    pub exams: Tally,
}

#[derive(Debug, Serialize)]
pub struct ActivityListOut {
    pub id: String,
    pub title: String,
    pub questions: usize,
}

impl From<&ActivitySchema> for ActivityListOut {
    fn from(a: &ActivitySchema) -> Self {
        Self { id: a.id.clone(), title: a.title.clone(), questions: a.questions.len() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerIn {
    pub account: String,
    pub question_id: String,
    pub answer: String,
}

/// A question as shown to the learner; the right answer is never sent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuestionOut {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub answer: Option<String>,
    /// Only present once the round has been graded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOut {
    pub activity_id: String,
    pub questions: Vec<ActivityQuestionOut>,
    pub answered: usize,
    pub total: usize,
    pub score: u32,
    pub feedback_visible: bool,
    pub completed: bool,
}

impl From<&ActivitySession> for ActivityOut {
    fn from(s: &ActivitySession) -> Self {
        let questions = s
            .questions()
            .iter()
            .map(|q| {
                let answer = s.answer_for(&q.id).map(str::to_string);
                let correct = s
                    .is_feedback_visible()
                    .then(|| answer.as_deref().is_some_and(|a| q.accepts(a)));
                ActivityQuestionOut {
                    id: q.id.clone(),
                    text: q.text.clone(),
                    kind: q.kind,
                    options: q.options.clone(),
                    answer,
                    correct,
                }
            })
            .collect();
        Self {
            activity_id: s.activity_id.clone(),
            questions,
            answered: s.answered_count(),
            total: s.questions().len(),
            score: s.score(),
            feedback_visible: s.is_feedback_visible(),
            completed: s.is_completed(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitOut {
    pub outcome: Submission,
    pub activity: ActivityOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateIn {
    pub account: String,
    /// Question index within the running exam.
    pub question: usize,
    pub audio_base64: String,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestionOut {
    pub index: usize,
    pub kapampangan: String,
    pub english: String,
    pub audio_url: String,
    pub answered: bool,
    pub best_score: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamOut {
    pub exam_id: String,
    pub questions: Vec<ExamQuestionOut>,
    pub current_index: usize,
    pub correct_answers: usize,
    pub average_score: f64,
    pub completed: bool,
}

impl From<&ExamSession> for ExamOut {
    fn from(s: &ExamSession) -> Self {
        let questions = s
            .questions()
            .iter()
            .enumerate()
            .map(|(index, q): (usize, &VocabularyItem)| ExamQuestionOut {
                index,
                kapampangan: q.kapampangan.clone(),
                english: q.english.clone(),
                audio_url: q.audio_url.clone(),
                answered: s.answered()[index],
                best_score: s.scores()[index],
            })
            .collect();
        Self {
            exam_id: s.exam_id.clone(),
            questions,
            current_index: s.current_index(),
            correct_answers: s.correct_answers(),
            average_score: s.average_score(),
            completed: s.is_completed(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOut {
    pub result: PronunciationScore,
    pub best_score: f64,
    pub exam: ExamOut,
}

#[derive(Debug, Serialize)]
pub struct AdvanceOut {
    pub outcome: Advance,
    pub exam: ExamOut,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct CatalogOut {
    pub path: String,
    pub count: usize,
}
