//! HTTP endpoint handlers. These are thin wrappers that forward to the lesson
//! sessions and core logic. Each handler is instrumented and logs its
//! parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, Json, response::IntoResponse};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;
use crate::sync::LessonSnapshot;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_list_lessons(State(state): State<Arc<AppState>>) -> Json<Vec<LessonOut>> {
  Json(state.lessons.iter().map(|s| LessonOut::from(s.as_ref())).collect())
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_open_lesson(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<LessonSnapshot>, ApiError> {
  let session = state.open_lesson(&body.account, &lesson).await?;
  Ok(Json(session.snapshot()))
}

#[instrument(level = "info", skip(state), fields(account = %q.account))]
pub async fn http_get_progress(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Query(q): Query<AccountQuery>,
) -> Result<Json<LessonSnapshot>, ApiError> {
  let session = state.open_lesson(&q.account, &lesson).await?;
  Ok(Json(session.snapshot()))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account, identity = %body.identity))]
pub async fn http_complete_item(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Json(body): Json<CompleteIn>,
) -> Result<Json<CompleteOut>, ApiError> {
  let session = state.open_lesson(&body.account, &lesson).await?;
  let outcome = session.mark_complete(&body.identity);
  info!(target: "lesson", %lesson, identity = %body.identity, ?outcome, "HTTP completion");
  Ok(Json(CompleteOut { outcome, snapshot: session.snapshot() }))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_retry_lesson(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<RetryOut>, ApiError> {
  let session = state.open_lesson(&body.account, &lesson).await?;
  let started = session.retry().await?;
  Ok(Json(RetryOut { started, snapshot: session.snapshot() }))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_reset_lesson(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<LessonSnapshot>, ApiError> {
  let session = state.open_lesson(&body.account, &lesson).await?;
  session.reset().await?;
  info!(target: "lesson", %lesson, account = %body.account, "HTTP lesson reset");
  Ok(Json(session.snapshot()))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_close_lesson(
  State(state): State<Arc<AppState>>,
  Path(lesson): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<ClosedOut>, ApiError> {
  let closed = state.close_lesson(&body.account, &lesson).await?;
  Ok(Json(ClosedOut { closed }))
}

#[instrument(level = "info", skip(state), fields(account = %q.account))]
pub async fn http_course_summary(
  State(state): State<Arc<AppState>>,
  Query(q): Query<AccountQuery>,
) -> Result<Json<CourseSummary>, ApiError> {
  Ok(Json(course_summary(&state, &q.account).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_activities(State(state): State<Arc<AppState>>) -> Json<Vec<ActivityListOut>> {
  Json(state.activities.iter().map(|a| ActivityListOut::from(a.as_ref())).collect())
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_activity_start(
  State(state): State<Arc<AppState>>,
  Path(activity): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<ActivityOut>, ApiError> {
  Ok(Json(start_activity(&state, &body.account, &activity).await?))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account, question = %body.question_id))]
pub async fn http_activity_answer(
  State(state): State<Arc<AppState>>,
  Path(activity): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<ActivityOut>, ApiError> {
  Ok(Json(answer_activity(&state, &body.account, &activity, &body.question_id, &body.answer).await?))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_activity_submit(
  State(state): State<Arc<AppState>>,
  Path(activity): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<SubmitOut>, ApiError> {
  let out = submit_activity(&state, &body.account, &activity).await?;
  info!(target: "activity", %activity, account = %body.account, score = out.activity.score, "HTTP activity submitted");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_activity_reset(
  State(state): State<Arc<AppState>>,
  Path(activity): Path<String>,
  Json(body): Json<AccountIn>,
) -> Result<Json<ActivityOut>, ApiError> {
  Ok(Json(reset_activity(&state, &body.account, &activity).await?))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_exam_start(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AccountIn>,
) -> Result<Json<ExamOut>, ApiError> {
  Ok(Json(start_exam(&state, &body.account).await?))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account, question = body.question))]
pub async fn http_exam_evaluate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<EvaluateIn>,
) -> Result<Json<EvaluateOut>, ApiError> {
  let out = evaluate_attempt(&state, &body.account, body.question, &body.audio_base64, body.language.as_deref()).await?;
  info!(target: "exam", account = %body.account, question = body.question, score = %format!("{:.1}", out.result.score), correct = out.result.is_correct, "HTTP exam attempt evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(account = %body.account))]
pub async fn http_exam_advance(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AccountIn>,
) -> Result<Json<AdvanceOut>, ApiError> {
  Ok(Json(advance_exam(&state, &body.account).await?))
}

/// Replace one catalog in the in-memory store. Open sessions see the change
/// through their catalog subscription.
#[instrument(level = "info", skip(state, docs), fields(count = docs.len()))]
pub async fn http_put_catalog(
  State(state): State<Arc<AppState>>,
  Path(path): Path<String>,
  Json(docs): Json<Vec<Map<String, Value>>>,
) -> Json<CatalogOut> {
  let count = docs.len();
  state.store.put_catalog(&path, docs);
  info!(target: "kapamtalk_backend", %path, count, "Catalog replaced");
  Json(CatalogOut { path, count })
}
