//! Router assembly: HTTP endpoints, WebSocket upgrade, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (lesson events for one account and lesson)
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); tighten for production
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/lessons", get(http::http_list_lessons))
        .route("/api/v1/lessons/:lesson/open", post(http::http_open_lesson))
        .route("/api/v1/lessons/:lesson/progress", get(http::http_get_progress))
        .route("/api/v1/lessons/:lesson/complete", post(http::http_complete_item))
        .route("/api/v1/lessons/:lesson/retry", post(http::http_retry_lesson))
        .route("/api/v1/lessons/:lesson/reset", post(http::http_reset_lesson))
        .route("/api/v1/lessons/:lesson/close", post(http::http_close_lesson))
        .route("/api/v1/course", get(http::http_course_summary))
        .route("/api/v1/activities", get(http::http_list_activities))
        .route("/api/v1/activities/:activity/start", post(http::http_activity_start))
        .route("/api/v1/activities/:activity/answer", post(http::http_activity_answer))
        .route("/api/v1/activities/:activity/submit", post(http::http_activity_submit))
        .route("/api/v1/activities/:activity/reset", post(http::http_activity_reset))
        .route("/api/v1/exam/start", post(http::http_exam_start))
        .route("/api/v1/exam/evaluate", post(http::http_exam_evaluate))
        .route("/api/v1/exam/advance", post(http::http_exam_advance))
        .route("/api/v1/admin/catalog/*path", post(http::http_put_catalog))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(Arc::new(AppState::from_config(AppConfig::default())))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_and_lesson_list() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (_, body) = call(&app, "GET", "/api/v1/lessons", None).await;
        assert_eq!(body.as_array().map(Vec::len), Some(7));
        assert_eq!(body[6]["catalogPath"], "naturalitems");
    }

    #[tokio::test]
    async fn open_complete_and_unknown_lesson() {
        let app = app();
        let (status, snap) = call(&app, "POST", "/api/v1/lessons/numbers/open", Some(json!({ "account": "u1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["lesson"], "numbers");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (status, out) = call(
            &app,
            "POST",
            "/api/v1/lessons/numbers/complete",
            Some(json!({ "account": "u1", "identity": "Adwa" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["outcome"], "queued");

        let (status, body) = call(&app, "POST", "/api/v1/lessons/cooking/open", Some(json!({ "account": "u1" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("cooking"));
    }

    #[tokio::test]
    async fn admin_catalog_and_course_summary() {
        let app = app();
        let (status, out) = call(
            &app,
            "POST",
            "/api/v1/admin/catalog/examItems/exam3",
            Some(json!([{ "kapampangan": "Salamat", "english": "Thank you" }])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["path"], "examItems/exam3");
        assert_eq!(out["count"], 1);

        let (status, summary) = call(&app, "GET", "/api/v1/course?account=u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["lessons"]["total"], 7);
        assert_eq!(summary["activities"]["total"], 7);
        assert_eq!(summary["exams"]["completed"], 0);
    }

    #[tokio::test]
    async fn activity_start_answer_submit() {
        let app = app();
        let (_, list) = call(&app, "GET", "/api/v1/activities", None).await;
        assert_eq!(list[1]["id"], "activity2");

        let (status, round) =
            call(&app, "POST", "/api/v1/activities/activity2/start", Some(json!({ "account": "u1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(round["total"], 9);
        assert!(round["questions"][0].get("correctAnswer").is_none());

        let qid = round["questions"][0]["id"].as_str().unwrap().to_string();
        let (status, round) = call(
            &app,
            "POST",
            "/api/v1/activities/activity2/answer",
            Some(json!({ "account": "u1", "questionId": qid, "answer": "Metung" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(round["answered"], 1);

        let (status, out) =
            call(&app, "POST", "/api/v1/activities/activity2/submit", Some(json!({ "account": "u1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["outcome"]["status"], "incomplete");
        assert_eq!(out["outcome"]["total"], 9);

        let (status, _) =
            call(&app, "POST", "/api/v1/activities/cooking/start", Some(json!({ "account": "u1" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
