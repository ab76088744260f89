//! API-facing error type. Handlers return `Result<_, ApiError>`; the
//! response body is `{"error": "..."}` with a matching status code.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::scoring::ScoringError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  BadRequest(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Scoring(#[from] ScoringError),

  #[error("{0}")]
  Unavailable(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Store(StoreError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
      ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Scoring(ScoringError::MissingReference | ScoringError::RecordingTooShort { .. }) => {
        StatusCode::UNPROCESSABLE_ENTITY
      }
      ApiError::Scoring(_) => StatusCode::BAD_GATEWAY,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }

  /// Text safe to show the learner.
  pub fn message(&self) -> String {
    match self {
      ApiError::Scoring(e) => e.user_message(),
      other => other.to_string(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    warn!(target: "kapamtalk_backend", status = status.as_u16(), error = %self, "Request failed");
    (status, Json(json!({ "error": self.message() }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn statuses_follow_the_failure_kind() {
    assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    assert_eq!(ApiError::from(StoreError::Unavailable("down".into())).status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ApiError::from(StoreError::PermissionDenied("no".into())).status(), StatusCode::FORBIDDEN);
    assert_eq!(ApiError::from(ScoringError::MissingReference).status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(ApiError::from(ScoringError::Network("refused".into())).status(), StatusCode::BAD_GATEWAY);
  }

  #[test]
  fn scoring_errors_use_learner_text() {
    let e = ApiError::from(ScoringError::Network("connection refused".into()));
    assert!(e.message().contains("check your internet connection"));
  }
}
