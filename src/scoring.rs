//! Client for the external pronunciation-scoring service.
//!
//! One multipart POST per attempt: the recorded audio plus the reference
//! locator of the phrase being practised. We log sizes and latencies, never
//! the audio itself.

use std::time::{Duration, Instant};

use reqwest::multipart::{Form, Part};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::ScoringConfig;
use crate::domain::PronunciationScore;
use crate::util::trunc_for_log;

#[derive(Debug, Error)]
pub enum ScoringError {
  #[error("no reference audio for this item")]
  MissingReference,

  #[error("recording too short ({bytes} bytes, need at least {min})")]
  RecordingTooShort { bytes: usize, min: usize },

  #[error("network error: {0}")]
  Network(String),

  #[error("scoring server returned HTTP {status}")]
  Server { status: u16, body: String },

  #[error("invalid scoring response: {0}")]
  Decode(String),
}

impl ScoringError {
  pub fn is_network(&self) -> bool { matches!(self, ScoringError::Network(_)) }

  /// Text suitable for showing to the learner.
  pub fn user_message(&self) -> String {
    match self {
      ScoringError::MissingReference => "Reference audio not available for this question.".into(),
      ScoringError::RecordingTooShort { .. } => "Recording too short. Please try again.".into(),
      ScoringError::Network(_) => {
        "Network error. Please check your internet connection and try again.".into()
      }
      ScoringError::Server { status, .. } => format!("Server error ({status}). Please try again later."),
      ScoringError::Decode(_) => "Could not read the evaluation result. Please try again.".into(),
    }
  }
}

#[derive(Deserialize)]
struct ScoreBody {
  is_correct: bool,
  score: f64,
  #[serde(default)]
  feedback: String,
}

#[derive(Clone)]
pub struct PronunciationScorer {
  client: reqwest::Client,
  pub base_url: String,
  endpoint: String,
  min_audio_bytes: usize,
  pub default_language: String,
}

impl PronunciationScorer {
  /// Build the client when a base URL is configured; otherwise scoring is off.
  pub fn from_config(cfg: &ScoringConfig) -> Option<Self> {
    let base_url = cfg.base_url.as_ref()?.trim_end_matches('/').to_string();
    let client = match reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
    {
      Ok(c) => c,
      Err(e) => {
        error!(target: "exam", error = %e, "Failed to build scoring HTTP client");
        return None;
      }
    };
    Some(Self {
      client,
      base_url,
      endpoint: cfg.endpoint.clone(),
      min_audio_bytes: cfg.min_audio_bytes,
      default_language: cfg.language.clone(),
    })
  }

  /// Score one recording against the reference phrase. An incorrect
  /// pronunciation is a successful result with `is_correct == false`.
  #[instrument(level = "info", skip(self, audio), fields(audio_bytes = audio.len(), %reference_locator, %language))]
  pub async fn evaluate(
    &self,
    audio: Vec<u8>,
    reference_locator: &str,
    language: &str,
  ) -> Result<PronunciationScore, ScoringError> {
    if reference_locator.trim().is_empty() {
      return Err(ScoringError::MissingReference);
    }
    if audio.len() < self.min_audio_bytes {
      warn!(target: "exam", bytes = audio.len(), min = self.min_audio_bytes, "Recording too short");
      return Err(ScoringError::RecordingTooShort { bytes: audio.len(), min: self.min_audio_bytes });
    }

    let part = Part::bytes(audio)
      .file_name("audio.wav")
      .mime_str("audio/wav")
      .map_err(|e| ScoringError::Network(e.to_string()))?;
    let form = Form::new()
      .text("language", language.to_string())
      .text("reference_locator", reference_locator.to_string())
      .part("audio", part);

    let url = format!("{}{}", self.base_url, self.endpoint);
    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "kapamtalk-backend/0.1")
      .multipart(form)
      .send()
      .await
      .map_err(|e| {
        error!(target: "exam", elapsed = ?start.elapsed(), error = %e, timeout = e.is_timeout(), "Scoring request failed");
        ScoringError::Network(e.to_string())
      })?;

    let status = res.status();
    let body = res.text().await.map_err(|e| ScoringError::Network(e.to_string()))?;
    if !status.is_success() {
      error!(target: "exam", status = status.as_u16(), body = %trunc_for_log(&body, 300), "Scoring server error");
      return Err(ScoringError::Server { status: status.as_u16(), body });
    }

    let parsed: ScoreBody = serde_json::from_str(&body).map_err(|e| {
      warn!(target: "exam", body = %trunc_for_log(&body, 300), "Unreadable scoring response");
      ScoringError::Decode(e.to_string())
    })?;
    info!(target: "exam", elapsed = ?start.elapsed(), score = parsed.score, correct = parsed.is_correct, "Pronunciation scored");
    Ok(PronunciationScore { is_correct: parsed.is_correct, score: parsed.score, feedback: parsed.feedback })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::{body::Bytes, http::StatusCode, routing::post, Json, Router};
  use serde_json::{json, Value};
  use tokio::net::TcpListener;

  fn scorer(base_url: String) -> PronunciationScorer {
    let cfg = ScoringConfig { base_url: Some(base_url), timeout_secs: 5, ..ScoringConfig::default() };
    PronunciationScorer::from_config(&cfg).unwrap()
  }

  async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
  }

  /// Echo server: correct iff the multipart body names the expected reference.
  async fn echo(body: Bytes) -> Json<Value> {
    let raw = String::from_utf8_lossy(&body);
    let ok = raw.contains("name=\"reference_locator\"")
      && raw.contains("mayap-a-abak")
      && raw.contains("filename=\"audio.wav\"")
      && raw.contains("kapampangan");
    Json(json!({ "is_correct": ok, "score": if ok { 88.5 } else { 12.0 }, "feedback": "Nice" }))
  }

  #[test]
  fn disabled_without_base_url() {
    assert!(PronunciationScorer::from_config(&ScoringConfig::default()).is_none());
  }

  #[tokio::test]
  async fn short_audio_and_missing_reference_are_rejected_locally() {
    let s = scorer("http://127.0.0.1:9".into());
    let err = s.evaluate(vec![0; 10], "ref", "kapampangan").await.unwrap_err();
    assert!(matches!(err, ScoringError::RecordingTooShort { bytes: 10, min: 1000 }));
    let err = s.evaluate(vec![0; 2000], "  ", "kapampangan").await.unwrap_err();
    assert!(matches!(err, ScoringError::MissingReference));
  }

  #[tokio::test]
  async fn posts_multipart_and_decodes_score() {
    let base = serve(Router::new().route("/evaluate", post(echo))).await;
    let score = scorer(base).evaluate(vec![1; 4096], "mayap-a-abak", "kapampangan").await.unwrap();
    assert!(score.is_correct);
    assert_eq!(score.score, 88.5);
    assert_eq!(score.feedback, "Nice");
  }

  #[tokio::test]
  async fn server_and_decode_errors_are_distinct() {
    let app = Router::new()
      .route("/evaluate", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
    let err = scorer(serve(app).await).evaluate(vec![1; 2048], "r", "kapampangan").await.unwrap_err();
    assert!(matches!(err, ScoringError::Server { status: 502, .. }));
    assert!(!err.is_network());

    let app = Router::new().route("/evaluate", post(|| async { "not json" }));
    let err = scorer(serve(app).await).evaluate(vec![1; 2048], "r", "kapampangan").await.unwrap_err();
    assert!(matches!(err, ScoringError::Decode(_)));
  }

  #[tokio::test]
  async fn unreachable_server_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = scorer(format!("http://{addr}")).evaluate(vec![1; 2048], "r", "kapampangan").await.unwrap_err();
    assert!(err.is_network());
    assert!(err.user_message().contains("internet connection"));
  }
}
