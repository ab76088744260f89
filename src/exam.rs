//! Pronunciation exam bookkeeping: question selection, best score per
//! question, the average over answered questions and the pass decision.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::domain::{PronunciationScore, VocabularyItem};
use crate::store::ExamProgressDoc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Advance {
  /// Moved to the question at `index`.
  Next { index: usize },
  /// Exam finished with a passing average; stays on the last question.
  Passed { average: f64 },
  /// Exam finished below the threshold; back to the first question.
  Failed { average: f64 },
}

#[derive(Clone, Debug)]
pub struct ExamSession {
  pub exam_id: String,
  questions: Vec<VocabularyItem>,
  answered: Vec<bool>,
  scores: Vec<f64>,
  current: usize,
  passing_score: f64,
  completed: bool,
}

impl ExamSession {
  /// Sample up to `total` questions from `catalog` in random order.
  pub fn new<R: Rng + ?Sized>(
    exam_id: &str,
    catalog: &[VocabularyItem],
    total: usize,
    passing_score: f64,
    rng: &mut R,
  ) -> Self {
    let mut questions = catalog.to_vec();
    questions.shuffle(rng);
    questions.truncate(total);
    Self::with_questions(exam_id, questions, passing_score)
  }

  fn with_questions(exam_id: &str, questions: Vec<VocabularyItem>, passing_score: f64) -> Self {
    let n = questions.len();
    Self {
      exam_id: exam_id.to_string(),
      questions,
      answered: vec![false; n],
      scores: vec![0.0; n],
      current: 0,
      passing_score,
      completed: false,
    }
  }

  /// Rebuild a session from persisted progress. Returns `None` when the saved
  /// question list no longer matches the catalog.
  pub fn restore(
    exam_id: &str,
    doc: &ExamProgressDoc,
    catalog: &[VocabularyItem],
    passing_score: f64,
  ) -> Option<Self> {
    if doc.question_ids.is_empty() {
      return None;
    }
    let questions: Vec<VocabularyItem> = doc
      .question_ids
      .iter()
      .map(|id| catalog.iter().find(|i| i.identity() == id).cloned())
      .collect::<Option<_>>()?;
    let mut session = Self::with_questions(exam_id, questions, passing_score);
    for (i, slot) in session.answered.iter_mut().enumerate() {
      *slot = doc.answered.get(i).copied().unwrap_or(false);
    }
    for (i, slot) in session.scores.iter_mut().enumerate() {
      *slot = doc.scores.get(i).copied().unwrap_or(0.0);
    }
    session.current = doc.current_question_index.min(session.questions.len() - 1);
    session.completed = doc.completed;
    Some(session)
  }

  pub fn to_doc(&self, now_ms: u64) -> ExamProgressDoc {
    ExamProgressDoc {
      question_ids: self.questions.iter().map(|q| q.identity().to_string()).collect(),
      answered: self.answered.clone(),
      scores: self.scores.clone(),
      current_question_index: self.current,
      correct_answers: self.correct_answers(),
      average_score: self.average_score(),
      completed: self.completed,
      last_attempt: now_ms,
    }
  }

  pub fn len(&self) -> usize { self.questions.len() }

  pub fn questions(&self) -> &[VocabularyItem] { &self.questions }

  pub fn current_index(&self) -> usize { self.current }

  pub fn question(&self, index: usize) -> Option<&VocabularyItem> { self.questions.get(index) }

  pub fn answered(&self) -> &[bool] { &self.answered }

  pub fn scores(&self) -> &[f64] { &self.scores }

  pub fn correct_answers(&self) -> usize { self.answered.iter().filter(|a| **a).count() }

  /// Record an attempt on question `index`. Keeps the best score; a correct
  /// attempt marks the question answered. Returns whether anything changed.
  pub fn record(&mut self, index: usize, result: &PronunciationScore) -> bool {
    let Some(best) = self.scores.get_mut(index) else {
      return false;
    };
    let mut changed = false;
    if result.score > *best {
      *best = result.score;
      changed = true;
    }
    if result.is_correct && !self.answered[index] {
      self.answered[index] = true;
      changed = true;
    }
    debug!(target: "exam", index, score = result.score, correct = result.is_correct, changed, "Attempt recorded");
    changed
  }

  /// Mean best score over answered questions; 0 when none are answered.
  pub fn average_score(&self) -> f64 {
    let (sum, n) = self
      .answered
      .iter()
      .zip(&self.scores)
      .filter(|(answered, _)| **answered)
      .fold((0.0, 0usize), |(sum, n), (_, score)| (sum + score, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
  }

  /// True once the exam has been finished with a passing average.
  pub fn is_completed(&self) -> bool { self.completed }

  /// Step forward. Past the last question the exam is decided.
  pub fn advance(&mut self) -> Advance {
    if self.current + 1 < self.questions.len() {
      self.current += 1;
      return Advance::Next { index: self.current };
    }
    let average = self.average_score();
    if average >= self.passing_score {
      self.current = self.questions.len().saturating_sub(1);
      self.completed = true;
      Advance::Passed { average }
    } else {
      self.current = 0;
      Advance::Failed { average }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::item;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn catalog(n: usize) -> Vec<VocabularyItem> {
    (1..=n).map(|i| item(&format!("p{i}"), i as i64)).collect()
  }

  fn score(score: f64, is_correct: bool) -> PronunciationScore {
    PronunciationScore { is_correct, score, feedback: String::new() }
  }

  fn session(n: usize) -> ExamSession {
    ExamSession::new("exam3", &catalog(n), 5, 70.0, &mut StdRng::seed_from_u64(7))
  }

  #[test]
  fn samples_at_most_total_distinct_questions() {
    let s = session(6);
    assert_eq!(s.len(), 5);
    let mut ids: Vec<_> = s.questions().iter().map(|q| q.identity()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    assert_eq!(session(3).len(), 3);
  }

  #[test]
  fn best_score_is_kept_and_correct_marks_answered() {
    let mut s = session(5);
    assert!(s.record(0, &score(55.0, false)));
    assert!(!s.answered()[0]);
    assert!(s.record(0, &score(80.0, true)));
    assert!(!s.record(0, &score(60.0, true)));
    assert_eq!(s.scores()[0], 80.0);
    assert_eq!(s.correct_answers(), 1);
    assert!(!s.record(99, &score(100.0, true)));
  }

  #[test]
  fn average_counts_only_answered_questions() {
    let mut s = session(5);
    assert_eq!(s.average_score(), 0.0);
    s.record(0, &score(90.0, true));
    s.record(1, &score(40.0, false));
    s.record(2, &score(70.0, true));
    assert_eq!(s.average_score(), 80.0);
  }

  #[test]
  fn passing_stays_on_last_question() {
    let mut s = session(5);
    for i in 0..5 {
      s.record(i, &score(75.0, true));
    }
    for i in 1..5 {
      assert_eq!(s.advance(), Advance::Next { index: i });
    }
    assert_eq!(s.advance(), Advance::Passed { average: 75.0 });
    assert_eq!(s.current_index(), 4);
    assert!(s.is_completed() && s.to_doc(0).completed);
  }

  #[test]
  fn failing_returns_to_first_question() {
    let mut s = session(2);
    s.record(0, &score(65.0, true));
    s.advance();
    assert!(matches!(s.advance(), Advance::Failed { .. }));
    assert_eq!(s.current_index(), 0);
    assert!(!s.is_completed());
  }

  #[test]
  fn restores_from_saved_progress() {
    let cat = catalog(6);
    let mut s = ExamSession::new("exam3", &cat, 5, 70.0, &mut StdRng::seed_from_u64(1));
    s.record(1, &score(88.0, true));
    s.advance();
    s.advance();
    let doc = s.to_doc(10);
    assert_eq!(doc.correct_answers, 1);
    assert_eq!(doc.average_score, 88.0);

    let restored = ExamSession::restore("exam3", &doc, &cat, 70.0).unwrap();
    assert_eq!(restored.current_index(), 2);
    assert_eq!(restored.scores()[1], 88.0);
    assert_eq!(restored.questions(), s.questions());

    let shrunk = &cat[..1];
    assert!(ExamSession::restore("exam3", &doc, shrunk, 70.0).is_none());
  }
}
