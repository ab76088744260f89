//! Written activity quizzes: a random round drawn from each activity's
//! question bank, one answer per question, and a pass mark decided on submit.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::ActivityProgressDoc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
  MultipleChoice,
  FillBlank,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
  pub id: String,
  pub text: String,
  pub kind: QuestionKind,
  #[serde(default)]
  pub options: Vec<String>,
  pub correct_answer: String,
}

impl QuizQuestion {
  /// Fill-in answers ignore case and surrounding blanks; a choice must match exactly.
  pub fn accepts(&self, answer: &str) -> bool {
    match self.kind {
      QuestionKind::MultipleChoice => answer == self.correct_answer,
      QuestionKind::FillBlank => answer.trim().to_lowercase() == self.correct_answer.trim().to_lowercase(),
    }
  }
}

/// One activity and its full question bank.
#[derive(Clone, Debug, Deserialize)]
pub struct ActivitySchema {
  pub id: String,
  pub title: String,
  pub questions: Vec<QuizQuestion>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
  /// Some questions have no answer yet; nothing was graded.
  Incomplete { answered: usize, total: usize },
  /// First submission at or above the pass mark.
  Passed { correct: usize, total: usize, score: u32 },
  Failed { correct: usize, total: usize, score: u32 },
  /// The activity was already complete; graded for review only.
  Review { correct: usize, total: usize, score: u32 },
}

#[derive(Clone, Debug)]
pub struct ActivitySession {
  pub activity_id: String,
  questions: Vec<QuizQuestion>,
  answers: BTreeMap<String, String>,
  score: u32,
  feedback_visible: bool,
  completed: bool,
  passing_score: u32,
}

fn draw<R: Rng + ?Sized>(bank: &[QuizQuestion], per_session: usize, rng: &mut R) -> Vec<QuizQuestion> {
  let mut picked = bank.to_vec();
  picked.shuffle(rng);
  picked.truncate(per_session);
  picked
}

impl ActivitySession {
  /// A fresh round of up to `per_session` questions.
  pub fn new<R: Rng + ?Sized>(schema: &ActivitySchema, per_session: usize, passing_score: u32, rng: &mut R) -> Self {
    Self {
      activity_id: schema.id.clone(),
      questions: draw(&schema.questions, per_session, rng),
      answers: BTreeMap::new(),
      score: 0,
      feedback_visible: false,
      completed: false,
      passing_score,
    }
  }

  /// Rebuild the saved round. Ids no longer in the bank are dropped and the
  /// round is topped up from the rest of the bank in random order.
  pub fn restore<R: Rng + ?Sized>(
    schema: &ActivitySchema,
    doc: &ActivityProgressDoc,
    completed: bool,
    per_session: usize,
    passing_score: u32,
    rng: &mut R,
  ) -> Self {
    let mut questions: Vec<QuizQuestion> = doc
      .active_questions
      .iter()
      .filter_map(|id| schema.questions.iter().find(|q| &q.id == id).cloned())
      .take(per_session)
      .collect();
    if questions.len() < per_session {
      let rest: Vec<QuizQuestion> =
        schema.questions.iter().filter(|q| !questions.contains(q)).cloned().collect();
      let missing = per_session - questions.len();
      questions.extend(draw(&rest, missing, rng));
    }
    let answers = doc
      .answers
      .iter()
      .filter(|(id, _)| questions.iter().any(|q| &&q.id == id))
      .map(|(id, a)| (id.clone(), a.clone()))
      .collect();
    Self {
      activity_id: schema.id.clone(),
      questions,
      answers,
      score: doc.score,
      feedback_visible: doc.feedback_visible,
      completed,
      passing_score,
    }
  }

  pub fn to_doc(&self, now_ms: u64) -> ActivityProgressDoc {
    ActivityProgressDoc {
      active_questions: self.questions.iter().map(|q| q.id.clone()).collect(),
      answers: self.answers.clone(),
      score: self.score,
      total_questions: self.questions.len(),
      feedback_visible: self.feedback_visible,
      last_attempt: now_ms,
    }
  }

  pub fn questions(&self) -> &[QuizQuestion] { &self.questions }

  pub fn answer_for(&self, question_id: &str) -> Option<&str> { self.answers.get(question_id).map(String::as_str) }

  pub fn answered_count(&self) -> usize { self.answers.len() }

  pub fn score(&self) -> u32 { self.score }

  pub fn is_feedback_visible(&self) -> bool { self.feedback_visible }

  pub fn is_completed(&self) -> bool { self.completed }

  /// Record the learner's answer. A blank answer clears it. Returns false for
  /// a question outside this round.
  pub fn answer(&mut self, question_id: &str, answer: &str) -> bool {
    if !self.questions.iter().any(|q| q.id == question_id) {
      return false;
    }
    if answer.trim().is_empty() {
      self.answers.remove(question_id);
    } else {
      self.answers.insert(question_id.to_string(), answer.to_string());
    }
    true
  }

  fn correct_count(&self) -> usize {
    self
      .questions
      .iter()
      .filter(|q| self.answers.get(&q.id).is_some_and(|a| q.accepts(a)))
      .count()
  }

  /// Grade the round. Unanswered questions block grading unless the activity
  /// is already complete.
  pub fn submit(&mut self) -> Submission {
    let total = self.questions.len();
    let answered = self.questions.iter().filter(|q| self.answers.contains_key(&q.id)).count();
    if answered < total && !self.completed {
      return Submission::Incomplete { answered, total };
    }
    let correct = self.correct_count();
    let score = if total == 0 { 0 } else { (correct * 100 / total) as u32 };
    self.score = score;
    self.feedback_visible = true;
    debug!(target: "activity", activity = %self.activity_id, correct, total, score, "Activity graded");
    if self.completed {
      Submission::Review { correct, total, score }
    } else if score >= self.passing_score {
      self.completed = true;
      Submission::Passed { correct, total, score }
    } else {
      Submission::Failed { correct, total, score }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn bank(n: usize) -> ActivitySchema {
    let questions = (1..=n)
      .map(|i| QuizQuestion {
        id: format!("q{i}"),
        text: format!("Question {i}"),
        kind: if i % 2 == 0 { QuestionKind::FillBlank } else { QuestionKind::MultipleChoice },
        options: if i % 2 == 0 { vec![] } else { vec![format!("A{i}"), format!("B{i}")] },
        correct_answer: format!("A{i}"),
      })
      .collect();
    ActivitySchema { id: "activity2".into(), title: "Numbers".into(), questions }
  }

  fn answer_all(s: &mut ActivitySession, right: usize) {
    let ids: Vec<(String, String)> =
      s.questions().iter().map(|q| (q.id.clone(), q.correct_answer.clone())).collect();
    for (i, (id, correct)) in ids.into_iter().enumerate() {
      let given = if i < right { correct } else { "wrong".to_string() };
      assert!(s.answer(&id, &given));
    }
  }

  #[test]
  fn fill_blank_ignores_case_and_spaces_but_choices_do_not() {
    let blank = QuizQuestion {
      id: "q2".into(),
      text: "Mayap a _____".into(),
      kind: QuestionKind::FillBlank,
      options: vec![],
      correct_answer: "Bengi".into(),
    };
    assert!(blank.accepts("  bengi "));
    assert!(!blank.accepts("bengi a"));
    let choice = QuizQuestion { kind: QuestionKind::MultipleChoice, ..blank };
    assert!(choice.accepts("Bengi"));
    assert!(!choice.accepts("bengi"));
  }

  #[test]
  fn draws_at_most_per_session_distinct_questions() {
    let s = ActivitySession::new(&bank(14), 10, 70, &mut StdRng::seed_from_u64(3));
    let mut ids: Vec<_> = s.questions().iter().map(|q| q.id.clone()).collect();
    assert_eq!(ids.len(), 10);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
    assert_eq!(ActivitySession::new(&bank(4), 10, 70, &mut StdRng::seed_from_u64(3)).questions().len(), 4);
  }

  #[test]
  fn unanswered_questions_block_grading() {
    let mut s = ActivitySession::new(&bank(5), 10, 70, &mut StdRng::seed_from_u64(1));
    let first = s.questions()[0].id.clone();
    assert!(s.answer(&first, "A1"));
    assert!(!s.answer("q99", "A1"));
    assert_eq!(s.submit(), Submission::Incomplete { answered: 1, total: 5 });
    assert!(!s.is_feedback_visible());

    assert!(s.answer(&first, "   "));
    assert_eq!(s.answered_count(), 0);
  }

  #[test]
  fn seventy_percent_passes_once_then_reviews() {
    let mut s = ActivitySession::new(&bank(10), 10, 70, &mut StdRng::seed_from_u64(5));
    answer_all(&mut s, 6);
    assert_eq!(s.submit(), Submission::Failed { correct: 6, total: 10, score: 60 });
    assert!(s.is_feedback_visible() && !s.is_completed());

    answer_all(&mut s, 7);
    assert_eq!(s.submit(), Submission::Passed { correct: 7, total: 10, score: 70 });
    assert!(s.is_completed());

    let last = s.questions()[9].id.clone();
    s.answer(&last, "");
    assert_eq!(s.submit(), Submission::Review { correct: 7, total: 10, score: 70 });
  }

  #[test]
  fn restore_keeps_saved_round_and_tops_up() {
    let schema = bank(12);
    let mut s = ActivitySession::new(&schema, 10, 70, &mut StdRng::seed_from_u64(9));
    let kept = s.questions()[0].id.clone();
    s.answer(&kept, "A");
    let doc = s.to_doc(42);
    assert_eq!(doc.total_questions, 10);
    assert_eq!(doc.last_attempt, 42);

    let same = ActivitySession::restore(&schema, &doc, false, 10, 70, &mut StdRng::seed_from_u64(0));
    assert_eq!(same.questions(), s.questions());
    assert_eq!(same.answer_for(&kept), Some("A"));

    // Drop all but the first saved question from the bank.
    let mut shrunk = schema.clone();
    let saved: Vec<String> = doc.active_questions[1..].to_vec();
    shrunk.questions.retain(|q| !saved.contains(&q.id));
    let topped = ActivitySession::restore(&shrunk, &doc, true, 10, 70, &mut StdRng::seed_from_u64(0));
    assert_eq!(topped.questions()[0].id, kept);
    assert_eq!(topped.questions().len(), 3);
    assert!(topped.is_completed());
  }
}
