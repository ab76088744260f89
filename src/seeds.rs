//! Built-in lesson descriptors, starter catalogs and activity question banks.
//!
//! The seven lessons of the course are described here once; the synchronizer
//! is generic over these descriptors. The starter catalogs keep the app usable
//! without a TOML catalog bank.

use serde_json::{json, Map, Value};

use crate::activity::{ActivitySchema, QuestionKind, QuizQuestion};
use crate::domain::LessonSchema;

fn schema(id: &str, title: &str, catalog_path: &str, course_flag: &str, key_stem: &str, count_stem: &str) -> LessonSchema {
  LessonSchema {
    id: id.into(),
    title: title.into(),
    catalog_path: catalog_path.into(),
    course_flag: course_flag.into(),
    completed_key: format!("completed_{key_stem}"),
    congrats_key: format!("has_shown_{key_stem}_congratulations"),
    item_count_key: format!("last_{count_stem}_item_count"),
  }
}

/// Descriptors for the seven lessons, in course order.
pub fn builtin_lessons() -> Vec<LessonSchema> {
  vec![
    schema("greetings", "Greetings", "greetings", "lesson1", "greetings", "greeting"),
    schema("numbers", "Numbers", "numbers", "lesson2", "numbers", "number"),
    schema("phrases", "Basic Phrases", "phrases", "lesson3", "phrases", "phrase"),
    schema("descriptives", "Descriptive Words", "descriptives", "lesson4", "descriptives", "descriptive"),
    schema("bodyParts", "Body Parts", "bodyParts", "lesson5", "body_parts", "bodypart"),
    schema("familyMembers", "Family Members", "familyMembers", "lesson6", "family_members", "family"),
    schema("plantanimalobjects", "Plants, Animals, and Objects", "naturalitems", "lesson7", "plant_animal_objects", "natural"),
  ]
}

fn docs(rows: &[(&str, &str, &str)]) -> Vec<Map<String, Value>> {
  rows
    .iter()
    .enumerate()
    .filter_map(|(i, (kap, en, pron))| {
      let slug = kap.to_lowercase().replace([' ', '?', '!'], "_");
      json!({
        "kapampangan": kap,
        "english": en,
        "pronunciation": pron,
        "referencelocator": slug,
        "sortOrder": i as i64 + 1,
      })
      .as_object()
      .cloned()
    })
    .collect()
}

/// Starter catalogs keyed by catalog path.
pub fn seed_catalogs() -> Vec<(String, Vec<Map<String, Value>>)> {
  vec![
    ("greetings".into(), docs(&[
      ("Mayap a abak", "Good morning", "ma-YAP a A-bak"),
      ("Mayap a gatpanapun", "Good afternoon", "ma-YAP a gat-pa-NA-pun"),
      ("Mayap a bengi", "Good evening", "ma-YAP a BE-ngi"),
      ("Kumusta ka?", "How are you?", "ku-MUS-ta ka"),
      ("Salamat", "Thank you", "sa-LA-mat"),
    ])),
    ("numbers".into(), docs(&[
      ("Metung", "One", "me-TUNG"),
      ("Adwa", "Two", "AD-wa"),
      ("Atlu", "Three", "at-LU"),
      ("Apat", "Four", "A-pat"),
      ("Lima", "Five", "li-MA"),
    ])),
    ("phrases".into(), docs(&[
      ("Nanu ing lagyu mu?", "What is your name?", "NA-nu ing LAG-yu mu"),
      ("E ku balu", "I don't know", "e ku BA-lu"),
      ("Lakwan da ka", "Goodbye", "LAK-wan da ka"),
    ])),
    ("descriptives".into(), docs(&[
      ("Malagu", "Beautiful", "ma-LA-gu"),
      ("Maragul", "Big", "ma-RA-gul"),
      ("Malati", "Small", "ma-LA-ti"),
    ])),
    ("bodyParts".into(), docs(&[
      ("Buak", "Hair", "bu-AK"),
      ("Mata", "Eye", "ma-TA"),
      ("Arung", "Nose", "a-RUNG"),
      ("Gamat", "Hand", "ga-MAT"),
    ])),
    ("familyMembers".into(), docs(&[
      ("Ima", "Mother", "I-ma"),
      ("Tata", "Father", "TA-ta"),
      ("Kapatad", "Sibling", "ka-PA-tad"),
      ("Anak", "Child", "A-nak"),
    ])),
    ("naturalitems".into(), docs(&[
      ("Asu", "Dog", "A-su"),
      ("Pusa", "Cat", "PU-sa"),
      ("Sampaga", "Flower", "sam-PA-ga"),
      ("Bale", "House", "BA-le"),
    ])),
    ("examItems/exam3".into(), docs(&[
      ("Nanu ing lagyu mu?", "What is your name?", "NA-nu ing LAG-yu mu"),
      ("Kumusta ka?", "How are you?", "ku-MUS-ta ka"),
      ("E ku balu", "I don't know", "e ku BA-lu"),
      ("Salamat", "Thank you", "sa-LA-mat"),
      ("Mayap a abak", "Good morning", "ma-YAP a A-bak"),
      ("Lakwan da ka", "Goodbye", "LAK-wan da ka"),
    ])),
  ]
}

fn choice(id: &str, text: &str, options: [&str; 4], correct: &str) -> QuizQuestion {
  QuizQuestion {
    id: id.into(),
    text: text.into(),
    kind: QuestionKind::MultipleChoice,
    options: options.iter().map(|o| o.to_string()).collect(),
    correct_answer: correct.into(),
  }
}

fn blank(id: &str, text: &str, correct: &str) -> QuizQuestion {
  QuizQuestion {
    id: id.into(),
    text: text.into(),
    kind: QuestionKind::FillBlank,
    options: Vec::new(),
    correct_answer: correct.into(),
  }
}

/// Question banks for the written activities that ship with the service.
pub fn builtin_activities() -> Vec<ActivitySchema> {
  vec![
    ActivitySchema {
      id: "activity1".into(),
      title: "Greetings".into(),
      questions: vec![
        choice("q1", "How do you say 'I Love You' in Kapampangan?", ["Kaluguran da ka", "Mayap a bengi", "Mayap a yabak", "Malagu"], "Kaluguran da ka"),
        blank("q2", "Complete the greeting: 'Mayap a _____' (Good evening)", "Bengi"),
        choice("q3", "How do you say 'Good afternoon' in Kapampangan?", ["Mayap a abak", "Mayap a gatpanapun", "Mayap a ugtu", "Siklod pu"], "Mayap a gatpanapun"),
        choice("q4", "What does 'Komusta na ka?' mean?", ["Good morning", "How are you?", "Thank you", "Good Day"], "How are you?"),
        blank("q5", "Complete the phrase: 'Dakal a _____' (Many thanks)", "Salamat"),
        choice("q6", "What Kapampangan term do we use from sunrise to noon?", ["Mayap a gatpanapun", "Hanggan king salukuyan", "Ampanayan", "Mayap a abak"], "Mayap a abak"),
        choice("q7", "What does 'Malaus kayu/ko pu' mean?", ["Welcome", "How are you?", "What is your name?", "Where are you going?"], "Welcome"),
        blank("q8", "Complete the greeting: 'Mayap a ____' (Noon time greeting)", "Ugtu"),
        choice("q9", "What is the equivalent term of 'Excuse me' in Kapampangan?", ["Mayap mu", "Masalese ku", "Manatul ku", "Panapaya mu ku"], "Panapaya mu ku"),
        blank("q11", "It is used when politely asking for permission or apologizing. What is the Kapampangan term for it?", "Panapaya mu ku"),
      ],
    },
    ActivitySchema {
      id: "activity2".into(),
      title: "Numbers".into(),
      questions: vec![
        choice("n1", "What is 'One' in Kapampangan?", ["Metung", "Adwa", "Atlu", "Apat"], "Metung"),
        blank("n2", "Write the Kapampangan word for 'Two':", "Adwa"),
        choice("n3", "What is 'Three' in Kapampangan?", ["Apat", "Atlu", "Lima", "Anam"], "Atlu"),
        choice("n4", "What does 'Apat' mean?", ["One", "Two", "Three", "Four"], "Four"),
        blank("n5", "Write the Kapampangan word for 'Five':", "Lima"),
        choice("n6", "What is 'Six' in Kapampangan?", ["Pitu", "Walu", "Anam", "Siyam"], "Anam"),
        choice("n7", "What does 'Pitu' mean?", ["Five", "Six", "Seven", "Eight"], "Seven"),
        choice("n13", "Which is the odd one out?", ["Metung", "Adwa", "Atlu", "Dinalan"], "Dinalan"),
        blank("n14", "What is the Kapampangan word for 'Hundred'?", "Dinalan"),
      ],
    },
    ActivitySchema {
      id: "activity6".into(),
      title: "Family Members".into(),
      questions: vec![
        choice("fm1", "What is 'Father' in Kapampangan?", ["Ima", "Koya", "Tatang/Ibpa", "Bapa"], "Tatang/Ibpa"),
        choice("fm2", "What does 'Ima/Indu' mean?", ["Father", "Mother", "Grandmother", "Aunt"], "Mother"),
        choice("fm4", "What is 'Sibling' in Kapampangan?", ["Kamag-anak", "Kapatad", "Bapa", "Anák"], "Kapatad"),
        choice("fm8", "Which family member is called 'Bapa' in Kapampangan?", ["Brother-in-law", "Uncle", "Godfather", "Father-in-law"], "Uncle"),
        choice("fm9", "The Kapampangan term 'Apu' refers to which family member?", ["Aunt", "Mother-in-law", "Grandmother", "Godmother"], "Grandmother"),
        choice("fm10", "Which term refers to either a mother or father in Kapampangan?", ["Kapatad", "Pengari", "Pisan", "Dara"], "Pengari"),
        choice("fm11", "In Kapampangan family terms, which word means 'Cousin'?", ["Kapatad", "Pisan", "Wali", "Bapa"], "Pisan"),
      ],
    },
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn builtin_lessons_have_distinct_flags_and_keys() {
    let lessons = builtin_lessons();
    assert_eq!(lessons.len(), 7);
    let flags: HashSet<_> = lessons.iter().map(|l| l.course_flag.as_str()).collect();
    assert_eq!(flags.len(), 7);
    let keys: HashSet<_> = lessons.iter().map(|l| l.completed_key.as_str()).collect();
    assert_eq!(keys.len(), 7);
    assert_eq!(lessons[0].congrats_key, "has_shown_greetings_congratulations");
    assert_eq!(lessons[6].item_count_key, "last_natural_item_count");
    assert_eq!(lessons[0].progress_path("u1"), format!("users/u1/lessons/{}", lessons[0].id));
  }

  #[test]
  fn every_lesson_has_a_seed_catalog() {
    let catalogs = seed_catalogs();
    for lesson in builtin_lessons() {
      assert!(
        catalogs.iter().any(|(path, docs)| path == &lesson.catalog_path && !docs.is_empty()),
        "no seed catalog for {}",
        lesson.id
      );
    }
  }

  #[test]
  fn activity_banks_are_answerable() {
    for activity in builtin_activities() {
      let mut ids = HashSet::new();
      for q in &activity.questions {
        assert!(ids.insert(q.id.as_str()), "duplicate {} in {}", q.id, activity.id);
        match q.kind {
          QuestionKind::MultipleChoice => assert!(q.options.contains(&q.correct_answer), "{} has no right option", q.id),
          QuestionKind::FillBlank => assert!(q.options.is_empty()),
        }
      }
    }
  }
}
