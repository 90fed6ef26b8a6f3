//! Self-graded quiz generation from ingested chunks: deterministic templated
//! questions plus exact-match scoring.

use serde::Serialize;

use crate::ingestor::{split_sentences, Chunk};

/// Sentences shorter than this are too thin to quiz on.
const MIN_FACT_CHARS: usize = 20;
/// Cap on the harvested fact pool.
const MAX_FACTS: usize = 50;

/// Question style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuizKind {
    /// Statement judged true or false.
    TrueFalse,
    /// One correct option among distractors.
    MultipleChoice,
    /// Free-text answer matched against the source sentence.
    OpenEnded,
}

/// Expected answer for an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QuizAnswer {
    /// Index into the item's options.
    Choice(usize),
    /// Expected free-text answer.
    Text(String),
}

/// A learner's submitted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizResponse {
    /// Selected option index.
    Choice(usize),
    /// Free-text answer.
    Text(String),
}

/// One generated question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizItem {
    /// Question style.
    pub kind: QuizKind,
    /// Prompt shown to the learner.
    pub prompt: String,
    /// Answer options; empty for open-ended items.
    pub options: Vec<String>,
    /// Expected answer.
    pub answer: QuizAnswer,
    /// Shown with graded results.
    pub explanation: String,
    /// Chunk the fact was harvested from.
    pub source_chunk: usize,
}

/// Per-item grading outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAnswer {
    /// Prompt the learner saw.
    pub prompt: String,
    /// Expected answer, rendered.
    pub expected: String,
    /// What the learner gave, rendered; empty when skipped.
    pub given: String,
    /// Whether the response matched.
    pub correct: bool,
    /// Explanation text from the item.
    pub explanation: String,
}

/// Scored quiz summary.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizReport {
    /// Number of correct responses.
    pub correct: usize,
    /// Number of items graded.
    pub total: usize,
    /// Per-item detail in quiz order.
    pub entries: Vec<GradedAnswer>,
}

impl QuizReport {
    /// Score as a percentage of graded items.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
struct Fact {
    sentence: String,
    chunk_id: usize,
}

/// Harvests sentence-level facts from chunks and emits templated questions.
pub struct QuizGenerator {
    facts: Vec<Fact>,
}

impl QuizGenerator {
    /// Collects quizzable sentences. Overlapping chunks repeat sentences, so
    /// only the first occurrence of each sentence is kept.
    pub fn new(chunks: &[Chunk]) -> Self {
        let mut facts = Vec::new();
        for chunk in chunks {
            for sentence in split_sentences(&chunk.text) {
                if sentence.text.len() <= MIN_FACT_CHARS {
                    continue;
                }
                if facts.iter().any(|fact: &Fact| fact.sentence == sentence.text) {
                    continue;
                }
                facts.push(Fact {
                    sentence: sentence.text,
                    chunk_id: chunk.id,
                });
                if facts.len() >= MAX_FACTS {
                    return Self { facts };
                }
            }
        }
        Self { facts }
    }

    /// Number of facts available for question generation.
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Produces up to `n` questions, cycling question styles deterministically.
    pub fn generate(&self, n: usize) -> Vec<QuizItem> {
        let mut items = Vec::new();
        for (idx, fact) in self.facts.iter().enumerate() {
            if items.len() >= n {
                break;
            }
            let item = match idx % 3 {
                0 => self.true_false_item(idx, fact),
                1 => self
                    .multiple_choice_item(idx, fact)
                    .unwrap_or_else(|| self.open_ended_item(fact)),
                _ => self.open_ended_item(fact),
            };
            items.push(item);
        }
        items
    }

    fn true_false_item(&self, idx: usize, fact: &Fact) -> QuizItem {
        let (statement, truth) = match falsify(&fact.sentence) {
            // only odd slots get the falsified variant so runs of numeric
            // facts do not all grade "False"
            Some(false_statement) if idx % 2 == 1 => (false_statement, false),
            _ => (fact.sentence.clone(), true),
        };
        QuizItem {
            kind: QuizKind::TrueFalse,
            prompt: format!("True or false: {statement}"),
            options: vec!["True".to_string(), "False".to_string()],
            answer: QuizAnswer::Choice(if truth { 0 } else { 1 }),
            explanation: format!("The reference material states: {}", fact.sentence),
            source_chunk: fact.chunk_id,
        }
    }

    /// Builds a multiple-choice item; `None` when no distractor exists.
    fn multiple_choice_item(&self, idx: usize, fact: &Fact) -> Option<QuizItem> {
        let mut distractors: Vec<&Fact> = Vec::new();
        for offset in 1..self.facts.len() {
            let candidate = &self.facts[(idx + offset) % self.facts.len()];
            if candidate.chunk_id == fact.chunk_id {
                continue;
            }
            distractors.push(candidate);
            if distractors.len() == 3 {
                break;
            }
        }
        if distractors.is_empty() {
            return None;
        }

        let correct_slot = idx % (distractors.len() + 1);
        let mut options = Vec::with_capacity(distractors.len() + 1);
        let mut pool = distractors.iter();
        for slot in 0..=distractors.len() {
            if slot == correct_slot {
                options.push(fact.sentence.clone());
            } else {
                options.push(pool.next().expect("pool sized to fit").sentence.clone());
            }
        }

        Some(QuizItem {
            kind: QuizKind::MultipleChoice,
            prompt: "Which of the following is stated in the reference material?".to_string(),
            options,
            answer: QuizAnswer::Choice(correct_slot),
            explanation: format!("The reference material states: {}", fact.sentence),
            source_chunk: fact.chunk_id,
        })
    }

    fn open_ended_item(&self, fact: &Fact) -> QuizItem {
        let preview: String = fact
            .sentence
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ");
        QuizItem {
            kind: QuizKind::OpenEnded,
            prompt: format!(
                "According to the reference material, complete the statement: '{preview}...'"
            ),
            options: Vec::new(),
            answer: QuizAnswer::Text(fact.sentence.clone()),
            explanation: format!("The reference material states: {}", fact.sentence),
            source_chunk: fact.chunk_id,
        }
    }
}

/// Swaps the first two distinct numeric tokens to produce a false statement.
fn falsify(sentence: &str) -> Option<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut numeric = words
        .iter()
        .enumerate()
        .filter(|(_, word)| word.chars().any(|ch| ch.is_ascii_digit()));
    let (first_idx, first_word) = numeric.next()?;
    let (second_idx, second_word) = numeric.find(|(_, word)| **word != *first_word)?;

    let mut out = words.clone();
    out[first_idx] = second_word;
    out[second_idx] = first_word;
    Some(out.join(" "))
}

/// Grades one response against one item. Open-ended answers match on a
/// trimmed, case-insensitive comparison.
pub fn score_item(item: &QuizItem, response: Option<&QuizResponse>) -> bool {
    let Some(response) = response else {
        return false;
    };
    match (&item.answer, response) {
        (QuizAnswer::Choice(expected), QuizResponse::Choice(given)) => expected == given,
        (QuizAnswer::Text(expected), QuizResponse::Text(given)) => {
            expected.trim().to_lowercase() == given.trim().to_lowercase()
        }
        _ => false,
    }
}

/// Grades a full response sheet; missing responses count as incorrect.
pub fn grade(items: &[QuizItem], responses: &[Option<QuizResponse>]) -> QuizReport {
    let mut entries = Vec::with_capacity(items.len());
    let mut correct = 0usize;
    for (idx, item) in items.iter().enumerate() {
        let response = responses.get(idx).and_then(|r| r.as_ref());
        let is_correct = score_item(item, response);
        if is_correct {
            correct += 1;
        }
        entries.push(GradedAnswer {
            prompt: item.prompt.clone(),
            expected: render_answer(item, &item.answer),
            given: response.map(|r| render_response(item, r)).unwrap_or_default(),
            correct: is_correct,
            explanation: item.explanation.clone(),
        });
    }
    QuizReport {
        correct,
        total: items.len(),
        entries,
    }
}

fn render_answer(item: &QuizItem, answer: &QuizAnswer) -> String {
    match answer {
        QuizAnswer::Choice(idx) => item
            .options
            .get(*idx)
            .cloned()
            .unwrap_or_else(|| format!("option {}", idx + 1)),
        QuizAnswer::Text(text) => text.clone(),
    }
}

fn render_response(item: &QuizItem, response: &QuizResponse) -> String {
    match response {
        QuizResponse::Choice(idx) => item
            .options
            .get(*idx)
            .cloned()
            .unwrap_or_else(|| format!("option {}", idx + 1)),
        QuizResponse::Text(text) => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id,
            text: text.to_string(),
            source_offset: id * 100,
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk(
                0,
                "Maintenance fluids use 100 mL/kg for the first 10 kg of weight. \
                 The hourly rate divides the daily volume by 24.",
            ),
            chunk(
                1,
                "A resuscitation bolus is 20 mL per kg given rapidly. \
                 Severe dehydration corresponds to fifteen percent of body weight.",
            ),
            chunk(
                2,
                "Neonates need careful reassessment after every fluid bolus. \
                 Deficit replacement is spread across twenty-four hours.",
            ),
        ]
    }

    #[test]
    fn generation_is_deterministic() {
        let chunks = sample_chunks();
        let a = QuizGenerator::new(&chunks).generate(6);
        let b = QuizGenerator::new(&chunks).generate(6);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn styles_cycle_through_the_pool() {
        let items = QuizGenerator::new(&sample_chunks()).generate(6);
        assert_eq!(items[0].kind, QuizKind::TrueFalse);
        assert_eq!(items[1].kind, QuizKind::MultipleChoice);
        assert_eq!(items[2].kind, QuizKind::OpenEnded);
    }

    #[test]
    fn distractors_come_from_other_chunks() {
        let generator = QuizGenerator::new(&sample_chunks());
        let items = generator.generate(6);
        let mc = items
            .iter()
            .find(|item| item.kind == QuizKind::MultipleChoice)
            .expect("one multiple-choice item");

        let QuizAnswer::Choice(correct_idx) = &mc.answer else {
            panic!("multiple choice answers by index");
        };
        for (idx, option) in mc.options.iter().enumerate() {
            if idx == *correct_idx {
                continue;
            }
            let source = generator
                .facts
                .iter()
                .find(|fact| fact.sentence == *option)
                .expect("distractor is a harvested fact");
            assert_ne!(source.chunk_id, mc.source_chunk);
        }
    }

    #[test]
    fn numeric_statements_can_be_falsified() {
        let falsified = falsify("Give 100 mL/kg for the first 10 kg.").expect("two numbers");
        assert!(falsified.starts_with("Give 10 "));
        assert!(falsified.contains("first 100 kg"));
        assert!(falsify("No numbers appear in this sentence.").is_none());
        assert!(falsify("Repeat 10 mL then 10 mL again.").is_none());
    }

    #[test]
    fn open_ended_scoring_is_case_insensitive() {
        let item = QuizItem {
            kind: QuizKind::OpenEnded,
            prompt: "complete".to_string(),
            options: Vec::new(),
            answer: QuizAnswer::Text("A resuscitation bolus is 20 mL per kg.".to_string()),
            explanation: String::new(),
            source_chunk: 0,
        };
        let exact = QuizResponse::Text("A resuscitation bolus is 20 mL per kg.".to_string());
        let shouty = QuizResponse::Text("  A RESUSCITATION BOLUS IS 20 ML PER KG. ".to_string());
        let wrong = QuizResponse::Text("give a litre".to_string());
        assert!(score_item(&item, Some(&exact)));
        assert!(score_item(&item, Some(&shouty)));
        assert!(!score_item(&item, Some(&wrong)));
        assert!(!score_item(&item, None));
    }

    #[test]
    fn choice_scoring_matches_by_index() {
        let item = QuizItem {
            kind: QuizKind::TrueFalse,
            prompt: "True or false: something".to_string(),
            options: vec!["True".to_string(), "False".to_string()],
            answer: QuizAnswer::Choice(0),
            explanation: String::new(),
            source_chunk: 0,
        };
        assert!(score_item(&item, Some(&QuizResponse::Choice(0))));
        assert!(!score_item(&item, Some(&QuizResponse::Choice(1))));
        assert!(!score_item(&item, Some(&QuizResponse::Text("True".to_string()))));
    }

    #[test]
    fn grading_counts_and_reports() {
        let items = QuizGenerator::new(&sample_chunks()).generate(3);
        let responses: Vec<Option<QuizResponse>> = items
            .iter()
            .map(|item| match &item.answer {
                QuizAnswer::Choice(idx) => Some(QuizResponse::Choice(*idx)),
                QuizAnswer::Text(text) => Some(QuizResponse::Text(text.to_uppercase())),
            })
            .collect();
        let report = grade(&items, &responses);
        assert_eq!(report.correct, report.total);
        assert!((report.percent() - 100.0).abs() < 1e-9);

        let blank = grade(&items, &[]);
        assert_eq!(blank.correct, 0);
        assert_eq!(blank.entries.len(), items.len());
    }
}
