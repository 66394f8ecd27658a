//! Misconception detection on wrong answers.

use pathwise_core::concept::{Misconception, Signature};
use pathwise_core::course::Course;
use pathwise_core::learner::Answer;
use pathwise_core::node::Node;

use crate::scoring::normalize_text;

/// Finds the first known misconception (by id) for the node's concepts whose
/// signature matches `answer`. Fully correct answers never match.
pub fn detect<'c>(
    course: &'c Course,
    node: &Node,
    answer: &Answer,
    score: f64,
) -> Option<&'c Misconception> {
    if score >= 1.0 {
        return None;
    }
    let mut candidates: Vec<&Misconception> = node
        .concepts
        .iter()
        .flat_map(|c| course.misconceptions_for(*c))
        .collect();
    candidates.sort_by_key(|m| m.id);
    candidates.dedup_by_key(|m| m.id);
    candidates
        .into_iter()
        .find(|m| signature_matches(&m.signature, answer))
}

/// Returns `true` when `answer` exhibits the pattern in `signature`.
pub fn signature_matches(signature: &Signature, answer: &Answer) -> bool {
    match (signature, answer) {
        (Signature::ExactText { text }, Answer::Text(given)) => {
            normalize_text(given) == normalize_text(text)
        }
        (Signature::ContainsText { text }, Answer::Text(given)) => {
            let needle = normalize_text(text);
            !needle.is_empty() && normalize_text(given).contains(&needle)
        }
        (Signature::Choice { index }, Answer::Choice(given)) => index == given,
        (Signature::Choice { index }, Answer::MultiChoice(given)) => given.contains(index),
        (Signature::NumericRange { min, max }, Answer::Numeric(given)) => {
            given.is_finite() && *given >= *min && *given <= *max
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwise_core::course::{CourseBuilder, CourseMeta};
    use pathwise_core::node::{AnswerKey, ContentRef, NodeKind};

    fn course_with_misconceptions() -> (Course, pathwise_core::NodeId) {
        let mut b = CourseBuilder::new(CourseMeta::default());
        let c = b.add_concept("fractions");
        b.add_misconception(c, Signature::Choice { index: 2 }, "larger denominator")
            .unwrap();
        b.add_misconception(c, Signature::Choice { index: 1 }, "adds denominators")
            .unwrap();
        let q = b.add_node(
            Node::new(NodeKind::Interaction, ContentRef::text("q", "1/2 + 1/3?"))
                .with_concept(c)
                .with_answer_key(AnswerKey::Choice {
                    options: vec!["5/6".into(), "2/5".into(), "1/6".into()],
                    correct: 0,
                }),
        );
        let end = b.add_node(Node::new(NodeKind::Summary, ContentRef::text("s", "done")));
        b.connect(q, end).unwrap();
        (b.build().unwrap(), q)
    }

    #[test]
    fn matching_wrong_choice_is_detected() {
        let (course, q) = course_with_misconceptions();
        let node = course.node(q).unwrap();
        let found = detect(&course, node, &Answer::Choice(1), 0.0).unwrap();
        assert_eq!(found.hint, "adds denominators");
    }

    #[test]
    fn correct_answer_never_matches() {
        let (course, q) = course_with_misconceptions();
        let node = course.node(q).unwrap();
        assert!(detect(&course, node, &Answer::Choice(0), 1.0).is_none());
    }

    #[test]
    fn text_signatures_normalize() {
        let exact = Signature::ExactText {
            text: "The Sun".into(),
        };
        assert!(signature_matches(&exact, &Answer::Text(" the  sun ".into())));
        let contains = Signature::ContainsText {
            text: "heavier".into(),
        };
        assert!(signature_matches(
            &contains,
            &Answer::Text("Heavier objects fall faster".into())
        ));
        assert!(!signature_matches(&contains, &Answer::Choice(0)));
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let sig = Signature::NumericRange { min: 1.0, max: 2.0 };
        assert!(signature_matches(&sig, &Answer::Numeric(2.0)));
        assert!(!signature_matches(&sig, &Answer::Numeric(2.5)));
    }
}
