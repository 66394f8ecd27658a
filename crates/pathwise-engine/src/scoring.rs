//! Answer validation and scoring against a node's [`AnswerKey`].
//!
//! Validation runs before any state is touched; a payload that fails here
//! must leave the learner's records unchanged.

use std::collections::HashSet;

use pathwise_core::id::NodeId;
use pathwise_core::learner::Answer;
use pathwise_core::node::{AnswerKey, Node};

use crate::error::EngineError;

/// Returns the node's answer key after checking that `answer` is a
/// well-formed payload for it.
pub fn validate_answer<'a>(
    node_id: NodeId,
    node: &'a Node,
    answer: &Answer,
) -> Result<&'a AnswerKey, EngineError> {
    if !node.kind.is_assessed() {
        return Err(EngineError::NotAssessed { node: node_id });
    }
    let key = node
        .answer_key
        .as_ref()
        .ok_or(EngineError::MissingAnswerKey { node: node_id })?;

    match (key, answer) {
        (AnswerKey::Choice { options, .. }, Answer::Choice(index)) => {
            check_index(*index, options.len())?;
        }
        (AnswerKey::MultiSelect { options, .. }, Answer::MultiChoice(chosen)) => {
            if chosen.is_empty() {
                return Err(EngineError::EmptyAnswer);
            }
            let mut seen = HashSet::new();
            for &index in chosen {
                check_index(index, options.len())?;
                if !seen.insert(index) {
                    return Err(EngineError::DuplicateChoice { index });
                }
            }
        }
        (AnswerKey::FreeText { .. }, Answer::Text(text)) => {
            if normalize_text(text).is_empty() {
                return Err(EngineError::EmptyAnswer);
            }
        }
        (AnswerKey::Numeric { .. }, Answer::Numeric(value)) => {
            if !value.is_finite() {
                return Err(EngineError::NonFiniteAnswer);
            }
        }
        (key, _) => {
            return Err(EngineError::AnswerKindMismatch {
                expected: key_kind(key),
            })
        }
    }
    Ok(key)
}

/// Scores a validated answer in `[0, 1]`.
///
/// Multi-select answers earn partial credit equal to the Jaccard overlap of
/// the chosen and correct sets.
pub fn score_answer(key: &AnswerKey, answer: &Answer) -> Result<f64, EngineError> {
    let score = match (key, answer) {
        (AnswerKey::Choice { correct, .. }, Answer::Choice(index)) => {
            if index == correct {
                1.0
            } else {
                0.0
            }
        }
        (AnswerKey::MultiSelect { correct, .. }, Answer::MultiChoice(chosen)) => {
            let correct: HashSet<usize> = correct.iter().copied().collect();
            let chosen: HashSet<usize> = chosen.iter().copied().collect();
            let union = correct.union(&chosen).count();
            if union == 0 {
                0.0
            } else {
                correct.intersection(&chosen).count() as f64 / union as f64
            }
        }
        (AnswerKey::FreeText { accepted }, Answer::Text(text)) => {
            let given = normalize_text(text);
            if accepted.iter().any(|a| normalize_text(a) == given) {
                1.0
            } else {
                0.0
            }
        }
        (AnswerKey::Numeric { value, tolerance }, Answer::Numeric(given)) => {
            if (given - value).abs() <= *tolerance {
                1.0
            } else {
                0.0
            }
        }
        (key, _) => {
            return Err(EngineError::AnswerKindMismatch {
                expected: key_kind(key),
            })
        }
    };
    Ok(score)
}

/// Trims, lowercases and collapses internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_index(index: usize, options: usize) -> Result<(), EngineError> {
    if index >= options {
        Err(EngineError::ChoiceOutOfRange { index, options })
    } else {
        Ok(())
    }
}

fn key_kind(key: &AnswerKey) -> &'static str {
    match key {
        AnswerKey::Choice { .. } => "choice",
        AnswerKey::MultiSelect { .. } => "multi-select",
        AnswerKey::FreeText { .. } => "free-text",
        AnswerKey::Numeric { .. } => "numeric",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwise_core::node::{ContentRef, NodeKind};

    fn interaction(key: AnswerKey) -> Node {
        Node::new(NodeKind::Interaction, ContentRef::text("q", "?")).with_answer_key(key)
    }

    fn multi() -> AnswerKey {
        AnswerKey::MultiSelect {
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct: vec![0, 2],
        }
    }

    #[test]
    fn choice_scores_binary() {
        let key = AnswerKey::Choice {
            options: vec!["a".into(), "b".into()],
            correct: 1,
        };
        assert_eq!(score_answer(&key, &Answer::Choice(1)).unwrap(), 1.0);
        assert_eq!(score_answer(&key, &Answer::Choice(0)).unwrap(), 0.0);
    }

    #[test]
    fn multi_select_gives_partial_credit() {
        let key = multi();
        assert_eq!(score_answer(&key, &Answer::MultiChoice(vec![0, 2])).unwrap(), 1.0);
        let partial = score_answer(&key, &Answer::MultiChoice(vec![0, 1])).unwrap();
        assert!((partial - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn free_text_is_normalized() {
        let key = AnswerKey::FreeText {
            accepted: vec!["Carbon  Dioxide".into()],
        };
        let score = score_answer(&key, &Answer::Text("  carbon dioxide ".into())).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn numeric_respects_tolerance() {
        let key = AnswerKey::Numeric {
            value: 0.5,
            tolerance: 0.01,
        };
        assert_eq!(score_answer(&key, &Answer::Numeric(0.505)).unwrap(), 1.0);
        assert_eq!(score_answer(&key, &Answer::Numeric(0.52)).unwrap(), 0.0);
    }

    #[test]
    fn validation_rejects_malformed_payloads() {
        let node = interaction(multi());
        let id = NodeId(0);
        assert_eq!(
            validate_answer(id, &node, &Answer::Choice(0)).unwrap_err(),
            EngineError::AnswerKindMismatch {
                expected: "multi-select"
            }
        );
        assert_eq!(
            validate_answer(id, &node, &Answer::MultiChoice(vec![])).unwrap_err(),
            EngineError::EmptyAnswer
        );
        assert_eq!(
            validate_answer(id, &node, &Answer::MultiChoice(vec![1, 1])).unwrap_err(),
            EngineError::DuplicateChoice { index: 1 }
        );
        assert_eq!(
            validate_answer(id, &node, &Answer::MultiChoice(vec![7])).unwrap_err(),
            EngineError::ChoiceOutOfRange {
                index: 7,
                options: 4
            }
        );
    }

    #[test]
    fn validation_rejects_non_assessed_nodes() {
        let node = Node::new(NodeKind::Explanation, ContentRef::text("e", "b"));
        assert_eq!(
            validate_answer(NodeId(4), &node, &Answer::Choice(0)).unwrap_err(),
            EngineError::NotAssessed { node: NodeId(4) }
        );
    }

    #[test]
    fn validation_rejects_blank_and_nan() {
        let text = interaction(AnswerKey::FreeText {
            accepted: vec!["x".into()],
        });
        assert_eq!(
            validate_answer(NodeId(0), &text, &Answer::Text("   ".into())).unwrap_err(),
            EngineError::EmptyAnswer
        );
        let num = interaction(AnswerKey::Numeric {
            value: 1.0,
            tolerance: 0.0,
        });
        assert_eq!(
            validate_answer(NodeId(0), &num, &Answer::Numeric(f64::NAN)).unwrap_err(),
            EngineError::NonFiniteAnswer
        );
    }
}
