//! Learning-content nodes placed in the course graph.
//!
//! A [`Node`] is immutable once the course is built. Interaction nodes carry
//! an [`AnswerKey`] used for scoring; remediation nodes may name the
//! misconception they were authored for.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{ConceptId, MisconceptionId};

/// The role a node plays in a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Hook,
    Narrative,
    Explanation,
    Interaction,
    Remediation,
    Summary,
    Review,
    Transition,
}

impl NodeKind {
    /// All node kinds, in declaration order.
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Hook,
        NodeKind::Narrative,
        NodeKind::Explanation,
        NodeKind::Interaction,
        NodeKind::Remediation,
        NodeKind::Summary,
        NodeKind::Review,
        NodeKind::Transition,
    ];

    /// Returns the lowercase wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Hook => "hook",
            NodeKind::Narrative => "narrative",
            NodeKind::Explanation => "explanation",
            NodeKind::Interaction => "interaction",
            NodeKind::Remediation => "remediation",
            NodeKind::Summary => "summary",
            NodeKind::Review => "review",
            NodeKind::Transition => "transition",
        }
    }

    /// Returns `true` for kinds that accept learner answers.
    pub fn is_assessed(&self) -> bool {
        matches!(self, NodeKind::Interaction | NodeKind::Review)
    }

    /// Returns `true` for kinds usable as a remediation-exhaustion fallback.
    pub fn is_fallback_target(&self) -> bool {
        matches!(self, NodeKind::Explanation | NodeKind::Summary)
    }
}

/// Authored difficulty of a node, used to weight mastery evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Intro,
    #[default]
    Core,
    Stretch,
}

/// Reference to the content delivered by a node.
///
/// `narration` is the text sent to speech synthesis and `visual_prompt` the
/// optional image prompt; both feed the asset pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentRef {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default)]
    pub visual_prompt: Option<String>,
}

impl ContentRef {
    /// Creates a text-only content reference.
    pub fn text(title: impl Into<String>, body: impl Into<String>) -> Self {
        ContentRef {
            title: title.into(),
            body: body.into(),
            narration: None,
            visual_prompt: None,
        }
    }

    /// Sets the narration script.
    pub fn with_narration(mut self, narration: impl Into<String>) -> Self {
        self.narration = Some(narration.into());
        self
    }

    /// Sets the image prompt.
    pub fn with_visual(mut self, prompt: impl Into<String>) -> Self {
        self.visual_prompt = Some(prompt.into());
        self
    }
}

/// Expected answer for an interaction node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerKey {
    /// Exactly one option is correct.
    Choice { options: Vec<String>, correct: usize },
    /// Several options are correct; partial credit by set overlap.
    MultiSelect {
        options: Vec<String>,
        correct: Vec<usize>,
    },
    /// Any of the accepted strings (normalized) is correct.
    FreeText { accepted: Vec<String> },
    /// A number within `tolerance` of `value` is correct.
    Numeric { value: f64, tolerance: f64 },
}

impl AnswerKey {
    /// Describes structural problems with the key, if any.
    pub fn defect(&self) -> Option<String> {
        match self {
            AnswerKey::Choice { options, correct } => {
                if options.is_empty() {
                    Some("choice key has no options".to_string())
                } else if *correct >= options.len() {
                    Some(format!(
                        "correct option {} out of range ({} options)",
                        correct,
                        options.len()
                    ))
                } else {
                    None
                }
            }
            AnswerKey::MultiSelect { options, correct } => {
                if correct.is_empty() {
                    Some("multi-select key has no correct options".to_string())
                } else if let Some(bad) = correct.iter().find(|&&i| i >= options.len()) {
                    Some(format!(
                        "correct option {} out of range ({} options)",
                        bad,
                        options.len()
                    ))
                } else {
                    None
                }
            }
            AnswerKey::FreeText { accepted } => {
                if accepted.iter().all(|a| a.trim().is_empty()) {
                    Some("free-text key has no accepted answers".to_string())
                } else {
                    None
                }
            }
            AnswerKey::Numeric { value, tolerance } => {
                if !value.is_finite() || !tolerance.is_finite() || *tolerance < 0.0 {
                    Some("numeric key must be finite with non-negative tolerance".to_string())
                } else {
                    None
                }
            }
        }
    }
}

/// A learning-content unit in the course graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub content: ContentRef,
    /// Concepts this node teaches or assesses.
    #[serde(default)]
    pub concepts: SmallVec<[ConceptId; 2]>,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Present on assessed nodes.
    #[serde(default)]
    pub answer_key: Option<AnswerKey>,
    /// Misconception a remediation node was authored for.
    #[serde(default)]
    pub remediates: Option<MisconceptionId>,
}

impl Node {
    /// Creates a node with no concepts, default difficulty, no answer key.
    pub fn new(kind: NodeKind, content: ContentRef) -> Self {
        Node {
            kind,
            content,
            concepts: SmallVec::new(),
            difficulty: Difficulty::default(),
            answer_key: None,
            remediates: None,
        }
    }

    /// Adds a concept reference.
    pub fn with_concept(mut self, concept: ConceptId) -> Self {
        if !self.concepts.contains(&concept) {
            self.concepts.push(concept);
        }
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_answer_key(mut self, key: AnswerKey) -> Self {
        self.answer_key = Some(key);
        self
    }

    pub fn with_remediates(mut self, misconception: MisconceptionId) -> Self {
        self.remediates = Some(misconception);
        self
    }

    /// Drops repeated concept references, keeping first-seen order.
    pub(crate) fn dedup_concepts(&mut self) {
        let mut seen = SmallVec::<[ConceptId; 2]>::new();
        self.concepts.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(*c);
                true
            }
        });
    }

    /// The first concept, used as the node's primary skill.
    pub fn primary_concept(&self) -> Option<ConceptId> {
        self.concepts.first().copied()
    }
}
