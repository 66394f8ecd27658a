//! Errors produced by the pure playback algorithms.

use pathwise_core::id::NodeId;
use thiserror::Error;

/// Errors from scoring, scheduling and navigation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Answers were submitted for a node that does not accept them.
    #[error("node {node} does not accept answers")]
    NotAssessed { node: NodeId },

    /// The node accepts answers but carries no key to score them against.
    #[error("node {node} has no answer key")]
    MissingAnswerKey { node: NodeId },

    /// The answer payload does not fit the node's answer key.
    #[error("expected a {expected} answer")]
    AnswerKindMismatch { expected: &'static str },

    #[error("choice {index} out of range ({options} options)")]
    ChoiceOutOfRange { index: usize, options: usize },

    #[error("choice {index} selected more than once")]
    DuplicateChoice { index: usize },

    #[error("answer is empty")]
    EmptyAnswer,

    #[error("numeric answer is not finite")]
    NonFiniteAnswer,

    /// SM-2 recall quality must be in `0..=5`.
    #[error("review quality {quality} outside 0..=5")]
    QualityOutOfRange { quality: u8 },

    /// No outgoing edge matched and no catch-all exists.
    #[error("no edge out of node {node} matched and no always edge exists")]
    NoMatchingEdge { node: NodeId },

    /// Navigation was asked about a node the course does not contain.
    #[error("node {node} is not part of the course")]
    UnknownNode { node: NodeId },
}
