//! Core error types for pathwise-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of course construction, lookup and validation.

use thiserror::Error;

use crate::id::{ConceptId, MisconceptionId, NodeId};
use crate::validate::IntegrityViolation;

/// Core errors produced by the pathwise-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node id was not found in the course graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A concept id was not found in the course.
    #[error("concept not found: ConceptId({id})", id = id.0)]
    ConceptNotFound { id: ConceptId },

    /// A misconception id was not found in the course.
    #[error("misconception not found: MisconceptionId({id})", id = id.0)]
    MisconceptionNotFound { id: MisconceptionId },

    /// An edge failed validation while being added.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },

    /// The course graph violates one or more structural invariants.
    #[error("course graph integrity violated ({} violation(s))", violations.len())]
    GraphIntegrity { violations: Vec<IntegrityViolation> },

    /// A serialized course could not be decoded.
    #[error("course decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
