//! Load-time structural validation of course graphs.
//!
//! [`validate`] collects every violation instead of stopping at the first, so
//! an upstream generator gets the complete list in one round trip. A course
//! with any violation is never handed to navigation.

use std::collections::{HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::course::Course;
use crate::edge::EdgeCondition;
use crate::id::{ConceptId, EdgeId, MisconceptionId, NodeId};
use crate::node::NodeKind;

/// A single structural defect in a course graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    #[error("course has no nodes")]
    EmptyCourse,

    #[error("entry node {entry} does not exist")]
    EntryMissing { entry: NodeId },

    #[error("node {node} has outgoing edges but no always edge")]
    MissingCatchAll { node: NodeId },

    #[error("node {node} has {count} always edges, expected exactly one")]
    DuplicateCatchAll { node: NodeId, count: usize },

    #[error("always edge {edge} on node {node} is not evaluated last")]
    CatchAllNotLast { node: NodeId, edge: EdgeId },

    #[error("node {node} is unreachable from the entry")]
    Unreachable { node: NodeId },

    #[error("no terminal node is reachable from node {node}")]
    NoPathToEnd { node: NodeId },

    #[error("node {node} references unknown concept {concept}")]
    NodeUnknownConcept { node: NodeId, concept: ConceptId },

    #[error("node {node} lists concept {concept} more than once")]
    DuplicateConcept { node: NodeId, concept: ConceptId },

    #[error("misconception {misconception} references unknown concept {concept}")]
    MisconceptionUnknownConcept {
        misconception: MisconceptionId,
        concept: ConceptId,
    },

    #[error("interaction node {node} has no answer key")]
    MissingAnswerKey { node: NodeId },

    #[error("node {node} has a malformed answer key: {reason}")]
    MalformedAnswerKey { node: NodeId, reason: String },

    #[error("node {node} remediates unknown misconception {misconception}")]
    UnknownMisconception {
        node: NodeId,
        misconception: MisconceptionId,
    },
}

/// Checks every structural invariant of `course`. Returns an empty vector
/// when the course is valid.
pub fn validate(course: &Course) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();

    if course.node_count() == 0 {
        violations.push(IntegrityViolation::EmptyCourse);
        return violations;
    }
    if !course.contains_node(course.entry()) {
        violations.push(IntegrityViolation::EntryMissing {
            entry: course.entry(),
        });
        return violations;
    }

    check_catch_all_edges(course, &mut violations);
    check_reachability(course, &mut violations);
    check_references(course, &mut violations);

    violations
}

fn check_catch_all_edges(course: &Course, violations: &mut Vec<IntegrityViolation>) {
    for id in course.node_ids() {
        let edges = course.outgoing(id);
        if edges.is_empty() {
            continue;
        }
        let catch_all: Vec<_> = edges
            .iter()
            .filter(|e| e.condition == EdgeCondition::Always)
            .collect();
        match catch_all.len() {
            0 => violations.push(IntegrityViolation::MissingCatchAll { node: id }),
            1 => {
                let always = catch_all[0];
                let shadowed = edges
                    .iter()
                    .any(|e| e.id != always.id && e.priority >= always.priority);
                if shadowed {
                    violations.push(IntegrityViolation::CatchAllNotLast {
                        node: id,
                        edge: always.id,
                    });
                }
            }
            count => violations.push(IntegrityViolation::DuplicateCatchAll { node: id, count }),
        }
    }
}

fn check_reachability(course: &Course, violations: &mut Vec<IntegrityViolation>) {
    let graph = course.graph();

    let forward = bfs(course, vec![course.entry()], Direction::Outgoing);
    let terminals: Vec<NodeId> = course
        .node_ids()
        .into_iter()
        .filter(|id| course.is_terminal(*id))
        .collect();
    let backward = bfs(course, terminals, Direction::Incoming);

    for idx in graph.node_indices() {
        let id = NodeId::from(idx);
        if !forward.contains(&id) {
            violations.push(IntegrityViolation::Unreachable { node: id });
        }
        if !backward.contains(&id) {
            violations.push(IntegrityViolation::NoPathToEnd { node: id });
        }
    }
    // node_indices() iteration order is stable but not sorted; keep reports
    // deterministic.
    violations.sort_by_key(violation_sort_key);
}

fn bfs(course: &Course, seeds: Vec<NodeId>, direction: Direction) -> HashSet<NodeId> {
    let graph = course.graph();
    let mut seen: HashSet<NodeId> = seeds.iter().copied().collect();
    let mut queue: VecDeque<NodeId> = seeds.into_iter().collect();
    while let Some(id) = queue.pop_front() {
        let idx: NodeIndex<u32> = id.into();
        for next in graph.neighbors_directed(idx, direction) {
            let next = NodeId::from(next);
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

fn check_references(course: &Course, violations: &mut Vec<IntegrityViolation>) {
    for id in course.node_ids() {
        let Some(node) = course.node(id) else {
            continue;
        };
        for (i, concept) in node.concepts.iter().enumerate() {
            if node.concepts[..i].contains(concept) {
                violations.push(IntegrityViolation::DuplicateConcept {
                    node: id,
                    concept: *concept,
                });
                continue;
            }
            if course.concept(*concept).is_none() {
                violations.push(IntegrityViolation::NodeUnknownConcept {
                    node: id,
                    concept: *concept,
                });
            }
        }
        match (&node.answer_key, node.kind) {
            (None, NodeKind::Interaction) => {
                violations.push(IntegrityViolation::MissingAnswerKey { node: id })
            }
            (Some(key), _) => {
                if let Some(reason) = key.defect() {
                    violations.push(IntegrityViolation::MalformedAnswerKey { node: id, reason });
                }
            }
            (None, _) => {}
        }
        if let Some(misconception) = node.remediates {
            if course.misconception(misconception).is_none() {
                violations.push(IntegrityViolation::UnknownMisconception {
                    node: id,
                    misconception,
                });
            }
        }
    }
    for m in course.misconceptions() {
        if course.concept(m.concept).is_none() {
            violations.push(IntegrityViolation::MisconceptionUnknownConcept {
                misconception: m.id,
                concept: m.concept,
            });
        }
    }
}

fn violation_sort_key(v: &IntegrityViolation) -> (u8, u32) {
    match v {
        IntegrityViolation::EmptyCourse => (0, 0),
        IntegrityViolation::EntryMissing { entry } => (1, entry.0),
        IntegrityViolation::MissingCatchAll { node } => (2, node.0),
        IntegrityViolation::DuplicateCatchAll { node, .. } => (3, node.0),
        IntegrityViolation::CatchAllNotLast { node, .. } => (4, node.0),
        IntegrityViolation::Unreachable { node } => (5, node.0),
        IntegrityViolation::NoPathToEnd { node } => (6, node.0),
        IntegrityViolation::NodeUnknownConcept { node, .. } => (7, node.0),
        IntegrityViolation::MisconceptionUnknownConcept { misconception, .. } => {
            (8, misconception.0)
        }
        IntegrityViolation::MissingAnswerKey { node } => (9, node.0),
        IntegrityViolation::MalformedAnswerKey { node, .. } => (10, node.0),
        IntegrityViolation::UnknownMisconception { node, .. } => (11, node.0),
        IntegrityViolation::DuplicateConcept { node, .. } => (12, node.0),
    }
}
