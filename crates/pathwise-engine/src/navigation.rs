//! Edge selection and lookahead over a course graph.
//!
//! Navigation is a pure function of the course, the current node and a
//! [`LearnerSnapshot`]. Outgoing edges are tried in evaluation order and the
//! first matching one wins; the catch-all `always` edge closes every list.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use pathwise_core::course::{Course, EdgeView};
use pathwise_core::edge::EdgeCondition;
use pathwise_core::id::{ConceptId, MisconceptionId, NodeId};
use pathwise_core::learner::Outcome;
use pathwise_core::node::{Node, NodeKind};

use crate::error::EngineError;

/// Thresholds read by edge conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationPolicy {
    /// `mastery_low` matches strictly below this.
    pub mastery_low_threshold: f64,
    /// `mastery_high` matches at or above this.
    pub mastery_high_threshold: f64,
    /// Minimum score counted as a pass.
    pub pass_threshold: f64,
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        NavigationPolicy {
            mastery_low_threshold: 0.4,
            mastery_high_threshold: 0.8,
            pass_threshold: 0.6,
        }
    }
}

impl NavigationPolicy {
    /// Verdict of a scored answer. A detected misconception always fails.
    pub fn outcome(&self, score: f64, misconception: bool) -> Outcome {
        if !misconception && score >= self.pass_threshold {
            Outcome::Pass
        } else {
            Outcome::Fail
        }
    }
}

/// What navigation knows about the learner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnerSnapshot {
    /// Outcome of the last interaction on the current node, if any.
    pub outcome: Option<Outcome>,
    pub misconception: Option<MisconceptionId>,
    /// Mastery per concept; absent concepts count as 0.0.
    pub mastery: HashMap<ConceptId, f64>,
}

impl LearnerSnapshot {
    /// The same learner one node later: interaction results are consumed.
    fn moved_on(&self) -> LearnerSnapshot {
        LearnerSnapshot {
            outcome: None,
            misconception: None,
            mastery: self.mastery.clone(),
        }
    }
}

/// Result of testing one edge condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Match,
    NoMatch,
    /// Depends on an interaction that has not been answered.
    Undetermined,
}

/// Minimum mastery across the node's concepts, or `None` for a node that
/// teaches no concept.
pub fn concept_mastery(node: &Node, snapshot: &LearnerSnapshot) -> Option<f64> {
    node.concepts
        .iter()
        .map(|c| snapshot.mastery.get(c).copied().unwrap_or(0.0))
        .reduce(f64::min)
}

/// Tests `condition` on an edge leaving `node`.
pub fn evaluate(
    condition: EdgeCondition,
    node: &Node,
    snapshot: &LearnerSnapshot,
    policy: &NavigationPolicy,
) -> Decision {
    let flagged = snapshot.misconception.is_some();
    let holds = match condition {
        EdgeCondition::Always => true,
        EdgeCondition::Optional => false,
        EdgeCondition::Pass => match snapshot.outcome {
            None => return Decision::Undetermined,
            Some(outcome) => !flagged && outcome == Outcome::Pass,
        },
        EdgeCondition::Fail => match snapshot.outcome {
            None => return Decision::Undetermined,
            Some(outcome) => flagged || outcome == Outcome::Fail,
        },
        EdgeCondition::MasteryLow => {
            flagged
                || concept_mastery(node, snapshot)
                    .map(|m| m < policy.mastery_low_threshold)
                    .unwrap_or(false)
        }
        EdgeCondition::MasteryHigh => {
            !flagged
                && concept_mastery(node, snapshot)
                    .map(|m| m >= policy.mastery_high_threshold)
                    .unwrap_or(false)
        }
    };
    if holds {
        Decision::Match
    } else {
        Decision::NoMatch
    }
}

/// Picks the edge to follow out of `from`.
///
/// Outcome-dependent edges without a recorded outcome do not match.
pub fn select_edge(
    course: &Course,
    from: NodeId,
    snapshot: &LearnerSnapshot,
    policy: &NavigationPolicy,
) -> Result<EdgeView, EngineError> {
    let node = course
        .node(from)
        .ok_or(EngineError::UnknownNode { node: from })?;
    course
        .outgoing(from)
        .into_iter()
        .find(|e| evaluate(e.condition, node, snapshot, policy) == Decision::Match)
        .ok_or(EngineError::NoMatchingEdge { node: from })
}

/// First matching edge out of `from` that does not lead into remediation.
pub fn select_non_remediation_edge(
    course: &Course,
    from: NodeId,
    snapshot: &LearnerSnapshot,
    policy: &NavigationPolicy,
) -> Option<EdgeView> {
    let node = course.node(from)?;
    course.outgoing(from).into_iter().find(|e| {
        evaluate(e.condition, node, snapshot, policy) == Decision::Match
            && !is_remediation(course, e.target)
    })
}

/// Nearest explanation or summary node reachable from `from`, else the
/// nearest reachable node of any other non-remediation kind. Remediation
/// nodes are walked through but never chosen.
pub fn fallback_target(course: &Course, from: NodeId) -> Option<NodeId> {
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);
    let mut nearest_any = None;

    while let Some(current) = queue.pop_front() {
        for edge in course.outgoing(current) {
            let target = edge.target;
            if !seen.insert(target) {
                continue;
            }
            if is_remediation(course, target) {
                queue.push_back(target);
                continue;
            }
            let Some(node) = course.node(target) else {
                continue;
            };
            if node.kind.is_fallback_target() {
                return Some(target);
            }
            nearest_any.get_or_insert(target);
            queue.push_back(target);
        }
    }
    nearest_any
}

/// Outgoing `optional` edges of `from`, in evaluation order.
pub fn optional_branches(course: &Course, from: NodeId) -> Vec<EdgeView> {
    course
        .outgoing(from)
        .into_iter()
        .filter(|e| e.condition == EdgeCondition::Optional)
        .collect()
}

fn is_remediation(course: &Course, id: NodeId) -> bool {
    course.node(id).map(|n| n.kind) == Some(NodeKind::Remediation)
}

/// Why a lookahead stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookaheadStop {
    /// `n` nodes were produced.
    Depth,
    /// The next step depends on an unanswered interaction.
    BranchPoint,
    Terminal,
    /// The next step would revisit a node.
    Cycle,
}

/// Predicted future nodes, excluding the starting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookahead {
    pub nodes: Vec<NodeId>,
    /// Node whose exit depends on an unanswered interaction.
    pub branch_point: Option<NodeId>,
    pub stop: LookaheadStop,
}

/// Simulates up to `n` steps from `from` following only edges decidable from
/// `snapshot`. The recorded outcome applies to the first step only.
pub fn lookahead(
    course: &Course,
    from: NodeId,
    snapshot: &LearnerSnapshot,
    n: usize,
    policy: &NavigationPolicy,
) -> Result<Lookahead, EngineError> {
    if !course.contains_node(from) {
        return Err(EngineError::UnknownNode { node: from });
    }
    let mut nodes = Vec::new();
    let mut seen = HashSet::from([from]);
    let mut current = from;
    let mut snapshot = snapshot.clone();

    let stop = loop {
        if nodes.len() >= n {
            break LookaheadStop::Depth;
        }
        if course.is_terminal(current) {
            break LookaheadStop::Terminal;
        }
        let node = course
            .node(current)
            .ok_or(EngineError::UnknownNode { node: current })?;

        let mut next = None;
        let mut undetermined = false;
        for edge in course.outgoing(current) {
            match evaluate(edge.condition, node, &snapshot, policy) {
                Decision::Match => {
                    next = Some(edge.target);
                    break;
                }
                Decision::Undetermined => {
                    undetermined = true;
                    break;
                }
                Decision::NoMatch => {}
            }
        }
        if undetermined {
            return Ok(Lookahead {
                nodes,
                branch_point: Some(current),
                stop: LookaheadStop::BranchPoint,
            });
        }
        let next = next.ok_or(EngineError::NoMatchingEdge { node: current })?;
        if !seen.insert(next) {
            break LookaheadStop::Cycle;
        }
        nodes.push(next);
        current = next;
        snapshot = snapshot.moved_on();
    };

    Ok(Lookahead {
        nodes,
        branch_point: None,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwise_core::concept::Signature;
    use pathwise_core::course::{CourseBuilder, CourseMeta};
    use pathwise_core::node::{AnswerKey, ContentRef};

    struct Fixture {
        course: Course,
        concept: ConceptId,
        hook: NodeId,
        explain: NodeId,
        question: NodeId,
        remedial: NodeId,
        stretch: NodeId,
        summary: NodeId,
    }

    /// hook -> explain -> question -(pass)-> summary
    ///                            -(fail)-> remedial -> question
    ///                            -(mastery_high)-> stretch -> summary
    fn fixture() -> Fixture {
        let mut b = CourseBuilder::new(CourseMeta::default());
        let concept = b.add_concept("photosynthesis");
        let m = b
            .add_misconception(concept, Signature::Choice { index: 1 }, "plants eat soil")
            .unwrap();
        let hook = b.add_node(Node::new(NodeKind::Hook, ContentRef::text("h", "b")));
        let explain = b.add_node(
            Node::new(NodeKind::Explanation, ContentRef::text("e", "b")).with_concept(concept),
        );
        let question = b.add_node(
            Node::new(NodeKind::Interaction, ContentRef::text("q", "b"))
                .with_concept(concept)
                .with_answer_key(AnswerKey::Choice {
                    options: vec!["light".into(), "soil".into()],
                    correct: 0,
                }),
        );
        let remedial = b.add_node(
            Node::new(NodeKind::Remediation, ContentRef::text("r", "b"))
                .with_concept(concept)
                .with_remediates(m),
        );
        let stretch = b.add_node(
            Node::new(NodeKind::Narrative, ContentRef::text("s", "b")).with_concept(concept),
        );
        let summary = b.add_node(Node::new(NodeKind::Summary, ContentRef::text("end", "b")));

        b.connect(hook, explain).unwrap();
        b.connect(explain, question).unwrap();
        b.add_edge(question, stretch, EdgeCondition::MasteryHigh, 0)
            .unwrap();
        b.add_edge(question, summary, EdgeCondition::Pass, 1).unwrap();
        b.add_edge(question, remedial, EdgeCondition::Fail, 2).unwrap();
        b.connect(question, summary).unwrap();
        b.connect(remedial, question).unwrap();
        b.connect(stretch, summary).unwrap();

        Fixture {
            course: b.build().unwrap(),
            concept,
            hook,
            explain,
            question,
            remedial,
            stretch,
            summary,
        }
    }

    fn answered(outcome: Outcome) -> LearnerSnapshot {
        LearnerSnapshot {
            outcome: Some(outcome),
            ..LearnerSnapshot::default()
        }
    }

    #[test]
    fn pass_and_fail_route_differently() {
        let f = fixture();
        let policy = NavigationPolicy::default();
        let pass = select_edge(&f.course, f.question, &answered(Outcome::Pass), &policy).unwrap();
        assert_eq!(pass.target, f.summary);
        let fail = select_edge(&f.course, f.question, &answered(Outcome::Fail), &policy).unwrap();
        assert_eq!(fail.target, f.remedial);
    }

    #[test]
    fn high_mastery_wins_by_priority() {
        let f = fixture();
        let mut snapshot = answered(Outcome::Pass);
        snapshot.mastery.insert(f.concept, 0.85);
        let edge = select_edge(&f.course, f.question, &snapshot, &NavigationPolicy::default())
            .unwrap();
        assert_eq!(edge.target, f.stretch);
    }

    #[test]
    fn misconception_forces_fail_path() {
        let f = fixture();
        let mut snapshot = answered(Outcome::Pass);
        snapshot.mastery.insert(f.concept, 0.95);
        snapshot.misconception = Some(MisconceptionId(0));
        let edge = select_edge(&f.course, f.question, &snapshot, &NavigationPolicy::default())
            .unwrap();
        assert_eq!(edge.target, f.remedial);
    }

    #[test]
    fn unanswered_question_takes_catch_all() {
        let f = fixture();
        let edge = select_edge(
            &f.course,
            f.question,
            &LearnerSnapshot::default(),
            &NavigationPolicy::default(),
        )
        .unwrap();
        assert_eq!(edge.target, f.summary);
        assert_eq!(edge.condition, EdgeCondition::Always);
    }

    #[test]
    fn node_without_concepts_never_matches_mastery_conditions() {
        let f = fixture();
        let hook = f.course.node(f.hook).unwrap();
        let snapshot = LearnerSnapshot::default();
        let policy = NavigationPolicy::default();
        assert_eq!(
            evaluate(EdgeCondition::MasteryLow, hook, &snapshot, &policy),
            Decision::NoMatch
        );
        let explain = f.course.node(f.explain).unwrap();
        assert_eq!(
            evaluate(EdgeCondition::MasteryLow, explain, &snapshot, &policy),
            Decision::Match
        );
    }

    #[test]
    fn optional_edges_never_match() {
        let f = fixture();
        let hook = f.course.node(f.hook).unwrap();
        assert_eq!(
            evaluate(
                EdgeCondition::Optional,
                hook,
                &LearnerSnapshot::default(),
                &NavigationPolicy::default()
            ),
            Decision::NoMatch
        );
    }

    #[test]
    fn fallback_avoids_remediation() {
        let f = fixture();
        let edge = select_non_remediation_edge(
            &f.course,
            f.question,
            &answered(Outcome::Fail),
            &NavigationPolicy::default(),
        )
        .unwrap();
        assert_eq!(edge.target, f.summary);
        assert_eq!(fallback_target(&f.course, f.remedial), Some(f.summary));
    }

    #[test]
    fn lookahead_stops_at_branch_point() {
        let f = fixture();
        let ahead = lookahead(
            &f.course,
            f.hook,
            &LearnerSnapshot::default(),
            5,
            &NavigationPolicy::default(),
        )
        .unwrap();
        assert_eq!(ahead.nodes, vec![f.explain, f.question]);
        assert_eq!(ahead.branch_point, Some(f.question));
        assert_eq!(ahead.stop, LookaheadStop::BranchPoint);
    }

    #[test]
    fn lookahead_uses_outcome_for_first_step_only() {
        let f = fixture();
        let ahead = lookahead(
            &f.course,
            f.question,
            &answered(Outcome::Fail),
            5,
            &NavigationPolicy::default(),
        )
        .unwrap();
        // remedial -> question would revisit the start.
        assert_eq!(ahead.nodes, vec![f.remedial]);
        assert_eq!(ahead.stop, LookaheadStop::Cycle);
    }

    #[test]
    fn lookahead_respects_depth_and_terminal() {
        let f = fixture();
        let policy = NavigationPolicy::default();
        let one = lookahead(&f.course, f.hook, &LearnerSnapshot::default(), 1, &policy).unwrap();
        assert_eq!(one.nodes, vec![f.explain]);
        assert_eq!(one.stop, LookaheadStop::Depth);

        let end = lookahead(&f.course, f.stretch, &LearnerSnapshot::default(), 4, &policy).unwrap();
        assert_eq!(end.nodes, vec![f.summary]);
        assert_eq!(end.stop, LookaheadStop::Terminal);
    }

    #[test]
    fn lookahead_with_zero_depth_is_empty() {
        let f = fixture();
        let ahead = lookahead(
            &f.course,
            f.hook,
            &LearnerSnapshot::default(),
            0,
            &NavigationPolicy::default(),
        )
        .unwrap();
        assert!(ahead.nodes.is_empty());
    }

    #[test]
    fn outcome_uses_pass_threshold() {
        let policy = NavigationPolicy::default();
        assert_eq!(policy.outcome(0.6, false), Outcome::Pass);
        assert_eq!(policy.outcome(0.59, false), Outcome::Fail);
        assert_eq!(policy.outcome(1.0, true), Outcome::Fail);
    }

    #[test]
    fn unknown_node_is_reported() {
        let f = fixture();
        let err = select_edge(
            &f.course,
            NodeId(99),
            &LearnerSnapshot::default(),
            &NavigationPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err, EngineError::UnknownNode { node: NodeId(99) });
    }
}
