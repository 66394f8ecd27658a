//! Navigation over a learner's position in a course.
//!
//! [`GraphService`] turns the pure selection functions of `pathwise_engine`
//! into transitions of a [`CourseProgress`], including the remediation hop
//! limit. Planning and applying are split so the engine can plan against a
//! read snapshot and apply under a compare-and-swap retry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pathwise_core::{ConceptId, Course, CourseProgress, EdgeId, Node, NodeId, NodeKind, Outcome};
use pathwise_engine::{
    fallback_target, lookahead, optional_branches, select_edge, select_non_remediation_edge,
    LearnerSnapshot, Lookahead, NavigationPolicy,
};

use crate::config::RemediationPolicy;
use crate::error::PlaybackError;

/// How the next node was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Route {
    /// The first matching edge.
    Edge,
    /// A remediation node, `hop` deep in the current chain.
    Remediation { hop: u32 },
    /// The hop limit was hit; routed away from remediation.
    Fallback,
    /// A learner-chosen optional edge.
    Detour,
    /// The learner is on a terminal node; nothing moves.
    Stay,
}

/// A planned move between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: NodeId,
    pub to: NodeId,
    /// Edge followed; `None` for fallbacks outside the edge list and stays.
    pub edge: Option<EdgeId>,
    pub route: Route,
}

/// Edge selection bound to the configured thresholds and hop limit.
#[derive(Debug, Clone, Default)]
pub struct GraphService {
    navigation: NavigationPolicy,
    remediation: RemediationPolicy,
}

impl GraphService {
    pub fn new(navigation: NavigationPolicy, remediation: RemediationPolicy) -> Self {
        GraphService {
            navigation,
            remediation,
        }
    }

    pub fn navigation(&self) -> &NavigationPolicy {
        &self.navigation
    }

    /// The node the learner is on.
    pub fn get_current_node<'c>(
        &self,
        course: &'c Course,
        progress: &CourseProgress,
    ) -> Result<&'c Node, PlaybackError> {
        course.node(progress.current_node).ok_or_else(|| {
            PlaybackError::integrity(format!(
                "current node {} is not in course {}",
                progress.current_node, progress.course
            ))
        })
    }

    /// What navigation sees. A misconception only counts while its
    /// interaction's outcome is still pending consumption.
    pub fn snapshot(
        &self,
        progress: &CourseProgress,
        mastery: HashMap<ConceptId, f64>,
    ) -> LearnerSnapshot {
        LearnerSnapshot {
            outcome: progress.last_outcome,
            misconception: progress
                .last_outcome
                .and(progress.active_misconception),
            mastery,
        }
    }

    /// Decides where `advance` goes from the learner's current node.
    pub fn plan_advance(
        &self,
        course: &Course,
        progress: &CourseProgress,
        mastery: HashMap<ConceptId, f64>,
    ) -> Result<Transition, PlaybackError> {
        let from = progress.current_node;
        self.get_current_node(course, progress)?;
        if course.is_terminal(from) {
            return Ok(Transition {
                from,
                to: from,
                edge: None,
                route: Route::Stay,
            });
        }

        let snapshot = self.snapshot(progress, mastery);
        let edge = select_edge(course, from, &snapshot, &self.navigation)?;
        if !is_remediation(course, edge.target) {
            return Ok(Transition {
                from,
                to: edge.target,
                edge: Some(edge.id),
                route: Route::Edge,
            });
        }

        if !self.remediation.exhausted(progress.remediation_hops) {
            return Ok(Transition {
                from,
                to: edge.target,
                edge: Some(edge.id),
                route: Route::Remediation {
                    hop: progress.remediation_hops + 1,
                },
            });
        }

        tracing::info!(
            user = %progress.user,
            course = %progress.course,
            node = %from,
            hops = progress.remediation_hops,
            "remediation limit reached, routing to fallback"
        );
        if let Some(edge) = select_non_remediation_edge(course, from, &snapshot, &self.navigation)
        {
            return Ok(Transition {
                from,
                to: edge.target,
                edge: Some(edge.id),
                route: Route::Fallback,
            });
        }
        let to = fallback_target(course, from).ok_or_else(|| {
            PlaybackError::integrity(format!(
                "no non-remediation node reachable from node {}",
                from
            ))
        })?;
        Ok(Transition {
            from,
            to,
            edge: None,
            route: Route::Fallback,
        })
    }

    /// Plans following the optional edge from the current node to `target`.
    pub fn plan_detour(
        &self,
        course: &Course,
        progress: &CourseProgress,
        target: NodeId,
    ) -> Result<Transition, PlaybackError> {
        let from = progress.current_node;
        self.get_current_node(course, progress)?;
        let edge = optional_branches(course, from)
            .into_iter()
            .find(|e| e.target == target)
            .ok_or_else(|| {
                PlaybackError::NotFound(format!(
                    "no optional branch from node {} to node {}",
                    from, target
                ))
            })?;
        Ok(Transition {
            from,
            to: edge.target,
            edge: Some(edge.id),
            route: Route::Detour,
        })
    }

    /// Applies `transition` to `progress`. Returns `true` when the move
    /// completed the course.
    pub fn apply(
        &self,
        course: &Course,
        progress: &mut CourseProgress,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> bool {
        if transition.route == Route::Stay {
            let newly_completed = !progress.completed;
            progress.completed = true;
            return newly_completed;
        }

        let passed = progress.last_outcome == Some(Outcome::Pass);
        progress.remediation_hops = match transition.route {
            Route::Remediation { hop } => hop,
            Route::Fallback => 0,
            _ if passed => 0,
            _ => progress.remediation_hops,
        };
        if !matches!(transition.route, Route::Remediation { .. }) {
            progress.active_misconception = None;
        }
        progress.last_outcome = None;
        progress.current_node = transition.to;
        progress.visited.push(transition.to);
        progress.updated_at = now;

        let was_completed = progress.completed;
        progress.completed = was_completed || course.is_terminal(transition.to);
        progress.completed && !was_completed
    }

    /// Predicts up to `n` upcoming nodes without changing anything.
    pub fn lookahead(
        &self,
        course: &Course,
        progress: &CourseProgress,
        mastery: HashMap<ConceptId, f64>,
        n: usize,
    ) -> Result<Lookahead, PlaybackError> {
        self.get_current_node(course, progress)?;
        let snapshot = self.snapshot(progress, mastery);
        Ok(lookahead(
            course,
            progress.current_node,
            &snapshot,
            n,
            &self.navigation,
        )?)
    }

    /// Optional detours offered from the current node, as target ids.
    pub fn optional_branches(
        &self,
        course: &Course,
        progress: &CourseProgress,
    ) -> Result<Vec<NodeId>, PlaybackError> {
        self.get_current_node(course, progress)?;
        Ok(optional_branches(course, progress.current_node)
            .into_iter()
            .map(|e| e.target)
            .collect())
    }
}

pub(crate) fn is_remediation(course: &Course, id: NodeId) -> bool {
    course.node(id).map(|n| n.kind) == Some(NodeKind::Remediation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathwise_core::{
        AnswerKey, ContentRef, CourseBuilder, CourseId, CourseMeta, EdgeCondition, MisconceptionId,
        Signature, UserId,
    };
    use proptest::prelude::*;

    struct Fixture {
        course: Course,
        concept: ConceptId,
        misconception: MisconceptionId,
        question: NodeId,
        first_fix: NodeId,
        second_fix: NodeId,
        recap: NodeId,
        bonus: NodeId,
        end: NodeId,
    }

    /// intro -> question -(fail)-> first_fix -> second_fix -> question
    ///                   -(pass)-> recap -> end
    ///                   -(always)-> recap
    /// recap -(optional)-> bonus -> end
    fn fixture() -> Fixture {
        let mut b = CourseBuilder::new(CourseMeta::default());
        let concept = b.add_concept("fractions");
        let misconception = b
            .add_misconception(concept, Signature::Choice { index: 1 }, "add the denominators")
            .unwrap();
        let intro = b.add_node(Node::new(NodeKind::Hook, ContentRef::text("intro", "b")));
        let question = b.add_node(
            Node::new(NodeKind::Interaction, ContentRef::text("q", "1/2 + 1/2?"))
                .with_concept(concept)
                .with_answer_key(AnswerKey::Choice {
                    options: vec!["1".into(), "2/4".into()],
                    correct: 0,
                }),
        );
        let first_fix = b.add_node(
            Node::new(NodeKind::Remediation, ContentRef::text("fix 1", "b"))
                .with_concept(concept)
                .with_remediates(misconception),
        );
        let second_fix = b.add_node(
            Node::new(NodeKind::Remediation, ContentRef::text("fix 2", "b")).with_concept(concept),
        );
        let recap = b.add_node(
            Node::new(NodeKind::Explanation, ContentRef::text("recap", "b")).with_concept(concept),
        );
        let bonus = b.add_node(Node::new(NodeKind::Narrative, ContentRef::text("bonus", "b")));
        let end = b.add_node(Node::new(NodeKind::Summary, ContentRef::text("end", "b")));

        b.connect(intro, question).unwrap();
        b.add_edge(question, recap, EdgeCondition::Pass, 0).unwrap();
        b.add_edge(question, first_fix, EdgeCondition::Fail, 1).unwrap();
        b.connect(question, recap).unwrap();
        b.connect(first_fix, second_fix).unwrap();
        b.connect(second_fix, question).unwrap();
        b.add_edge(recap, bonus, EdgeCondition::Optional, 0).unwrap();
        b.connect(recap, end).unwrap();
        b.connect(bonus, end).unwrap();

        Fixture {
            course: b.build().unwrap(),
            concept,
            misconception,
            question,
            first_fix,
            second_fix,
            recap,
            bonus,
            end,
        }
    }

    fn at(node: NodeId) -> CourseProgress {
        let mut p = CourseProgress::start(UserId::new_v4(), CourseId(1), NodeId(0), Utc::now());
        p.current_node = node;
        p
    }

    fn step(service: &GraphService, course: &Course, progress: &mut CourseProgress) -> Transition {
        let t = service
            .plan_advance(course, progress, HashMap::new())
            .unwrap();
        service.apply(course, progress, &t, Utc::now());
        t
    }

    #[test]
    fn missing_current_node_is_an_integrity_error() {
        let f = fixture();
        let err = GraphService::default()
            .get_current_node(&f.course, &at(NodeId(99)))
            .unwrap_err();
        assert!(matches!(err, PlaybackError::GraphIntegrity { .. }));
    }

    #[test]
    fn fail_enters_remediation_and_counts_hops() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.question);
        p.last_outcome = Some(Outcome::Fail);
        p.active_misconception = Some(f.misconception);

        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.to, f.first_fix);
        assert_eq!(t.route, Route::Remediation { hop: 1 });
        assert_eq!(p.remediation_hops, 1);
        assert_eq!(p.active_misconception, Some(f.misconception));
        assert_eq!(p.last_outcome, None);

        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.route, Route::Remediation { hop: 2 });
        assert_eq!(p.active_misconception, Some(f.misconception));
        assert_eq!(p.current_node, f.second_fix);

        // Leaving the chain drops the misconception but keeps the hop count.
        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.to, f.question);
        assert_eq!(p.active_misconception, None);
        assert_eq!(p.remediation_hops, 2);
    }

    #[test]
    fn exhausted_hops_route_to_fallback() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.question);
        p.remediation_hops = 2;
        p.last_outcome = Some(Outcome::Fail);

        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.route, Route::Fallback);
        assert_eq!(t.to, f.recap);
        assert_eq!(p.remediation_hops, 0);
    }

    #[test]
    fn fallback_leaves_remediation_only_exits() {
        let f = fixture();
        let service = GraphService::new(
            NavigationPolicy::default(),
            RemediationPolicy {
                max_remediation_hops: 1,
            },
        );
        let mut p = at(f.first_fix);
        p.remediation_hops = 1;

        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.route, Route::Fallback);
        assert_eq!(t.edge, None);
        assert_eq!(t.to, f.recap);
    }

    #[test]
    fn pass_resets_hops() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.question);
        p.remediation_hops = 1;
        p.last_outcome = Some(Outcome::Pass);
        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.to, f.recap);
        assert_eq!(p.remediation_hops, 0);
    }

    #[test]
    fn terminal_node_stays_and_completes() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.recap);
        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.to, f.end);
        assert!(p.completed);

        let visited = p.visited.len();
        let t = step(&service, &f.course, &mut p);
        assert_eq!(t.route, Route::Stay);
        assert_eq!(p.current_node, f.end);
        assert_eq!(p.visited.len(), visited);
    }

    #[test]
    fn optional_detour() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.recap);
        assert_eq!(service.optional_branches(&f.course, &p).unwrap(), vec![f.bonus]);

        // Never taken automatically.
        let auto = service.plan_advance(&f.course, &p, HashMap::new()).unwrap();
        assert_eq!(auto.to, f.end);

        let t = service.plan_detour(&f.course, &p, f.bonus).unwrap();
        assert_eq!(t.route, Route::Detour);
        service.apply(&f.course, &mut p, &t, Utc::now());
        assert_eq!(p.current_node, f.bonus);

        let err = service.plan_detour(&f.course, &p, f.recap).unwrap_err();
        assert!(matches!(err, PlaybackError::NotFound(_)));
    }

    #[test]
    fn stale_misconception_is_ignored() {
        let f = fixture();
        let service = GraphService::default();
        let mut p = at(f.question);
        p.active_misconception = Some(f.misconception);
        let snapshot = service.snapshot(&p, HashMap::from([(f.concept, 0.9)]));
        assert_eq!(snapshot.misconception, None);
    }

    proptest! {
        #[test]
        fn remediation_chain_never_exceeds_limit(max_hops in 0u32..5, steps in 1usize..40) {
            let f = fixture();
            let service = GraphService::new(
                NavigationPolicy::default(),
                RemediationPolicy { max_remediation_hops: max_hops },
            );
            let mut p = at(f.question);
            let mut chain = 0u32;
            for _ in 0..steps {
                if p.completed {
                    break;
                }
                if p.current_node == f.question {
                    p.last_outcome = Some(Outcome::Fail);
                    p.active_misconception = Some(f.misconception);
                }
                let t = step(&service, &f.course, &mut p);
                if is_remediation(&f.course, t.to) {
                    chain += 1;
                } else if t.route == Route::Fallback {
                    chain = 0;
                }
                prop_assert!(chain <= max_hops);
                prop_assert!(p.remediation_hops <= max_hops);
            }
        }
    }
}
