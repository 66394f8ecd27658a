//! Property tests over randomly generated course graphs.

use proptest::prelude::*;

use pathwise_core::{
    ContentRef, Course, CourseBuilder, CourseMeta, EdgeCondition, Node, NodeId, NodeKind,
};

const CONDITIONS: [EdgeCondition; 6] = [
    EdgeCondition::Always,
    EdgeCondition::Pass,
    EdgeCondition::Fail,
    EdgeCondition::MasteryLow,
    EdgeCondition::MasteryHigh,
    EdgeCondition::Optional,
];

/// Raw edge description: (from, to, condition index, priority).
type RawEdge = (usize, usize, usize, u16);

fn build(node_count: usize, spine: bool, extra: &[RawEdge]) -> Result<Course, pathwise_core::CoreError> {
    let mut b = CourseBuilder::new(CourseMeta::default());
    let ids: Vec<NodeId> = (0..node_count)
        .map(|i| {
            let kind = if i + 1 == node_count {
                NodeKind::Summary
            } else {
                NodeKind::Narrative
            };
            b.add_node(Node::new(kind, ContentRef::text(format!("n{i}"), "body")))
        })
        .collect();
    if spine {
        for pair in ids.windows(2) {
            b.connect(pair[0], pair[1])?;
        }
    }
    for &(from, to, cond, priority) in extra {
        let (from, to) = (ids[from % node_count], ids[to % node_count]);
        if from == to {
            continue;
        }
        let condition = CONDITIONS[cond % CONDITIONS.len()];
        // Keep conditional edges ahead of the spine's catch-all.
        let priority = if condition == EdgeCondition::Always {
            priority
        } else {
            priority % 1000
        };
        b.add_edge(from, to, condition, priority)?;
    }
    b.build()
}

proptest! {
    #[test]
    fn validated_courses_always_have_catch_all(
        node_count in 2usize..12,
        spine in any::<bool>(),
        extra in proptest::collection::vec((0usize..12, 0usize..12, 0usize..6, any::<u16>()), 0..20),
    ) {
        if let Ok(course) = build(node_count, spine, &extra) {
            for id in course.node_ids() {
                if course.is_terminal(id) {
                    continue;
                }
                let edges = course.outgoing(id);
                let always: Vec<_> = edges
                    .iter()
                    .filter(|e| e.condition == EdgeCondition::Always)
                    .collect();
                prop_assert_eq!(always.len(), 1);
                prop_assert_eq!(edges.last().map(|e| e.id), Some(always[0].id));
            }
        }
    }

    #[test]
    fn spine_with_conditional_shortcuts_validates(
        node_count in 2usize..12,
        extra in proptest::collection::vec((0usize..12, 0usize..12, 1usize..6, 0u16..1000), 0..20),
    ) {
        // Forward-only conditional edges never break reachability.
        let forward: Vec<RawEdge> = extra
            .into_iter()
            .filter(|(f, t, _, _)| f % node_count < t % node_count)
            .collect();
        prop_assert!(build(node_count, true, &forward).is_ok());
    }
}
