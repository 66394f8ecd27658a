//! Daily review queue construction.
//!
//! Due concepts are ranked by overdueness and expanded into review cards.
//! Cards are then interleaved so that no concept appears more than twice in a
//! row: at every step the most overdue concept that would not extend a run
//! past two is chosen.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pathwise_core::id::{ConceptId, CourseId, NodeId};
use pathwise_core::learner::ReviewSchedule;

use crate::sm2::{is_leech, ReviewPolicy};

/// Longest permitted run of cards for the same concept.
pub const MAX_CONSECUTIVE: usize = 2;

/// A concept with a schedule, as input to queue building.
#[derive(Debug, Clone, PartialEq)]
pub struct DueConcept {
    pub course: CourseId,
    pub concept: ConceptId,
    pub schedule: ReviewSchedule,
    /// Review nodes for this concept in its course, ascending.
    pub review_nodes: Vec<NodeId>,
}

/// One item of the daily queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCard {
    pub course: CourseId,
    pub concept: ConceptId,
    /// Review node to play, or `None` for a bare concept recall card.
    pub node: Option<NodeId>,
    /// Hours past the due time at queue-build time.
    pub overdue_hours: i64,
    pub leech: bool,
}

impl ReviewCard {
    /// Identity used by the interleaving invariant.
    pub fn concept_key(&self) -> (CourseId, ConceptId) {
        (self.course, self.concept)
    }
}

/// Builds the queue of at most `max_items` cards from due concepts.
pub fn build_daily_queue(
    mut candidates: Vec<DueConcept>,
    now: DateTime<Utc>,
    max_items: usize,
    policy: &ReviewPolicy,
) -> Vec<ReviewCard> {
    candidates.retain(|c| c.schedule.is_due(now));
    candidates.sort_by(|a, b| {
        a.schedule
            .due_at
            .cmp(&b.schedule.due_at)
            .then_with(|| {
                is_leech(&b.schedule, policy.leech_threshold)
                    .cmp(&is_leech(&a.schedule, policy.leech_threshold))
            })
            .then_with(|| (a.course, a.concept).cmp(&(b.course, b.concept)))
    });

    let groups: Vec<((CourseId, ConceptId), Vec<ReviewCard>)> = candidates
        .iter()
        .map(|c| ((c.course, c.concept), expand_cards(c, now, policy)))
        .collect();

    interleave(groups, MAX_CONSECUTIVE, max_items)
}

fn expand_cards(due: &DueConcept, now: DateTime<Utc>, policy: &ReviewPolicy) -> Vec<ReviewCard> {
    let leech = is_leech(&due.schedule, policy.leech_threshold);
    let base = policy.cards_per_concept.max(1);
    // Leeches get one extra repetition.
    let count = if leech { base + 1 } else { base };
    let overdue_hours = (now - due.schedule.due_at).num_hours();

    let nodes: Vec<Option<NodeId>> = if due.review_nodes.is_empty() {
        vec![None]
    } else {
        due.review_nodes.iter().copied().map(Some).collect()
    };
    let count = if due.review_nodes.is_empty() && !leech {
        1
    } else {
        count
    };

    (0..count)
        .map(|i| ReviewCard {
            course: due.course,
            concept: due.concept,
            node: nodes[i % nodes.len()],
            overdue_hours,
            leech,
        })
        .collect()
}

/// Merges ordered groups of items, picking from the earliest group that does
/// not extend a same-key run beyond `max_run`. Groups sharing a key are
/// merged at the position of the first one. Stops after `limit` items or
/// when only run-extending picks remain.
pub fn interleave<K: PartialEq, T>(
    groups: Vec<(K, Vec<T>)>,
    max_run: usize,
    limit: usize,
) -> Vec<T> {
    let max_run = max_run.max(1);
    let mut merged: Vec<(K, VecDeque<T>)> = Vec::new();
    for (key, items) in groups {
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.extend(items),
            None => merged.push((key, items.into_iter().collect())),
        }
    }
    merged.retain(|(_, items)| !items.is_empty());
    let mut groups = merged;

    let mut out = Vec::new();
    let mut last: Option<usize> = None;
    let mut run = 0usize;

    while out.len() < limit {
        let pick = groups.iter().enumerate().position(|(i, (_, items))| {
            !items.is_empty() && !(last == Some(i) && run >= max_run)
        });
        let Some(i) = pick else {
            break;
        };
        if let Some(item) = groups[i].1.pop_front() {
            out.push(item);
        }
        if last == Some(i) {
            run += 1;
        } else {
            last = Some(i);
            run = 1;
        }
    }
    out
}

/// Length of the longest run of equal consecutive keys.
pub fn longest_run<K: PartialEq>(keys: &[K]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 && keys[i - 1] == *key {
            run += 1;
        } else {
            run = 1;
        }
        best = best.max(run);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn due(concept: u32, hours_overdue: i64, lapses: u32, reviews: &[u32]) -> DueConcept {
        let now = Utc::now();
        let mut schedule = ReviewSchedule::fresh(now);
        schedule.due_at = now - Duration::hours(hours_overdue);
        schedule.lapse_count = lapses;
        DueConcept {
            course: CourseId(1),
            concept: ConceptId(concept),
            schedule,
            review_nodes: reviews.iter().map(|n| NodeId(*n)).collect(),
        }
    }

    #[test]
    fn most_overdue_comes_first() {
        let queue = build_daily_queue(
            vec![due(1, 2, 0, &[]), due(2, 48, 0, &[]), due(3, 10, 0, &[])],
            Utc::now(),
            10,
            &ReviewPolicy::default(),
        );
        let order: Vec<u32> = queue.iter().map(|c| c.concept.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn not_yet_due_concepts_are_skipped() {
        let queue = build_daily_queue(
            vec![due(1, -5, 0, &[]), due(2, 1, 0, &[])],
            Utc::now(),
            10,
            &ReviewPolicy::default(),
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].concept, ConceptId(2));
    }

    #[test]
    fn leech_gets_extra_card_and_is_flagged() {
        let queue = build_daily_queue(
            vec![due(1, 5, 6, &[10, 11])],
            Utc::now(),
            10,
            &ReviewPolicy::default(),
        );
        // Single concept: capped by the run limit.
        assert_eq!(queue.len(), MAX_CONSECUTIVE);
        assert!(queue.iter().all(|c| c.leech));
        assert_eq!(queue[0].node, Some(NodeId(10)));
        assert_eq!(queue[1].node, Some(NodeId(11)));
    }

    #[test]
    fn cards_are_interleaved() {
        let queue = build_daily_queue(
            vec![
                due(1, 30, 6, &[10, 11, 12]),
                due(2, 20, 0, &[20, 21]),
                due(3, 10, 0, &[]),
            ],
            Utc::now(),
            20,
            &ReviewPolicy::default(),
        );
        let keys: Vec<_> = queue.iter().map(|c| c.concept_key()).collect();
        assert!(longest_run(&keys) <= MAX_CONSECUTIVE);
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn queue_is_truncated() {
        let queue = build_daily_queue(
            (0..10).map(|i| due(i, 1 + i as i64, 0, &[])).collect(),
            Utc::now(),
            4,
            &ReviewPolicy::default(),
        );
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn longest_run_counts() {
        assert_eq!(longest_run::<u8>(&[]), 0);
        assert_eq!(longest_run(&[1, 1, 2, 2, 2, 1]), 3);
    }

    #[test]
    fn repeated_keys_share_one_run() {
        let out = interleave(vec![(0, vec![0, 0]), (0, vec![0, 0])], MAX_CONSECUTIVE, 10);
        assert_eq!(out, vec![0, 0]);

        let out = interleave(
            vec![(0, vec![0, 0]), (1, vec![1]), (0, vec![0, 0])],
            MAX_CONSECUTIVE,
            10,
        );
        assert_eq!(out, vec![0, 0, 1, 0, 0]);
    }

    proptest! {
        #[test]
        fn no_three_consecutive_identical_concepts(
            // Few keys and many groups, so keys repeat across groups.
            groups in proptest::collection::vec((0u32..3, 1usize..8), 1..10),
            limit in 3usize..40,
        ) {
            let input: Vec<(u32, Vec<u32>)> = groups
                .into_iter()
                .map(|(key, n)| (key, vec![key; n]))
                .collect();
            let out = interleave(input, MAX_CONSECUTIVE, limit);
            prop_assert!(out.len() <= limit);
            prop_assert!(longest_run(&out) <= MAX_CONSECUTIVE);
        }
    }
}
