//! Behaviour shared by every backend, checked against both.

use chrono::Utc;
use uuid::Uuid;

use pathwise_core::{
    AnswerKey, ConceptId, ContentRef, Course, CourseBuilder, CourseMeta, CourseProgress,
    InteractionAttempt, MasteryState, Node, NodeKind, Outcome, ReviewSchedule, UserId,
};
use pathwise_storage::{
    ConceptKey, InMemoryStore, InteractionCommit, PlaybackStore, ProgressKey, SqliteStore,
    StorageError, VersionedWrite,
};

fn course(title: &str) -> Course {
    let mut b = CourseBuilder::new(CourseMeta {
        title: title.into(),
        topic: "biology".into(),
        level: "intro".into(),
    });
    let cell = b.add_concept("cells");
    let hook = b.add_node(Node::new(NodeKind::Hook, ContentRef::text("Hook", "Look closer")));
    let q = b.add_node(
        Node::new(NodeKind::Interaction, ContentRef::text("Q", "Smallest unit of life?"))
            .with_concept(cell)
            .with_answer_key(AnswerKey::FreeText {
                accepted: vec!["cell".into()],
            }),
    );
    let end = b.add_node(Node::new(NodeKind::Summary, ContentRef::text("End", "Done")));
    b.connect(hook, q).unwrap();
    b.connect(q, end).unwrap();
    b.build().unwrap()
}

fn backends() -> Vec<(&'static str, Box<dyn PlaybackStore>)> {
    vec![
        ("memory", Box::new(InMemoryStore::new())),
        ("sqlite", Box::new(SqliteStore::in_memory().unwrap())),
    ]
}

fn attempt(user: UserId, key: &ConceptKey) -> InteractionAttempt {
    InteractionAttempt {
        id: Uuid::new_v4(),
        user,
        course: key.course,
        node: pathwise_core::NodeId(1),
        concepts: vec![key.concept],
        score: 1.0,
        outcome: Outcome::Pass,
        misconception: None,
        answered_at: Utc::now(),
    }
}

#[test]
fn course_roundtrip_and_dedup() {
    for (name, store) in backends() {
        let c = course("Cells");
        let id = store.save_course(&c).unwrap();
        assert_eq!(store.save_course(&c).unwrap(), id, "{name}: dedup by fingerprint");
        let other = store.save_course(&course("Organs")).unwrap();
        assert_ne!(id, other, "{name}");

        let loaded = store.load_course(id).unwrap();
        assert_eq!(loaded.node_count(), 3, "{name}");
        assert_eq!(loaded.meta().title, "Cells", "{name}");

        let listed = store.list_courses().unwrap();
        assert_eq!(listed.len(), 2, "{name}");
        assert_eq!(listed[0].id, id, "{name}");
    }
}

#[test]
fn missing_course_is_reported() {
    for (name, store) in backends() {
        let err = store.load_course(pathwise_core::CourseId(404)).unwrap_err();
        assert!(matches!(err, StorageError::CourseNotFound(_)), "{name}");
    }
}

#[test]
fn mastery_compare_and_swap() {
    for (name, store) in backends() {
        let course = store.save_course(&course("Cells")).unwrap();
        let user = UserId::new_v4();
        let key = ConceptKey {
            user,
            course,
            concept: ConceptId(0),
        };
        assert!(store.load_mastery(&key).unwrap().is_none(), "{name}");

        let state = MasteryState::fresh(Utc::now());
        let v1 = store
            .save_mastery(&VersionedWrite::new(key, None, state))
            .unwrap();
        assert_eq!(v1, 1, "{name}");

        // A second creator loses.
        let err = store
            .save_mastery(&VersionedWrite::new(key, None, state))
            .unwrap_err();
        assert!(err.is_conflict(), "{name}");

        let mut next = state;
        next.mastery = 0.5;
        let v2 = store
            .save_mastery(&VersionedWrite::new(key, Some(1), next))
            .unwrap();
        assert_eq!(v2, 2, "{name}");

        // A stale writer loses.
        let err = store
            .save_mastery(&VersionedWrite::new(key, Some(1), state))
            .unwrap_err();
        assert!(err.is_conflict(), "{name}");

        let loaded = store.load_mastery(&key).unwrap().unwrap();
        assert_eq!(loaded.version, 2, "{name}");
        assert_eq!(loaded.value.mastery, 0.5, "{name}");

        let all = store.mastery_for_course(user, course).unwrap();
        assert_eq!(all.len(), 1, "{name}");
        assert_eq!(all[0].0, ConceptId(0), "{name}");
    }
}

#[test]
fn interaction_commit_is_atomic() {
    for (name, store) in backends() {
        let course = store.save_course(&course("Cells")).unwrap();
        let user = UserId::new_v4();
        let key = ConceptKey {
            user,
            course,
            concept: ConceptId(0),
        };
        let now = Utc::now();

        let commit = InteractionCommit {
            mastery: vec![VersionedWrite::new(key, None, MasteryState::fresh(now))],
            reviews: vec![VersionedWrite::new(key, None, ReviewSchedule::fresh(now))],
            progress: None,
            attempt: attempt(user, &key),
        };
        store.commit_interaction(&commit).unwrap();
        assert_eq!(store.attempts_for(user, course).unwrap().len(), 1, "{name}");

        // Replaying the same commit conflicts on mastery and writes nothing.
        let mut replay = commit.clone();
        replay.attempt.id = Uuid::new_v4();
        let err = store.commit_interaction(&replay).unwrap_err();
        assert!(err.is_conflict(), "{name}");
        assert_eq!(store.attempts_for(user, course).unwrap().len(), 1, "{name}");
        assert_eq!(store.load_review(&key).unwrap().unwrap().version, 1, "{name}");

        // A commit whose progress precondition fails leaves mastery alone.
        let progress_key = ProgressKey { user, course };
        let bad = InteractionCommit {
            mastery: vec![VersionedWrite::new(key, Some(1), MasteryState::fresh(now))],
            reviews: vec![],
            progress: Some(VersionedWrite::new(
                progress_key,
                Some(7),
                CourseProgress::start(user, course, pathwise_core::NodeId(0), now),
            )),
            attempt: attempt(user, &key),
        };
        assert!(store.commit_interaction(&bad).unwrap_err().is_conflict(), "{name}");
        assert_eq!(store.load_mastery(&key).unwrap().unwrap().version, 1, "{name}");
    }
}

#[test]
fn repeated_keys_in_one_commit_write_nothing() {
    for (name, store) in backends() {
        let course = store.save_course(&course("Cells")).unwrap();
        let user = UserId::new_v4();
        let key = ConceptKey {
            user,
            course,
            concept: ConceptId(0),
        };
        let now = Utc::now();

        let commit = InteractionCommit {
            mastery: vec![
                VersionedWrite::new(key, None, MasteryState::fresh(now)),
                VersionedWrite::new(key, None, MasteryState::fresh(now)),
            ],
            reviews: vec![],
            progress: None,
            attempt: attempt(user, &key),
        };
        let err = store.commit_interaction(&commit).unwrap_err();
        assert!(matches!(err, StorageError::IntegrityError { .. }), "{name}");
        assert!(!err.is_conflict(), "{name}");
        assert!(store.load_mastery(&key).unwrap().is_none(), "{name}");
        assert!(store.attempts_for(user, course).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn progress_and_reviews_roundtrip() {
    for (name, store) in backends() {
        let course = store.save_course(&course("Cells")).unwrap();
        let user = UserId::new_v4();
        let now = Utc::now();
        let pkey = ProgressKey { user, course };
        let progress = CourseProgress::start(user, course, pathwise_core::NodeId(0), now);
        store
            .save_progress(&VersionedWrite::new(pkey, None, progress.clone()))
            .unwrap();
        let loaded = store.load_progress(&pkey).unwrap().unwrap();
        assert_eq!(loaded.value, progress, "{name}");

        for concept in [2, 0, 1] {
            let key = ConceptKey {
                user,
                course,
                concept: ConceptId(concept),
            };
            store
                .save_review(&VersionedWrite::new(key, None, ReviewSchedule::fresh(now)))
                .unwrap();
        }
        let reviews = store.reviews_for_user(user).unwrap();
        let concepts: Vec<u32> = reviews.iter().map(|(k, _)| k.concept.0).collect();
        assert_eq!(concepts, vec![0, 1, 2], "{name}");
        assert!(store.reviews_for_user(UserId::new_v4()).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn records_require_a_stored_course() {
    for (name, store) in backends() {
        let key = ConceptKey {
            user: UserId::new_v4(),
            course: pathwise_core::CourseId(99),
            concept: ConceptId(0),
        };
        let err = store
            .save_mastery(&VersionedWrite::new(key, None, MasteryState::fresh(Utc::now())))
            .unwrap_err();
        assert!(matches!(err, StorageError::CourseNotFound(_)), "{name}");
    }
}

#[test]
fn deleting_a_course_drops_learner_records() {
    for (name, store) in backends() {
        let course = store.save_course(&course("Cells")).unwrap();
        let user = UserId::new_v4();
        let key = ConceptKey {
            user,
            course,
            concept: ConceptId(0),
        };
        store
            .save_mastery(&VersionedWrite::new(key, None, MasteryState::fresh(Utc::now())))
            .unwrap();
        store.delete_course(course).unwrap();
        assert!(store.load_mastery(&key).unwrap().is_none(), "{name}");
        assert!(store.list_courses().unwrap().is_empty(), "{name}");
    }
}
