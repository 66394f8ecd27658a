//! Shared fixtures for playback integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pathwise_core::{
    AnswerKey, ConceptId, ContentRef, Course, CourseBuilder, CourseId, CourseMeta, Difficulty,
    EdgeCondition, MisconceptionId, Node, NodeId, NodeKind, Signature, UserId,
};
use pathwise_playback::{
    ContentGenerator, GenerationError, PlaybackConfig, PlaybackEngine,
};
use pathwise_storage::InMemoryStore;

/// Generator with call counters, an optional delay and a failure switch.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub text_calls: AtomicUsize,
    pub audio_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub failing: AtomicBool,
    pub delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn failing() -> Self {
        ScriptedGenerator {
            failing: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        ScriptedGenerator {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn asset_calls(&self) -> usize {
        self.audio_calls.load(Ordering::SeqCst) + self.image_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, counter: &AtomicUsize, output: &str) -> Result<Vec<u8>, GenerationError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GenerationError::Unavailable("scripted failure".into()));
        }
        Ok(output.as_bytes().to_vec())
    }
}

#[async_trait::async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let bytes = self.respond(&self.text_calls, prompt).await?;
        Ok(format!("explained: {}", String::from_utf8_lossy(&bytes)))
    }

    async fn generate_audio(&self, text: &str, voice: &str) -> Result<Vec<u8>, GenerationError> {
        self.respond(&self.audio_calls, &format!("{}:{}", voice, text))
            .await
    }

    async fn generate_image(&self, prompt: &str, style: &str) -> Result<Vec<u8>, GenerationError> {
        self.respond(&self.image_calls, &format!("{}:{}", style, prompt))
            .await
    }
}

/// Node ids of [`fractions_course`].
pub struct Ids {
    pub concept: ConceptId,
    pub misconception: MisconceptionId,
    pub intro: NodeId,
    pub question: NodeId,
    pub fix: NodeId,
    pub recap: NodeId,
    pub bonus: NodeId,
    pub end: NodeId,
}

/// ```text
/// intro -> question -(pass)-> recap -(optional)-> bonus -> end
///                   -(fail)-> fix -> question
///                   -(always)-> recap -> end
/// ```
///
/// Choosing option 1 on the question triggers the "adds denominators"
/// misconception.
pub fn fractions_course() -> (Course, Ids) {
    let mut b = CourseBuilder::new(CourseMeta {
        title: "Adding fractions".into(),
        topic: "math".into(),
        level: "beginner".into(),
    });
    let concept = b.add_concept("fraction addition");
    let misconception = b
        .add_misconception(
            concept,
            Signature::Choice { index: 1 },
            "Denominators are not added together",
        )
        .unwrap();

    let intro = b.add_node(Node::new(
        NodeKind::Hook,
        ContentRef::text("Pizza slices", "Two friends share a pizza.")
            .with_narration("Two friends share a pizza.")
            .with_visual("a pizza cut in halves"),
    ));
    let question = b.add_node(
        Node::new(
            NodeKind::Interaction,
            ContentRef::text("Try it", "What is 1/2 + 1/2?").with_narration("What is one half plus one half?"),
        )
        .with_concept(concept)
        .with_difficulty(Difficulty::Core)
        .with_answer_key(AnswerKey::Choice {
            options: vec!["1".into(), "2/4".into(), "1/4".into()],
            correct: 0,
        }),
    );
    let fix = b.add_node(
        Node::new(
            NodeKind::Remediation,
            ContentRef::text("Same-size pieces", "Halves stay halves when you add them."),
        )
        .with_concept(concept)
        .with_remediates(misconception),
    );
    let recap = b.add_node(
        Node::new(
            NodeKind::Explanation,
            ContentRef::text("Recap", "Add numerators, keep the denominator."),
        )
        .with_concept(concept),
    );
    let bonus = b.add_node(Node::new(
        NodeKind::Narrative,
        ContentRef::text("History", "Egyptians wrote unit fractions."),
    ));
    let end = b.add_node(Node::new(
        NodeKind::Summary,
        ContentRef::text("Done", "You can add fractions with equal denominators."),
    ));

    b.connect(intro, question).unwrap();
    b.add_edge(question, recap, EdgeCondition::Pass, 0).unwrap();
    b.add_edge(question, fix, EdgeCondition::Fail, 1).unwrap();
    b.connect(question, recap).unwrap();
    b.connect(fix, question).unwrap();
    b.add_edge(recap, bonus, EdgeCondition::Optional, 0).unwrap();
    b.connect(recap, end).unwrap();
    b.connect(bonus, end).unwrap();

    let ids = Ids {
        concept,
        misconception,
        intro,
        question,
        fix,
        recap,
        bonus,
        end,
    };
    (b.build().unwrap(), ids)
}

/// Defaults with fast retries so failure paths finish quickly.
pub fn test_config() -> PlaybackConfig {
    let mut config = PlaybackConfig::default();
    config.assets.backoff_base_ms = 1;
    config.assets.backoff_max_ms = 4;
    config.assets.max_attempts = 2;
    config.concurrency.retry_base_ms = 1;
    config.concurrency.retry_max_ms = 10;
    config
}

pub fn engine_with(generator: Arc<ScriptedGenerator>) -> PlaybackEngine {
    engine_with_config(test_config(), generator)
}

pub fn engine_with_config(config: PlaybackConfig, generator: Arc<ScriptedGenerator>) -> PlaybackEngine {
    pathwise_playback::telemetry::try_init_tracing();
    PlaybackEngine::new(config, Arc::new(InMemoryStore::new()), generator)
}

/// An engine with the fractions course loaded.
pub fn loaded_engine(generator: Arc<ScriptedGenerator>) -> (PlaybackEngine, CourseId, Ids) {
    let engine = engine_with(generator);
    let (course, ids) = fractions_course();
    let course_id = engine.load_course(course).unwrap();
    (engine, course_id, ids)
}

pub fn learner() -> UserId {
    UserId::new_v4()
}
