//! Remediation content selection.
//!
//! When a learner enters a remediation node the content shown is chosen in
//! this order:
//!
//! 1. an authored course node remediating the same (concept, misconception)
//! 2. a registered template, including earlier generated text
//! 3. the node's own authored content, when no misconception is known
//! 4. text from the content generator, cached as a template
//! 5. the misconception's hint
//!
//! Generation is retried with backoff; a final failure is logged and never
//! surfaces as an error.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use pathwise_core::{ConceptId, ContentRef, Course, CourseId, MisconceptionId, NodeId};

use crate::concurrency::Backoff;
use crate::error::PlaybackError;
use crate::generation::{with_timeout, ContentGenerator, GenerationError};

/// Where remediation content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationSource {
    Template,
    Registered,
    Authored,
    Generated,
    Hint,
}

/// Content to deliver for a remediation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationContent {
    pub node: NodeId,
    pub concept: Option<ConceptId>,
    pub misconception: Option<MisconceptionId>,
    /// Position in the remediation chain, starting at 1.
    pub hop: u32,
    pub content: ContentRef,
    pub source: RemediationSource,
}

type TemplateKey = (CourseId, ConceptId, MisconceptionId);

/// Picks or produces remediation content.
pub struct RemediationService {
    templates: DashMap<TemplateKey, ContentRef>,
    generator: Arc<dyn ContentGenerator>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl RemediationService {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        timeout: Duration,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        RemediationService {
            templates: DashMap::new(),
            generator,
            timeout,
            max_attempts,
            backoff,
        }
    }

    /// Registers reusable content for a (concept, misconception) pair.
    pub fn register_template(
        &self,
        course: CourseId,
        concept: ConceptId,
        misconception: MisconceptionId,
        content: ContentRef,
    ) {
        self.templates.insert((course, concept, misconception), content);
    }

    /// Chooses content for remediation node `node`, `hop` deep in a chain.
    pub async fn generate_remediation(
        &self,
        course_id: CourseId,
        course: &Course,
        node: NodeId,
        misconception: Option<MisconceptionId>,
        hop: u32,
    ) -> Result<RemediationContent, PlaybackError> {
        let authored = course.require_node(node)?;
        let known = misconception.and_then(|id| course.misconception(id));
        let concept = known
            .map(|m| m.concept)
            .or_else(|| authored.primary_concept());

        let result = |content: ContentRef, source: RemediationSource| RemediationContent {
            node,
            concept,
            misconception: known.map(|m| m.id),
            hop,
            content,
            source,
        };

        let Some(m) = known else {
            return Ok(result(authored.content.clone(), RemediationSource::Authored));
        };

        if let Some(template) = course.remediation_template(m.concept, m.id) {
            let content = course.require_node(template)?.content.clone();
            return Ok(result(content, RemediationSource::Template));
        }

        let key = (course_id, m.concept, m.id);
        if let Some(content) = self.templates.get(&key) {
            return Ok(result(content.clone(), RemediationSource::Registered));
        }

        let concept_name = course
            .concept(m.concept)
            .map(|c| c.name.as_str())
            .unwrap_or("this topic");
        let prompt = format!(
            "A learner studying {} answered in a way that suggests this misconception: {}. \
             Write a short explanation (under 120 words) that corrects it.",
            concept_name, m.hint
        );
        match self.generate_text(&prompt).await {
            Ok(text) => {
                let content = ContentRef {
                    title: authored.content.title.clone(),
                    body: text,
                    narration: None,
                    visual_prompt: authored.content.visual_prompt.clone(),
                };
                self.templates.insert(key, content.clone());
                tracing::info!(
                    course = %course_id,
                    concept = %m.concept,
                    misconception = %m.id,
                    "generated remediation content"
                );
                Ok(result(content, RemediationSource::Generated))
            }
            Err(err) => {
                tracing::warn!(
                    course = %course_id,
                    misconception = %m.id,
                    error = %err,
                    "remediation generation unavailable, using hint"
                );
                let content = ContentRef::text(authored.content.title.clone(), m.hint.clone());
                Ok(result(content, RemediationSource::Hint))
            }
        }
    }
}

impl RemediationService {
    async fn generate_text(&self, prompt: &str) -> Result<String, GenerationError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match with_timeout(self.timeout, self.generator.generate_text(prompt)).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        error = %err,
                        ?delay,
                        "remediation text failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
