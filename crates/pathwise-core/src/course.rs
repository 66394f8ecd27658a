//! Course: the immutable graph container.
//!
//! [`Course`] is the read-only value shared by every learner taking the
//! course. Nodes and edges live in a `StableGraph` arena keyed by stable
//! [`NodeId`]/[`EdgeId`] values, so the intentional remediation cycles are
//! safe to hold and to serialize. Per-learner state is never stored here.
//!
//! Courses are produced by [`CourseBuilder::build`] or by deserialization;
//! both paths run [`validate`](crate::validate::validate) and reject graphs
//! that violate the structural invariants.

use indexmap::IndexMap;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::concept::{Concept, Misconception, Signature};
use crate::edge::{Edge, EdgeCondition};
use crate::error::CoreError;
use crate::id::{ConceptId, EdgeId, MisconceptionId, NodeId};
use crate::node::{Node, NodeKind};
use crate::validate::validate;

/// Priority given to catch-all edges added through [`CourseBuilder::connect`].
pub const CATCH_ALL_PRIORITY: u16 = u16::MAX;

/// Descriptive course metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CourseMeta {
    pub title: String,
    pub topic: String,
    pub level: String,
}

/// A resolved edge: id, endpoints and weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeView {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub condition: EdgeCondition,
    pub priority: u16,
}

/// The immutable course graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CourseParts")]
pub struct Course {
    meta: CourseMeta,
    graph: StableGraph<Node, Edge, Directed, u32>,
    entry: NodeId,
    concepts: IndexMap<ConceptId, Concept>,
    misconceptions: IndexMap<MisconceptionId, Misconception>,
}

/// Serialized shape of a course, validated on the way in.
#[derive(Deserialize)]
struct CourseParts {
    meta: CourseMeta,
    graph: StableGraph<Node, Edge, Directed, u32>,
    entry: NodeId,
    concepts: IndexMap<ConceptId, Concept>,
    misconceptions: IndexMap<MisconceptionId, Misconception>,
}

impl TryFrom<CourseParts> for Course {
    type Error = CoreError;

    fn try_from(parts: CourseParts) -> Result<Self, Self::Error> {
        let mut graph = parts.graph;
        let indices: Vec<_> = graph.node_indices().collect();
        for idx in indices {
            if let Some(node) = graph.node_weight_mut(idx) {
                node.dedup_concepts();
            }
        }
        let course = Course {
            meta: parts.meta,
            graph,
            entry: parts.entry,
            concepts: parts.concepts,
            misconceptions: parts.misconceptions,
        };
        course.checked()
    }
}

impl Course {
    /// Decodes and validates a course from JSON.
    pub fn from_json(json: &str) -> Result<Course, CoreError> {
        let parts: CourseParts = serde_json::from_str(json)?;
        Course::try_from(parts)
    }

    /// Encodes the course as JSON.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    fn checked(self) -> Result<Course, CoreError> {
        let violations = validate(&self);
        if violations.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::GraphIntegrity { violations })
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn meta(&self) -> &CourseMeta {
        &self.meta
    }

    /// The node every learner starts on.
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns a read-only reference to the underlying arena.
    pub fn graph(&self) -> &StableGraph<Node, Edge, Directed, u32> {
        &self.graph
    }

    /// Looks up a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let idx: NodeIndex<u32> = id.into();
        self.graph.node_weight(idx)
    }

    /// Looks up a node by ID, failing with [`CoreError::NodeNotFound`].
    pub fn require_node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.node(id).ok_or(CoreError::NodeNotFound { id })
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.graph.node_indices().map(NodeId::from).collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of `id`, in evaluation order (priority, then edge id).
    pub fn outgoing(&self, id: NodeId) -> Vec<EdgeView> {
        let idx: NodeIndex<u32> = id.into();
        if self.graph.node_weight(idx).is_none() {
            return Vec::new();
        }
        let mut edges: Vec<EdgeView> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| EdgeView {
                id: EdgeId::from(e.id()),
                source: NodeId::from(e.source()),
                target: NodeId::from(e.target()),
                condition: e.weight().condition,
                priority: e.weight().priority,
            })
            .collect();
        edges.sort_by_key(|e| (e.priority, e.id));
        edges
    }

    /// Looks up an edge by ID.
    pub fn edge(&self, id: EdgeId) -> Option<EdgeView> {
        let idx: EdgeIndex<u32> = id.into();
        let weight = self.graph.edge_weight(idx)?;
        let (source, target) = self.graph.edge_endpoints(idx)?;
        Some(EdgeView {
            id,
            source: NodeId::from(source),
            target: NodeId::from(target),
            condition: weight.condition,
            priority: weight.priority,
        })
    }

    /// A node with no outgoing edges ends the course.
    pub fn is_terminal(&self, id: NodeId) -> bool {
        let idx: NodeIndex<u32> = id.into();
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .next()
            .is_none()
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    pub fn misconceptions(&self) -> impl Iterator<Item = &Misconception> {
        self.misconceptions.values()
    }

    pub fn misconception(&self, id: MisconceptionId) -> Option<&Misconception> {
        self.misconceptions.get(&id)
    }

    /// Misconceptions registered for `concept`, in id order.
    pub fn misconceptions_for(&self, concept: ConceptId) -> Vec<&Misconception> {
        let mut found: Vec<&Misconception> = self
            .misconceptions
            .values()
            .filter(|m| m.concept == concept)
            .collect();
        found.sort_by_key(|m| m.id);
        found
    }

    /// Node ids of a given kind, ascending.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.node_ids()
            .into_iter()
            .filter(|id| self.node(*id).map(|n| n.kind) == Some(kind))
            .collect()
    }

    /// Review nodes tagged with `concept`, ascending.
    pub fn review_nodes_for(&self, concept: ConceptId) -> Vec<NodeId> {
        self.nodes_of_kind(NodeKind::Review)
            .into_iter()
            .filter(|id| {
                self.node(*id)
                    .map(|n| n.concepts.contains(&concept))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// An authored remediation node for (concept, misconception), if any.
    pub fn remediation_template(
        &self,
        concept: ConceptId,
        misconception: MisconceptionId,
    ) -> Option<NodeId> {
        self.nodes_of_kind(NodeKind::Remediation)
            .into_iter()
            .find(|id| {
                self.node(*id)
                    .map(|n| n.remediates == Some(misconception) && n.concepts.contains(&concept))
                    .unwrap_or(false)
            })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Mutable staging area for a course. [`build`](Self::build) validates and
/// freezes it into a [`Course`].
#[derive(Debug, Clone)]
pub struct CourseBuilder {
    meta: CourseMeta,
    graph: StableGraph<Node, Edge, Directed, u32>,
    entry: Option<NodeId>,
    concepts: IndexMap<ConceptId, Concept>,
    misconceptions: IndexMap<MisconceptionId, Misconception>,
    next_concept_id: u32,
    next_misconception_id: u32,
}

impl CourseBuilder {
    pub fn new(meta: CourseMeta) -> Self {
        CourseBuilder {
            meta,
            graph: StableGraph::new(),
            entry: None,
            concepts: IndexMap::new(),
            misconceptions: IndexMap::new(),
            next_concept_id: 0,
            next_misconception_id: 0,
        }
    }

    /// Registers a concept, returning its id.
    pub fn add_concept(&mut self, name: impl Into<String>) -> ConceptId {
        let id = ConceptId(self.next_concept_id);
        self.next_concept_id += 1;
        self.concepts.insert(
            id,
            Concept {
                id,
                name: name.into(),
            },
        );
        id
    }

    /// Registers a misconception for an existing concept.
    pub fn add_misconception(
        &mut self,
        concept: ConceptId,
        signature: Signature,
        hint: impl Into<String>,
    ) -> Result<MisconceptionId, CoreError> {
        if !self.concepts.contains_key(&concept) {
            return Err(CoreError::ConceptNotFound { id: concept });
        }
        let id = MisconceptionId(self.next_misconception_id);
        self.next_misconception_id += 1;
        self.misconceptions.insert(
            id,
            Misconception {
                id,
                concept,
                signature,
                hint: hint.into(),
            },
        );
        Ok(id)
    }

    /// Adds a node. The first node added becomes the entry unless
    /// [`set_entry`](Self::set_entry) is called.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::from(self.graph.add_node(node));
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn set_entry(&mut self, id: NodeId) -> Result<(), CoreError> {
        let idx: NodeIndex<u32> = id.into();
        if self.graph.node_weight(idx).is_none() {
            return Err(CoreError::NodeNotFound { id });
        }
        self.entry = Some(id);
        Ok(())
    }

    /// Adds a conditional edge. Self-loops are rejected.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        condition: EdgeCondition,
        priority: u16,
    ) -> Result<EdgeId, CoreError> {
        let from_idx: NodeIndex<u32> = from.into();
        let to_idx: NodeIndex<u32> = to.into();
        if self.graph.node_weight(from_idx).is_none() {
            return Err(CoreError::NodeNotFound { id: from });
        }
        if self.graph.node_weight(to_idx).is_none() {
            return Err(CoreError::NodeNotFound { id: to });
        }
        if from == to {
            return Err(CoreError::InvalidEdge {
                reason: format!("self-loop on node {}", from),
            });
        }
        let idx = self
            .graph
            .add_edge(from_idx, to_idx, Edge::new(condition, priority));
        Ok(EdgeId::from(idx))
    }

    /// Adds the catch-all `always` edge from `from` to `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<EdgeId, CoreError> {
        self.add_edge(from, to, EdgeCondition::Always, CATCH_ALL_PRIORITY)
    }

    /// Validates and freezes the course.
    pub fn build(self) -> Result<Course, CoreError> {
        let entry = match self.entry {
            Some(entry) => entry,
            None => {
                return Err(CoreError::GraphIntegrity {
                    violations: vec![crate::validate::IntegrityViolation::EmptyCourse],
                })
            }
        };
        Course {
            meta: self.meta,
            graph: self.graph,
            entry,
            concepts: self.concepts,
            misconceptions: self.misconceptions,
        }
        .checked()
    }
}
