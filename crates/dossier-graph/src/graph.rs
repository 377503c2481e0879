use dossier_core::{AttributeMap, EntityId, EntityType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Arena index of a node. Stable for the life of the graph; nodes are
/// never removed, only merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeIdx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    WorksWith,
    Knows,
    Family,
    Owns,
    Registered,
    LocatedAt,
    Authored,
    Cites,
    SameIdentity,
    CoOccurs,
    Associated,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relationship::WorksWith => "works_with",
            Relationship::Knows => "knows",
            Relationship::Family => "family",
            Relationship::Owns => "owns",
            Relationship::Registered => "registered",
            Relationship::LocatedAt => "located_at",
            Relationship::Authored => "authored",
            Relationship::Cites => "cites",
            Relationship::SameIdentity => "same_identity",
            Relationship::CoOccurs => "co_occurs",
            Relationship::Associated => "associated",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeClass {
    Direct,
    Inferred,
    Transitive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub attributes: AttributeMap,
    pub confidence: f64,
    pub sources: BTreeSet<String>,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub src: NodeIdx,
    pub dst: NodeIdx,
    pub relationship: Relationship,
    pub edge_class: EdgeClass,
    pub strength: f64,
    pub confidence: f64,
    pub sources: BTreeSet<String>,
}

/// Directed multigraph of resolved entities. Nodes and edges live in flat
/// arenas; adjacency lists hold edge indices, so cycles are representable
/// and serialization is trivial. Owned exclusively by one investigation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EntityGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    out_adj: Vec<Vec<EdgeIdx>>,
    in_adj: Vec<Vec<EdgeIdx>>,
    #[serde(skip)]
    by_entity: HashMap<EntityId, NodeIdx>,
    #[serde(skip)]
    edge_lookup: HashMap<(NodeIdx, NodeIdx, Relationship), EdgeIdx>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or merge a node keyed by entity id. Merging updates attributes,
    /// takes the max confidence, and unions sources, so confidence is
    /// monotonically non-decreasing.
    pub fn add_node(
        &mut self,
        entity_id: EntityId,
        entity_type: EntityType,
        attributes: AttributeMap,
        confidence: f64,
        sources: impl IntoIterator<Item = String>,
    ) -> NodeIdx {
        let confidence = confidence.clamp(0.0, 1.0);
        if let Some(&idx) = self.by_entity.get(&entity_id) {
            let node = &mut self.nodes[idx.0 as usize];
            node.attributes.extend(attributes);
            node.confidence = node.confidence.max(confidence);
            node.sources.extend(sources);
            return idx;
        }

        let idx = NodeIdx(self.nodes.len() as u32);
        self.nodes.push(GraphNode {
            entity_id,
            entity_type,
            attributes,
            confidence,
            sources: sources.into_iter().collect(),
            tags: BTreeSet::new(),
        });
        self.out_adj.push(Vec::new());
        self.in_adj.push(Vec::new());
        self.by_entity.insert(entity_id, idx);
        idx
    }

    /// Add an edge, idempotent on `(src, dst, relationship)`. Duplicates
    /// merge strength via `1 - (1-s1)(1-s2)` and confidence via max, so
    /// both are monotonically non-decreasing. Self-edges are rejected
    /// unless the relationship is `same_identity`.
    pub fn add_edge(
        &mut self,
        src: NodeIdx,
        dst: NodeIdx,
        relationship: Relationship,
        edge_class: EdgeClass,
        strength: f64,
        confidence: f64,
        sources: impl IntoIterator<Item = String>,
    ) -> Option<EdgeIdx> {
        if src.0 as usize >= self.nodes.len() || dst.0 as usize >= self.nodes.len() {
            return None;
        }
        if src == dst && relationship != Relationship::SameIdentity {
            return None;
        }
        let strength = strength.clamp(0.0, 1.0);
        let confidence = confidence.clamp(0.0, 1.0);

        if let Some(&idx) = self.edge_lookup.get(&(src, dst, relationship)) {
            let edge = &mut self.edges[idx.0 as usize];
            edge.strength = 1.0 - (1.0 - edge.strength) * (1.0 - strength);
            edge.confidence = edge.confidence.max(confidence);
            edge.sources.extend(sources);
            return Some(idx);
        }

        let idx = EdgeIdx(self.edges.len() as u32);
        self.edges.push(GraphEdge {
            src,
            dst,
            relationship,
            edge_class,
            strength,
            confidence,
            sources: sources.into_iter().collect(),
        });
        self.out_adj[src.0 as usize].push(idx);
        self.in_adj[dst.0 as usize].push(idx);
        self.edge_lookup.insert((src, dst, relationship), idx);
        Some(idx)
    }

    pub fn node(&self, idx: NodeIdx) -> Option<&GraphNode> {
        self.nodes.get(idx.0 as usize)
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> Option<&mut GraphNode> {
        self.nodes.get_mut(idx.0 as usize)
    }

    pub fn edge(&self, idx: EdgeIdx) -> Option<&GraphEdge> {
        self.edges.get(idx.0 as usize)
    }

    pub fn node_by_entity(&self, entity_id: EntityId) -> Option<NodeIdx> {
        self.by_entity.get(&entity_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.nodes.len() as u32).map(NodeIdx)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn out_edges(&self, idx: NodeIdx) -> impl Iterator<Item = (EdgeIdx, &GraphEdge)> {
        self.out_adj
            .get(idx.0 as usize)
            .into_iter()
            .flatten()
            .map(|&e| (e, &self.edges[e.0 as usize]))
    }

    pub fn in_edges(&self, idx: NodeIdx) -> impl Iterator<Item = (EdgeIdx, &GraphEdge)> {
        self.in_adj
            .get(idx.0 as usize)
            .into_iter()
            .flatten()
            .map(|&e| (e, &self.edges[e.0 as usize]))
    }

    /// Outgoing neighbor node indices (deduplicated).
    pub fn neighbors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut seen = BTreeSet::new();
        self.out_edges(idx)
            .map(|(_, e)| e.dst)
            .filter(|n| seen.insert(*n))
            .collect()
    }

    /// Neighbors over the symmetrized view (both directions).
    pub fn undirected_neighbors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut seen = BTreeSet::new();
        self.out_edges(idx)
            .map(|(_, e)| e.dst)
            .chain(self.in_edges(idx).map(|(_, e)| e.src))
            .filter(|n| *n != idx && seen.insert(*n))
            .collect()
    }

    /// Rebuild the skipped lookup tables after deserialization.
    pub fn rebuild_indices(&mut self) {
        self.by_entity = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.entity_id, NodeIdx(i as u32)))
            .collect();
        self.edge_lookup = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.src, e.dst, e.relationship), EdgeIdx(i as u32)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn add_person(graph: &mut EntityGraph, confidence: f64) -> NodeIdx {
        graph.add_node(
            Uuid::new_v4(),
            EntityType::Person,
            AttributeMap::new(),
            confidence,
            ["test".to_string()],
        )
    }

    #[test]
    fn test_node_merge_is_monotonic() {
        let mut graph = EntityGraph::new();
        let id = Uuid::new_v4();
        let idx = graph.add_node(id, EntityType::Person, AttributeMap::new(), 0.8, []);
        let again = graph.add_node(id, EntityType::Person, AttributeMap::new(), 0.5, ["s2".to_string()]);
        assert_eq!(idx, again);
        assert_eq!(graph.node_count(), 1);
        // lower-confidence re-add never decreases confidence
        assert_eq!(graph.node(idx).unwrap().confidence, 0.8);
        assert!(graph.node(idx).unwrap().sources.contains("s2"));
    }

    #[test]
    fn test_edge_merge_formula() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 0.9);
        let b = add_person(&mut graph, 0.9);

        graph
            .add_edge(a, b, Relationship::Knows, EdgeClass::Direct, 0.5, 0.6, [])
            .unwrap();
        graph
            .add_edge(a, b, Relationship::Knows, EdgeClass::Direct, 0.5, 0.4, [])
            .unwrap();

        assert_eq!(graph.edge_count(), 1);
        let edge = graph.edge(EdgeIdx(0)).unwrap();
        // 1 - (1-0.5)(1-0.5) = 0.75
        assert!((edge.strength - 0.75).abs() < 1e-9);
        // max of the two confidences
        assert!((edge.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_relationships_are_distinct_edges() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 0.9);
        let b = add_person(&mut graph, 0.9);
        graph
            .add_edge(a, b, Relationship::Knows, EdgeClass::Direct, 0.5, 0.5, [])
            .unwrap();
        graph
            .add_edge(a, b, Relationship::WorksWith, EdgeClass::Direct, 0.5, 0.5, [])
            .unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_self_edge_only_same_identity() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 0.9);
        assert!(graph
            .add_edge(a, a, Relationship::Knows, EdgeClass::Direct, 0.5, 0.5, [])
            .is_none());
        assert!(graph
            .add_edge(a, a, Relationship::SameIdentity, EdgeClass::Direct, 0.5, 0.5, [])
            .is_some());
    }

    #[test]
    fn test_bounds_clamped() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 1.7);
        assert_eq!(graph.node(a).unwrap().confidence, 1.0);
        let b = add_person(&mut graph, 0.9);
        let e = graph
            .add_edge(a, b, Relationship::Knows, EdgeClass::Direct, 3.0, -0.5, [])
            .unwrap();
        let edge = graph.edge(e).unwrap();
        assert_eq!(edge.strength, 1.0);
        assert_eq!(edge.confidence, 0.0);
    }

    #[test]
    fn test_endpoints_always_exist() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 0.9);
        assert!(graph
            .add_edge(a, NodeIdx(99), Relationship::Knows, EdgeClass::Direct, 0.5, 0.5, [])
            .is_none());
        // the invariant: every edge endpoint is a live node
        for edge in graph.edges() {
            assert!(graph.node(edge.src).is_some());
            assert!(graph.node(edge.dst).is_some());
        }
    }

    #[test]
    fn test_serde_roundtrip_with_rebuild() {
        let mut graph = EntityGraph::new();
        let a = add_person(&mut graph, 0.9);
        let b = add_person(&mut graph, 0.8);
        graph
            .add_edge(a, b, Relationship::Registered, EdgeClass::Direct, 0.7, 0.9, [])
            .unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let mut back: EntityGraph = serde_json::from_str(&json).unwrap();
        back.rebuild_indices();

        assert_eq!(back.node_count(), 2);
        assert_eq!(back.edge_count(), 1);
        let entity = graph.node(a).unwrap().entity_id;
        assert_eq!(back.node_by_entity(entity), Some(a));
        // merge still idempotent after rebuild
        back.add_edge(a, b, Relationship::Registered, EdgeClass::Direct, 0.1, 0.1, []);
        assert_eq!(back.edge_count(), 1);
    }
}
