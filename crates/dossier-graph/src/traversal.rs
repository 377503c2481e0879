use crate::graph::{EdgeClass, EntityGraph, NodeIdx, Relationship};
use std::collections::{HashMap, HashSet, VecDeque};

impl EntityGraph {
    /// BFS subgraph around `center`, depth-capped to 1..=5. Returns a new
    /// graph containing the reachable nodes and the edges among them.
    pub fn ego_network(&self, center: NodeIdx, depth: usize) -> EntityGraph {
        let depth = depth.clamp(1, 5);
        let mut ego = EntityGraph::new();
        if self.node(center).is_none() {
            return ego;
        }

        let mut visited: HashSet<NodeIdx> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(center);
        queue.push_back((center, 0usize));

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= depth {
                continue;
            }
            for (_, edge) in self.out_edges(current) {
                if visited.insert(edge.dst) {
                    queue.push_back((edge.dst, dist + 1));
                }
            }
        }

        let mut mapping: HashMap<NodeIdx, NodeIdx> = HashMap::new();
        let mut members: Vec<NodeIdx> = visited.into_iter().collect();
        members.sort();
        for old in members {
            let node = self.node(old).expect("visited node exists");
            let new = ego.add_node(
                node.entity_id,
                node.entity_type,
                node.attributes.clone(),
                node.confidence,
                node.sources.iter().cloned(),
            );
            mapping.insert(old, new);
        }
        for edge in self.edges() {
            if let (Some(&src), Some(&dst)) = (mapping.get(&edge.src), mapping.get(&edge.dst)) {
                ego.add_edge(
                    src,
                    dst,
                    edge.relationship,
                    edge.edge_class,
                    edge.strength,
                    edge.confidence,
                    edge.sources.iter().cloned(),
                );
            }
        }
        ego
    }

    /// Shortest directed path by hop count; among equal-length paths the
    /// one with the higher confidence product wins.
    pub fn shortest_path(&self, src: NodeIdx, dst: NodeIdx) -> Option<Vec<NodeIdx>> {
        if self.node(src).is_none() || self.node(dst).is_none() {
            return None;
        }
        if src == dst {
            return Some(vec![src]);
        }

        // best (distance, confidence) seen per node
        let mut best: HashMap<NodeIdx, (usize, f64)> = HashMap::new();
        let mut parent: HashMap<NodeIdx, NodeIdx> = HashMap::new();
        best.insert(src, (0, 1.0));
        let mut queue = VecDeque::from([src]);

        while let Some(current) = queue.pop_front() {
            let (dist, conf) = best[&current];
            for (_, edge) in self.out_edges(current) {
                let cand = (dist + 1, conf * edge.confidence);
                let improves = match best.get(&edge.dst) {
                    None => true,
                    Some(&(d, c)) => cand.0 < d || (cand.0 == d && cand.1 > c),
                };
                if improves {
                    best.insert(edge.dst, cand);
                    parent.insert(edge.dst, current);
                    queue.push_back(edge.dst);
                }
            }
        }

        if !best.contains_key(&dst) {
            return None;
        }
        let mut path = vec![dst];
        let mut node = dst;
        while let Some(&prev) = parent.get(&node) {
            path.push(prev);
            node = prev;
            if node == src {
                break;
            }
        }
        path.reverse();
        Some(path)
    }

    /// Confidence of a path: product of the best edge confidence between
    /// consecutive nodes.
    pub fn path_confidence(&self, path: &[NodeIdx]) -> f64 {
        if path.len() < 2 {
            return 1.0;
        }
        let mut confidence = 1.0;
        for pair in path.windows(2) {
            let best = self
                .out_edges(pair[0])
                .filter(|(_, e)| e.dst == pair[1])
                .map(|(_, e)| e.confidence)
                .fold(f64::NEG_INFINITY, f64::max);
            if best == f64::NEG_INFINITY {
                return 0.0;
            }
            confidence *= best;
        }
        confidence
    }

    /// Add inferred edges A -> C wherever A -> B and B -> C share
    /// `relationship`, chaining up to `max_depth` compositions. Inferred
    /// strength is the product of the underlying strengths; confidence is
    /// the product with a 0.9 penalty per composition. Returns the number
    /// of edges added or reinforced.
    pub fn transitive_closure(&mut self, relationship: Relationship, max_depth: usize) -> usize {
        let mut added = 0;
        for _round in 0..max_depth.max(1) {
            let mut new_edges: Vec<(NodeIdx, NodeIdx, f64, f64)> = Vec::new();
            for middle in self.node_indices() {
                let incoming: Vec<(NodeIdx, f64, f64)> = self
                    .in_edges(middle)
                    .filter(|(_, e)| e.relationship == relationship)
                    .map(|(_, e)| (e.src, e.strength, e.confidence))
                    .collect();
                let outgoing: Vec<(NodeIdx, f64, f64)> = self
                    .out_edges(middle)
                    .filter(|(_, e)| e.relationship == relationship)
                    .map(|(_, e)| (e.dst, e.strength, e.confidence))
                    .collect();

                for &(a, s_in, c_in) in &incoming {
                    for &(c, s_out, c_out) in &outgoing {
                        if a == c {
                            continue;
                        }
                        if self
                            .out_edges(a)
                            .any(|(_, e)| e.dst == c && e.relationship == relationship)
                        {
                            continue;
                        }
                        new_edges.push((a, c, s_in * s_out, c_in * c_out * 0.9));
                    }
                }
            }

            if new_edges.is_empty() {
                break;
            }
            for (a, c, strength, confidence) in new_edges {
                if self
                    .add_edge(
                        a,
                        c,
                        relationship,
                        EdgeClass::Inferred,
                        strength,
                        confidence,
                        [],
                    )
                    .is_some()
                {
                    added += 1;
                }
            }
        }
        added
    }
}
