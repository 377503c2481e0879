use crate::graph::{EntityGraph, NodeIdx};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Node count above which betweenness switches to sampled sources.
const BETWEENNESS_SAMPLE_THRESHOLD: usize = 1000;
const BETWEENNESS_SAMPLE_SIZE: usize = 1000;

const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_MAX_ITERATIONS: usize = 20;
const PAGERANK_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub mean_degree: f64,
    pub component_count: usize,
    pub mean_node_confidence: f64,
    pub mean_edge_confidence: f64,
}

impl EntityGraph {
    /// Standard iterative pagerank: damping 0.85, strength-weighted edge
    /// contributions, stopping at 20 iterations or L1 delta below 1e-4.
    pub fn pagerank(&self) -> HashMap<NodeIdx, f64> {
        let n = self.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let initial = 1.0 / n as f64;
        let mut ranks: Vec<f64> = vec![initial; n];

        for _ in 0..PAGERANK_MAX_ITERATIONS {
            let mut next = vec![(1.0 - PAGERANK_DAMPING) / n as f64; n];
            for idx in self.node_indices() {
                let out_count = self.out_edges(idx).count();
                if out_count == 0 {
                    continue;
                }
                let share = ranks[idx.0 as usize] / out_count as f64;
                for (_, edge) in self.out_edges(idx) {
                    next[edge.dst.0 as usize] += PAGERANK_DAMPING * share * edge.strength;
                }
            }

            let delta: f64 = ranks
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            ranks = next;
            if delta < PAGERANK_EPSILON {
                break;
            }
        }

        self.node_indices()
            .map(|idx| (idx, ranks[idx.0 as usize]))
            .collect()
    }

    /// Total degree normalized by the maximum possible `2 * (n - 1)`.
    pub fn degree_centrality(&self) -> HashMap<NodeIdx, f64> {
        let n = self.node_count();
        let max_degree = if n > 1 { ((n - 1) * 2) as f64 } else { 1.0 };
        self.node_indices()
            .map(|idx| {
                let degree = self.out_edges(idx).count() + self.in_edges(idx).count();
                (idx, degree as f64 / max_degree)
            })
            .collect()
    }

    /// How often a node sits on shortest paths between other nodes. Exact
    /// single-source BFS for small graphs; above 1000 nodes, sources are
    /// sampled and credits scaled back up.
    pub fn betweenness_centrality(&self) -> HashMap<NodeIdx, f64> {
        let n = self.node_count();
        let mut centrality: HashMap<NodeIdx, f64> = self.node_indices().map(|i| (i, 0.0)).collect();
        if n < 3 {
            return centrality;
        }

        let all: Vec<NodeIdx> = self.node_indices().collect();
        let (sources, scale) = if n > BETWEENNESS_SAMPLE_THRESHOLD {
            let mut rng = rand::thread_rng();
            let sample: Vec<NodeIdx> = all
                .choose_multiple(&mut rng, BETWEENNESS_SAMPLE_SIZE)
                .copied()
                .collect();
            let scale = n as f64 / sample.len() as f64;
            (sample, scale)
        } else {
            (all.clone(), 1.0)
        };

        for &source in &sources {
            // one BFS tree per source; credit interior nodes of the
            // tree path to every reachable target
            let mut parent: HashMap<NodeIdx, NodeIdx> = HashMap::new();
            let mut visited: HashSet<NodeIdx> = HashSet::from([source]);
            let mut queue = VecDeque::from([source]);
            while let Some(current) = queue.pop_front() {
                for next in self.neighbors(current) {
                    if visited.insert(next) {
                        parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }

            for &target in &all {
                if target == source || !parent.contains_key(&target) {
                    continue;
                }
                let mut node = parent[&target];
                while node != source {
                    *centrality.get_mut(&node).expect("known node") += scale;
                    node = parent[&node];
                }
            }
        }

        let norm = 2.0 / ((n - 1) as f64 * (n - 2) as f64);
        for value in centrality.values_mut() {
            *value *= norm;
        }
        centrality
    }

    /// Connected components over the symmetrized view, each returned as a
    /// sorted list of node indices.
    pub fn communities(&self) -> Vec<Vec<NodeIdx>> {
        let mut visited: HashSet<NodeIdx> = HashSet::new();
        let mut communities = Vec::new();

        for start in self.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            visited.insert(start);
            while let Some(current) = queue.pop_front() {
                component.push(current);
                for next in self.undirected_neighbors(current) {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            component.sort();
            communities.push(component);
        }
        communities
    }

    pub fn statistics(&self) -> GraphStatistics {
        let n = self.node_count();
        let m = self.edge_count();
        if n == 0 {
            return GraphStatistics::default();
        }

        let mean_node_confidence =
            self.nodes().iter().map(|node| node.confidence).sum::<f64>() / n as f64;
        let mean_edge_confidence = if m == 0 {
            0.0
        } else {
            self.edges().iter().map(|edge| edge.confidence).sum::<f64>() / m as f64
        };
        let density = if n > 1 {
            m as f64 / (n as f64 * (n - 1) as f64)
        } else {
            0.0
        };

        GraphStatistics {
            node_count: n,
            edge_count: m,
            density,
            mean_degree: 2.0 * m as f64 / n as f64,
            component_count: self.communities().len(),
            mean_node_confidence,
            mean_edge_confidence,
        }
    }
}
