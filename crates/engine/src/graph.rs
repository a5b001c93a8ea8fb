//! Entity graph
//!
//! In-memory entity-relation graph built just-in-time from retrieved
//! chunks. Node names are canonicalized lower-case and unique; edges are
//! deduplicated on (source, relation, target) with duplicate sightings
//! bumping the edge weight. Traversal returns an owned snapshot so LLM
//! calls never hold the graph lock.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A graph node: one canonicalized entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Canonical entity name (lower-case)
    pub name: String,

    /// Entity type tag
    pub entity_type: String,

    /// Times the entity has been observed
    pub mentions: u32,
}

/// A directed, labeled edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub weight: f32,
}

/// Canonical form of an entity name
pub fn canonical(name: &str) -> String {
    name.trim().to_lowercase()
}

/// In-memory entity graph; grows monotonically during the process lifetime
#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    /// (source, relation, target) -> edge index, the deduplication invariant
    edge_keys: HashMap<(String, String, String), usize>,
    /// node name -> incident edge indices (both directions)
    adjacency: HashMap<String, Vec<usize>>,
}

/// Owned subgraph returned by traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render the subgraph as context text for generation
    pub fn to_context_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.edges.len() + 1);
        lines.push("Known entity relationships:".to_string());
        for edge in &self.edges {
            lines.push(format!("- {} {} {}", edge.source, edge.relation, edge.target));
        }
        if self.edges.is_empty() {
            for node in &self.nodes {
                lines.push(format!("- {} ({})", node.name, node.entity_type));
            }
        }
        lines.join("\n")
    }
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity observation, creating the node if needed
    pub fn add_mention(&mut self, name: &str, entity_type: &str) {
        let name = canonical(name);
        if name.is_empty() {
            return;
        }
        self.nodes
            .entry(name.clone())
            .and_modify(|n| n.mentions += 1)
            .or_insert(GraphNode {
                name,
                entity_type: entity_type.to_lowercase(),
                mentions: 1,
            });
    }

    /// Add an edge, deduplicating on (source, relation, target)
    ///
    /// Both endpoints are recorded as mentions. A duplicate sighting bumps
    /// the existing edge's weight instead of inserting a second edge.
    pub fn add_edge(&mut self, source: &str, relation: &str, target: &str) {
        let source = canonical(source);
        let target = canonical(target);
        let relation = relation.trim().to_lowercase();
        if source.is_empty() || target.is_empty() || relation.is_empty() {
            return;
        }

        self.add_mention(&source, "entity");
        self.add_mention(&target, "entity");

        let key = (source.clone(), relation.clone(), target.clone());
        if let Some(&idx) = self.edge_keys.get(&key) {
            self.edges[idx].weight += 1.0;
            return;
        }

        let idx = self.edges.len();
        self.edges.push(GraphEdge {
            source: source.clone(),
            target: target.clone(),
            relation,
            weight: 1.0,
        });
        self.edge_keys.insert(key, idx);
        self.adjacency.entry(source).or_default().push(idx);
        self.adjacency.entry(target).or_default().push(idx);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(&canonical(name))
    }

    /// Entities from `names` that are not yet in the graph
    pub fn missing_of(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|n| canonical(n))
            .filter(|n| !n.is_empty() && !self.nodes.contains_key(n))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// BFS up to `hops` from the seed entities, returning an owned snapshot
    pub fn traverse(&self, seeds: &[String], hops: usize) -> GraphSnapshot {
        let mut visited: HashSet<String> = HashSet::new();
        let mut edge_set: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<String> = seeds
            .iter()
            .map(|s| canonical(s))
            .filter(|s| self.nodes.contains_key(s))
            .collect();

        for name in &frontier {
            visited.insert(name.clone());
        }

        for _ in 0..hops {
            let mut next = Vec::new();
            for name in &frontier {
                let Some(incident) = self.adjacency.get(name) else {
                    continue;
                };
                for &idx in incident {
                    edge_set.insert(idx);
                    let edge = &self.edges[idx];
                    for neighbor in [&edge.source, &edge.target] {
                        if visited.insert(neighbor.clone()) {
                            next.push(neighbor.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut nodes: Vec<GraphNode> = visited
            .iter()
            .filter_map(|name| self.nodes.get(name).cloned())
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut edge_indices: Vec<usize> = edge_set.into_iter().collect();
        edge_indices.sort_unstable();
        let edges = edge_indices.into_iter().map(|i| self.edges[i].clone()).collect();

        GraphSnapshot { nodes, edges }
    }
}
