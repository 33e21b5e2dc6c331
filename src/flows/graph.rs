use std::collections::HashSet;

use super::{Edge, Graph, Node, RecordId};
use crate::error::{NodeIssue, ValidationError};

impl Graph {
    /// An empty, never-saved graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, local_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.local == local_id)
    }

    pub fn node_mut(&mut self, local_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id.local == local_id)
    }

    pub fn edge(&self, local_id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id.local == local_id)
    }

    /// Insert `node`, returning its local id.
    pub fn add_node(&mut self, node: Node) -> String {
        let id = node.id.local.clone();
        self.nodes.push(node);
        id
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, local_id: &str) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id.local == local_id)?;
        self.edges
            .retain(|e| e.source != local_id && e.target != local_id);
        Some(self.nodes.remove(pos))
    }

    /// Connect two nodes by local id. Returns the new edge's local id, or
    /// `None` when either endpoint is not in the graph.
    pub fn connect(
        &mut self,
        source: &str,
        target: &str,
        source_handle: Option<String>,
        target_handle: Option<String>,
    ) -> Option<String> {
        if self.node(source).is_none() || self.node(target).is_none() {
            return None;
        }
        let edge = Edge {
            id: RecordId::draft(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle,
            target_handle,
            label: None,
        };
        let id = edge.id.local.clone();
        self.edges.push(edge);
        Some(id)
    }

    pub fn disconnect(&mut self, edge_local_id: &str) -> Option<Edge> {
        let pos = self.edges.iter().position(|e| e.id.local == edge_local_id)?;
        Some(self.edges.remove(pos))
    }

    /// Edges with at least one endpoint missing from the node set.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.local.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }

    /// Check the preconditions for a save.
    ///
    /// Every node needs a non-empty label, description and tips. Local ids
    /// must be unique, and so must remote ids: two entries sharing a remote id
    /// would both update the same record. Dangling edges are not a validation failure; the
    /// save engine skips them with a warning.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();

        let mut seen = HashSet::new();
        let mut seen_remote = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.local.as_str()) {
                err.duplicate_node_ids.push(node.id.local.clone());
            } else if let Some(remote) = node.id.remote() {
                if !seen_remote.insert(remote) {
                    err.duplicate_remote_node_ids.push(remote.to_string());
                }
            }
            let missing: Vec<&'static str> = [
                ("label", &node.label),
                ("description", &node.description),
                ("tips", &node.tips),
            ]
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                err.invalid_nodes.push(NodeIssue {
                    node_id: node.id.local.clone(),
                    missing,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut seen_remote = HashSet::new();
        for edge in &self.edges {
            if !seen.insert(edge.id.local.as_str()) {
                err.duplicate_edge_ids.push(edge.id.local.clone());
            } else if let Some(remote) = edge.id.remote() {
                if !seen_remote.insert(remote) {
                    err.duplicate_remote_edge_ids.push(remote.to_string());
                }
            }
        }

        if err.is_empty() { Ok(()) } else { Err(err) }
    }
}
