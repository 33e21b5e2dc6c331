//! System-flow templates: copies a template flow's steps into a draft graph.
//!
//! Template nodes are laid out on a fixed-width grid starting at the drop
//! point and chained in `order`. Every copied node and edge gets a fresh
//! local id with no remote id, so saving the draft creates new records and
//! never writes to the template's own records.

use serde::Serialize;

use super::{Edge, Graph, Node, Position, RecordId};

pub const GRID_COLUMNS: usize = 3;
pub const HORIZONTAL_SPACING: f64 = 250.0;
pub const VERTICAL_SPACING: f64 = 150.0;

/// Nodes and edges produced from one template, ready to merge into a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stamp {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Stamp {
    pub fn apply_to(self, graph: &mut Graph) {
        graph.nodes.extend(self.nodes);
        graph.edges.extend(self.edges);
    }
}

pub fn grid_position(origin: Position, index: usize) -> Position {
    Position {
        x: origin.x + (index % GRID_COLUMNS) as f64 * HORIZONTAL_SPACING,
        y: origin.y + (index / GRID_COLUMNS) as f64 * VERTICAL_SPACING,
    }
}

pub fn stamp(template_nodes: &[Node], origin: Position) -> Stamp {
    let mut ordered: Vec<&Node> = template_nodes.iter().collect();
    ordered.sort_by_key(|n| n.order);

    let nodes: Vec<Node> = ordered
        .into_iter()
        .enumerate()
        .map(|(index, node)| Node {
            id: RecordId::draft(),
            position: grid_position(origin, index),
            ..node.clone()
        })
        .collect();

    let edges = nodes
        .windows(2)
        .map(|pair| Edge {
            id: RecordId::draft(),
            source: pair[0].id.local.clone(),
            target: pair[1].id.local.clone(),
            source_handle: None,
            target_handle: None,
            label: None,
        })
        .collect();

    Stamp { nodes, edges }
}
