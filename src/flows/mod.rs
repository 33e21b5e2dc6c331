pub mod graph;
pub mod loader;
pub mod reconciler;
pub mod records;
pub mod registry;
pub mod templates;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::TtlCache;
use registry::{FlowListing, ListingScope};

/// Local id → remote id.
pub type IdMap = BTreeMap<String, String>;

/// Two-part identity for nodes and edges.
///
/// `local` is stable for the editing session and is what edges reference.
/// `remote` is the store-assigned id and is `None` until the first
/// successful create. Only `remote` is ever sent to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub local: String,
    #[serde(default)]
    pub remote: Option<String>,
}

impl RecordId {
    /// A fresh client-side id with no remote counterpart.
    pub fn draft() -> Self {
        Self {
            local: format!("local_{}", Uuid::new_v4().simple()),
            remote: None,
        }
    }

    /// An id that came from the store; local and remote coincide.
    pub fn persisted(remote: impl Into<String>) -> Self {
        let remote = remote.into();
        Self {
            local: remote.clone(),
            remote: Some(remote),
        }
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn is_persisted(&self) -> bool {
        self.remote.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_system_flow: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub creator_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Process,
    StickyNote,
}

impl NodeKind {
    /// Value of the stored `types` field.
    pub fn as_wire(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Process => "normal",
            NodeKind::StickyNote => "sticky_note",
        }
    }

    /// Unknown or missing kinds are treated as process steps.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "start" => NodeKind::Start,
            "end" => NodeKind::End,
            "sticky_note" | "sticky" => NodeKind::StickyNote,
            _ => NodeKind::Process,
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            NodeKind::Start => "Start Node",
            NodeKind::End => "End Node",
            NodeKind::Process => "Process Node",
            NodeKind::StickyNote => "Sticky Note",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: RecordId,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tips: String,
    #[serde(default)]
    pub tool_list: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub input_count: i64,
    #[serde(default)]
    pub output_count: i64,
    #[serde(default)]
    pub order: i64,
}

impl Node {
    /// A new unsaved node carrying the palette defaults for `kind`.
    pub fn draft(kind: NodeKind, position: Position) -> Self {
        Self {
            id: RecordId::draft(),
            kind,
            label: kind.default_label().to_string(),
            description: String::new(),
            tips: String::new(),
            tool_list: String::new(),
            position,
            input_count: 0,
            output_count: 0,
            order: 0,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.id.local
    }
}

/// A directed connection. `source` and `target` are local node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: RecordId,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// The editable aggregate: nodes, edges and viewport of one flow.
///
/// `flow_id` is `None` for a flow that has never been saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

/// Flow metadata plus its graph, as produced by a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    pub flow: Flow,
    pub graph: Graph,
}

/// Values held in the session cache.
#[derive(Debug, Clone)]
pub enum Cached {
    Document(FlowDocument),
    Listing(FlowListing),
}

pub type FlowCache = TtlCache<Cached>;

pub fn document_key(flow_id: &str) -> String {
    format!("graph:{flow_id}")
}

pub fn listing_key(principal: &str, scope: ListingScope) -> String {
    format!("flows:{principal}:{}", scope.as_str())
}

/// Drop every cached listing for `principal`.
pub async fn invalidate_listings(cache: &FlowCache, principal: &str) {
    for scope in [ListingScope::Visible, ListingScope::Authored] {
        cache.clear(Some(&listing_key(principal, scope))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_roundtrip() {
        let mut start = Node::draft(NodeKind::Start, Position::new(10.0, 20.0));
        start.description = "Kick off recon".to_string();
        let end = Node::draft(NodeKind::End, Position::default());
        let graph = Graph {
            flow_id: None,
            edges: vec![Edge {
                id: RecordId::draft(),
                source: start.id.local.clone(),
                target: end.id.local.clone(),
                source_handle: None,
                target_handle: Some("in".to_string()),
                label: None,
            }],
            nodes: vec![start, end],
            viewport: Viewport::default(),
        };

        let json = serde_json::to_string(&graph).unwrap();
        let parsed: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, graph);
    }

    #[test]
    fn test_node_kind_wire_mapping() {
        for kind in [
            NodeKind::Start,
            NodeKind::End,
            NodeKind::Process,
            NodeKind::StickyNote,
        ] {
            assert_eq!(NodeKind::from_wire(kind.as_wire()), kind);
        }
        assert_eq!(NodeKind::Process.as_wire(), "normal");
        assert_eq!(NodeKind::from_wire("customNode"), NodeKind::Process);
        assert_eq!(NodeKind::from_wire(""), NodeKind::Process);
    }

    #[test]
    fn test_node_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&NodeKind::StickyNote).unwrap(),
            "\"sticky_note\""
        );
        assert_eq!(serde_json::to_string(&NodeKind::Process).unwrap(), "\"process\"");
    }

    #[test]
    fn test_draft_node_uses_palette_defaults() {
        let node = Node::draft(NodeKind::StickyNote, Position::default());
        assert_eq!(node.label, "Sticky Note");
        assert!(node.id.local.starts_with("local_"));
        assert!(!node.id.is_persisted());
    }

    #[test]
    fn test_record_ids() {
        let a = RecordId::draft();
        let b = RecordId::draft();
        assert_ne!(a.local, b.local);
        assert_eq!(a.remote(), None);

        let p = RecordId::persisted("abc123");
        assert_eq!(p.local, "abc123");
        assert_eq!(p.remote(), Some("abc123"));
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(document_key("f1"), "graph:f1");
        assert_eq!(listing_key("u1", ListingScope::Visible), "flows:u1:visible");
        assert_eq!(listing_key("u1", ListingScope::Authored), "flows:u1:authored");
    }
}
