//! Mapping between the in-memory model and stored record fields.
//!
//! Field names follow the store schema: flows carry `title`, `description`,
//! `creator`, `isSystemFlow`, `isShared` and a JSON-text `flow` field holding
//! the viewport; nodes keep their position as JSON text.

use serde_json::{Value, json};

use super::{Edge, Flow, Node, NodeKind, Position, RecordId, Viewport};
use crate::store::{Fields, Record};

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Relation fields come back as a string or, for multi-relations, a list.
fn relation(record: &Record, name: &str) -> Option<String> {
    match record.fields.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

/// Decode a JSON value that may itself be JSON text.
fn json_payload(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

pub fn flow_from_record(record: &Record) -> Flow {
    Flow {
        id: record.id.clone(),
        title: record.str_field("title").unwrap_or_default().to_string(),
        description: record.str_field("description").unwrap_or_default().to_string(),
        is_system_flow: record.bool_field("isSystemFlow"),
        is_shared: record.bool_field("isShared"),
        creator_id: relation(record, "creator"),
    }
}

pub fn viewport_from_record(record: &Record) -> Viewport {
    json_payload(record.fields.get("flow"))
        .and_then(|v| v.get("viewport").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn viewport_text(viewport: &Viewport) -> String {
    json!({ "viewport": { "x": viewport.x, "y": viewport.y, "zoom": viewport.zoom } }).to_string()
}

/// Fields for updating an existing flow's editable metadata.
pub fn flow_update_fields(title: &str, description: &str, viewport: &Viewport) -> Fields {
    fields(json!({
        "title": title,
        "description": description,
        "flow": viewport_text(viewport),
    }))
}

/// Fields for a new user-owned flow.
pub fn flow_create_fields(
    title: &str,
    description: &str,
    creator: &str,
    viewport: &Viewport,
) -> Fields {
    fields(json!({
        "title": title,
        "description": description,
        "creator": creator,
        "isSystemFlow": false,
        "isShared": true,
        "flow": viewport_text(viewport),
    }))
}

/// Parse a stored position, which may be JSON text or an inline object.
pub fn parse_position(value: Option<&Value>) -> Option<Position> {
    json_payload(value).and_then(|v| serde_json::from_value(v).ok())
}

pub fn node_from_record(record: &Record) -> Node {
    let position = parse_position(record.fields.get("position")).unwrap_or_else(|| {
        tracing::warn!(node_id = %record.id, "Missing or malformed node position, using origin");
        Position::default()
    });

    Node {
        id: RecordId::persisted(record.id.clone()),
        kind: NodeKind::from_wire(record.str_field("types").unwrap_or_default()),
        label: record.str_field("title").unwrap_or_default().to_string(),
        description: record.str_field("description").unwrap_or_default().to_string(),
        tips: record.str_field("tips").unwrap_or_default().to_string(),
        tool_list: record
            .str_field("usable_pentest_tools")
            .unwrap_or_default()
            .to_string(),
        position,
        input_count: record.i64_field("inputCount"),
        output_count: record.i64_field("outputCount"),
        order: record.i64_field("order"),
    }
}

pub fn node_fields(node: &Node, flow_id: &str) -> Fields {
    fields(json!({
        "flow": flow_id,
        "title": node.label,
        "description": node.description,
        "tips": node.tips,
        "position": json!({ "x": node.position.x, "y": node.position.y }).to_string(),
        "types": node.kind.as_wire(),
        "usable_pentest_tools": node.tool_list,
        "inputCount": node.input_count,
        "outputCount": node.output_count,
        "order": node.order,
    }))
}

/// Endpoints of a loaded edge are remote node ids, which equal the local
/// ids of nodes built by [`node_from_record`].
pub fn edge_from_record(record: &Record) -> Edge {
    let optional = |name: &str| {
        record
            .str_field(name)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    Edge {
        id: RecordId::persisted(record.id.clone()),
        source: relation(record, "source").unwrap_or_default(),
        target: relation(record, "target").unwrap_or_default(),
        source_handle: optional("sourceHandle"),
        target_handle: optional("targetHandle"),
        label: optional("label"),
    }
}

/// Fields for an edge whose endpoints have already been resolved to remote ids.
pub fn edge_fields(edge: &Edge, flow_id: &str, source_remote: &str, target_remote: &str) -> Fields {
    fields(json!({
        "flow": flow_id,
        "source": source_remote,
        "target": target_remote,
        "sourceHandle": edge.source_handle,
        "targetHandle": edge.target_handle,
        "label": edge.label,
    }))
}
