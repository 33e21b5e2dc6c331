use std::fmt;

use crate::flows::IdMap;
use crate::store::{Collection, StoreError};

/// Errors surfaced by the loader, save engine and registry.
///
/// Only per-edge resolution failures during a save are handled inside the
/// core (as `SaveWarning`s); everything else propagates to the caller.
#[derive(thiserror::Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    #[error(transparent)]
    Transport(StoreError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error("flow {flow_id} is a system flow and cannot be modified")]
    ReadOnly { flow_id: String },

    #[error("a save for flow {flow_id} is already in progress")]
    SaveInProgress { flow_id: String },
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => FlowError::NotFound { collection, id },
            other => FlowError::Transport(other),
        }
    }
}

/// A node that is missing one or more required content fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIssue {
    pub node_id: String,
    pub missing: Vec<&'static str>,
}

/// Local preconditions that failed before anything was sent to the store.
///
/// Duplicate remote ids are reported separately from duplicate local ids:
/// two entries pointing at one stored record would overwrite each other.
#[derive(thiserror::Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{}", self.summary())]
pub struct ValidationError {
    pub invalid_nodes: Vec<NodeIssue>,
    pub duplicate_node_ids: Vec<String>,
    pub duplicate_edge_ids: Vec<String>,
    pub duplicate_remote_node_ids: Vec<String>,
    pub duplicate_remote_edge_ids: Vec<String>,
}

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.invalid_nodes.is_empty()
            && self.duplicate_node_ids.is_empty()
            && self.duplicate_edge_ids.is_empty()
            && self.duplicate_remote_node_ids.is_empty()
            && self.duplicate_remote_edge_ids.is_empty()
    }

    /// Local ids of every node that failed a field check.
    pub fn offending_node_ids(&self) -> Vec<&str> {
        self.invalid_nodes.iter().map(|i| i.node_id.as_str()).collect()
    }

    fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .invalid_nodes
            .iter()
            .map(|issue| format!("node {} missing {}", issue.node_id, issue.missing.join(", ")))
            .collect();
        let duplicates = [
            ("duplicate node ids", &self.duplicate_node_ids),
            ("duplicate edge ids", &self.duplicate_edge_ids),
            ("duplicate remote node ids", &self.duplicate_remote_node_ids),
            ("duplicate remote edge ids", &self.duplicate_remote_edge_ids),
        ];
        for (what, ids) in duplicates {
            if !ids.is_empty() {
                parts.push(format!("{what} {}", ids.join(", ")));
            }
        }

        if parts.is_empty() {
            "validation failed".to_string()
        } else {
            format!("validation failed: {}", parts.join("; "))
        }
    }
}


/// The reconciliation step that was executing when a save failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStep {
    FlowRecord,
    ListExisting,
    Nodes,
    Edges,
    PruneEdges,
}

impl fmt::Display for SaveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStep::FlowRecord => "flow record upsert",
            SaveStep::ListExisting => "listing existing records",
            SaveStep::Nodes => "node upsert",
            SaveStep::Edges => "edge upsert",
            SaveStep::PruneEdges => "orphan edge deletion",
        };
        f.write_str(name)
    }
}

/// A store failure in the middle of a save.
///
/// Writes applied before the failure are not rolled back. Callers should
/// treat the flow as possibly partially saved and reload before retrying;
/// the partial id maps describe what is known to have been written.
#[derive(thiserror::Error, Debug)]
#[error("save failed during {step}: {source}")]
pub struct SaveError {
    pub step: SaveStep,
    pub flow_id: Option<String>,
    pub node_ids: IdMap,
    pub edge_ids: IdMap,
    #[source]
    pub source: StoreError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_offending_nodes() {
        let err = ValidationError {
            invalid_nodes: vec![
                NodeIssue {
                    node_id: "local_a".into(),
                    missing: vec!["label"],
                },
                NodeIssue {
                    node_id: "local_b".into(),
                    missing: vec!["description", "tips"],
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            err.to_string(),
            "validation failed: node local_a missing label; node local_b missing description, tips"
        );
        assert_eq!(err.offending_node_ids(), vec!["local_a", "local_b"]);
    }

    #[test]
    fn validation_error_reports_duplicates() {
        let err = ValidationError {
            duplicate_node_ids: vec!["n1".into()],
            duplicate_edge_ids: vec!["e1".into()],
            ..Default::default()
        };
        assert!(!err.is_empty());
        assert_eq!(
            err.to_string(),
            "validation failed: duplicate node ids n1; duplicate edge ids e1"
        );
    }

    #[test]
    fn validation_error_reports_shared_remote_ids() {
        let err = ValidationError {
            duplicate_remote_node_ids: vec!["r1".into()],
            duplicate_remote_edge_ids: vec!["r9".into()],
            ..Default::default()
        };
        assert!(!err.is_empty());
        assert_eq!(
            err.to_string(),
            "validation failed: duplicate remote node ids r1; duplicate remote edge ids r9"
        );
        let as_flow: FlowError = err.into();
        assert!(as_flow.to_string().starts_with("validation failed: duplicate remote"));
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: FlowError = StoreError::NotFound {
            collection: Collection::Flows,
            id: "abc".into(),
        }
        .into();
        assert!(matches!(err, FlowError::NotFound { ref id, .. } if id == "abc"));
        assert_eq!(err.to_string(), "flows record not found: abc");
    }

    #[test]
    fn other_store_errors_map_to_transport() {
        let err: FlowError = StoreError::Transport("connection refused".into()).into();
        assert!(matches!(err, FlowError::Transport(_)));
        assert_eq!(err.to_string(), "transport: connection refused");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn save_error_displays_step_and_cause() {
        let err = SaveError {
            step: SaveStep::Edges,
            flow_id: Some("f1".into()),
            node_ids: IdMap::new(),
            edge_ids: IdMap::new(),
            source: StoreError::Rejected {
                status: 400,
                message: "bad relation".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "save failed during edge upsert: store rejected request (400): bad relation"
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FlowError>();
    }
}
