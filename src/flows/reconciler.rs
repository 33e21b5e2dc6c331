use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::Instrument;

use super::records::{edge_fields, flow_create_fields, flow_from_record, flow_update_fields, node_fields};
use super::{Edge, FlowCache, Graph, IdMap, Node, RecordId, document_key, invalidate_listings};
use crate::error::{FlowError, SaveError, SaveStep};
use crate::store::{Collection, Filter, RecordStore, StoreError};

/// An explicit snapshot of the draft to persist.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// `None` creates a new flow record.
    pub flow_id: Option<String>,
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub graph: Graph,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveWarning {
    /// The edge was not persisted because an endpoint is not in the graph.
    UnresolvedEdge {
        edge_id: String,
        source: String,
        target: String,
    },
}

impl fmt::Display for SaveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveWarning::UnresolvedEdge {
                edge_id,
                source,
                target,
            } => write!(f, "edge {edge_id} skipped: endpoint {source} -> {target} did not resolve"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Result of a successful save.
///
/// `graph` has every persisted node and edge keyed by its remote id (local
/// and remote coincide, as after a load); `node_ids`/`edge_ids` map the
/// request's local ids to those remote ids. Edges skipped for an unresolved
/// endpoint stay in `graph` with their original ids, so saving `graph` again
/// neither recreates nor deletes them.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub flow_id: String,
    pub graph: Graph,
    pub node_ids: IdMap,
    pub edge_ids: IdMap,
    pub warnings: Vec<SaveWarning>,
    pub stats: SaveStats,
}

/// What has been written so far, reported if a later step fails.
#[derive(Default)]
struct Progress {
    flow_id: Option<String>,
    node_ids: IdMap,
    edge_ids: IdMap,
    stats: SaveStats,
}

impl Progress {
    fn fail(&self, step: SaveStep, source: StoreError) -> FlowError {
        tracing::error!(
            flow_id = self.flow_id.as_deref().unwrap_or("-"),
            %step,
            error = %source,
            nodes_written = self.node_ids.len(),
            edges_written = self.edge_ids.len(),
            "Save failed; remote state may be partially applied"
        );
        FlowError::Save(SaveError {
            step,
            flow_id: self.flow_id.clone(),
            node_ids: self.node_ids.clone(),
            edge_ids: self.edge_ids.clone(),
            source,
        })
    }
}

/// Marks a flow id as being saved until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    flow_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.flow_id);
    }
}

/// Reconciles a local graph against the store with minimal writes.
///
/// Steps run strictly in order: validate, upsert the flow record, list what
/// exists remotely, upsert nodes, upsert edges through the node id map,
/// delete orphaned edges, invalidate the cache. No rollback is attempted
/// when a step fails.
pub struct SaveEngine {
    store: Arc<dyn RecordStore>,
    cache: Arc<FlowCache>,
    in_flight: Mutex<HashSet<String>>,
}

impl SaveEngine {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<FlowCache>) -> Self {
        Self {
            store,
            cache,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, flow_id: &str) -> Result<InFlight<'_>, FlowError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(flow_id.to_string()) {
            return Err(FlowError::SaveInProgress {
                flow_id: flow_id.to_string(),
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            flow_id: flow_id.to_string(),
        })
    }

    /// Persist `request.graph` into its flow.
    ///
    /// Validation happens before any remote call, so a `Validation` error
    /// means nothing was written, not even the flow record. A `Save` error
    /// means some writes may have been applied; reload before retrying.
    pub async fn save(&self, request: SaveRequest) -> Result<SaveOutcome, FlowError> {
        request.graph.validate()?;

        let _guard = match request.flow_id.as_deref() {
            Some(id) => Some(self.acquire(id)?),
            None => None,
        };

        let span = tracing::info_span!(
            "save_flow",
            flow_id = request.flow_id.as_deref().unwrap_or("new")
        );
        self.reconcile(request).instrument(span).await
    }

    async fn reconcile(&self, request: SaveRequest) -> Result<SaveOutcome, FlowError> {
        let SaveRequest {
            flow_id,
            title,
            description,
            owner_id,
            graph,
        } = request;
        let mut progress = Progress {
            flow_id: flow_id.clone(),
            ..Default::default()
        };

        let flow_id = self
            .upsert_flow(flow_id, &title, &description, &owner_id, &graph, &mut progress)
            .await?;
        progress.flow_id = Some(flow_id.clone());

        let by_flow = Filter::eq("flow", flow_id.as_str());
        let existing_nodes: HashSet<String> = self
            .store
            .get_full_list(Collection::Nodes, &by_flow, None)
            .await
            .map_err(|e| progress.fail(SaveStep::ListExisting, e))?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let existing_edges: Vec<String> = self
            .store
            .get_full_list(Collection::Edges, &by_flow, None)
            .await
            .map_err(|e| progress.fail(SaveStep::ListExisting, e))?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let existing_edge_set: HashSet<&str> = existing_edges.iter().map(String::as_str).collect();

        for node in &graph.nodes {
            self.upsert_node(node, &flow_id, &existing_nodes, &mut progress)
                .await?;
        }

        let mut warnings = Vec::new();
        let mut returned_edges = Vec::new();
        for edge in &graph.edges {
            let (Some(source), Some(target)) = (
                progress.node_ids.get(&edge.source).cloned(),
                progress.node_ids.get(&edge.target).cloned(),
            ) else {
                tracing::warn!(
                    edge_id = %edge.id.local,
                    from = %edge.source,
                    to = %edge.target,
                    "Skipping edge with unresolved endpoint"
                );
                warnings.push(SaveWarning::UnresolvedEdge {
                    edge_id: edge.id.local.clone(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                });
                // handed back with its own id so a re-save skips it again
                // instead of pruning its remote record
                let resolve = |end: &String| progress.node_ids.get(end).unwrap_or(end).clone();
                returned_edges.push(Edge {
                    source: resolve(&edge.source),
                    target: resolve(&edge.target),
                    ..edge.clone()
                });
                continue;
            };

            let remote = self
                .upsert_edge(edge, &flow_id, &source, &target, &existing_edge_set, &mut progress)
                .await?;
            returned_edges.push(Edge {
                id: RecordId::persisted(remote),
                source,
                target,
                ..edge.clone()
            });
        }

        // remote edge set becomes the remote projection of the local edge set
        let keep: HashSet<&str> = progress
            .edge_ids
            .values()
            .map(String::as_str)
            .chain(graph.edges.iter().filter_map(|e| e.id.remote()))
            .collect();
        for orphan in existing_edges.iter().filter(|id| !keep.contains(id.as_str())) {
            match self.store.delete(Collection::Edges, orphan).await {
                Ok(()) => {
                    tracing::debug!(edge_id = %orphan, "Deleted orphaned edge");
                    progress.stats.deleted += 1;
                }
                Err(StoreError::NotFound { .. }) => {
                    tracing::debug!(edge_id = %orphan, "Orphaned edge already gone");
                }
                Err(e) => return Err(progress.fail(SaveStep::PruneEdges, e)),
            }
        }

        self.cache.clear(Some(&document_key(&flow_id))).await;
        invalidate_listings(&self.cache, &owner_id).await;

        let nodes: Vec<Node> = graph
            .nodes
            .iter()
            .filter_map(|node| {
                let remote = progress.node_ids.get(&node.id.local)?;
                Some(Node {
                    id: RecordId::persisted(remote.clone()),
                    ..node.clone()
                })
            })
            .collect();

        let stats = progress.stats;
        tracing::info!(
            flow_id = %flow_id,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            skipped_edges = warnings.len(),
            "Saved flow graph"
        );

        Ok(SaveOutcome {
            graph: Graph {
                flow_id: Some(flow_id.clone()),
                nodes,
                edges: returned_edges,
                viewport: graph.viewport,
            },
            flow_id,
            node_ids: progress.node_ids,
            edge_ids: progress.edge_ids,
            warnings,
            stats,
        })
    }

    async fn upsert_flow(
        &self,
        flow_id: Option<String>,
        title: &str,
        description: &str,
        owner_id: &str,
        graph: &Graph,
        progress: &mut Progress,
    ) -> Result<String, FlowError> {
        let Some(flow_id) = flow_id else {
            let record = self
                .store
                .create(
                    Collection::Flows,
                    flow_create_fields(title, description, owner_id, &graph.viewport),
                )
                .await
                .map_err(|e| progress.fail(SaveStep::FlowRecord, e))?;
            tracing::debug!(flow_id = %record.id, "Created flow record");
            progress.stats.created += 1;
            return Ok(record.id);
        };

        let existing = self
            .store
            .get_one(Collection::Flows, &flow_id)
            .await
            .map_err(|e| progress.fail(SaveStep::FlowRecord, e))?;
        if flow_from_record(&existing).is_system_flow {
            return Err(FlowError::ReadOnly { flow_id });
        }

        self.store
            .update(
                Collection::Flows,
                &flow_id,
                flow_update_fields(title, description, &graph.viewport),
            )
            .await
            .map_err(|e| progress.fail(SaveStep::FlowRecord, e))?;
        progress.stats.updated += 1;
        Ok(flow_id)
    }

    async fn upsert_node(
        &self,
        node: &Node,
        flow_id: &str,
        existing: &HashSet<String>,
        progress: &mut Progress,
    ) -> Result<(), FlowError> {
        let fields = node_fields(node, flow_id);
        let known = node.id.remote().filter(|r| existing.contains(*r));

        let remote = match known {
            Some(remote) => {
                self.store
                    .update(Collection::Nodes, remote, fields)
                    .await
                    .map_err(|e| progress.fail(SaveStep::Nodes, e))?;
                progress.stats.updated += 1;
                remote.to_string()
            }
            None => {
                let record = self
                    .store
                    .create(Collection::Nodes, fields)
                    .await
                    .map_err(|e| progress.fail(SaveStep::Nodes, e))?;
                progress.stats.created += 1;
                record.id
            }
        };

        tracing::debug!(local = %node.id.local, remote = %remote, "Saved node");
        progress.node_ids.insert(node.id.local.clone(), remote);
        Ok(())
    }

    async fn upsert_edge(
        &self,
        edge: &Edge,
        flow_id: &str,
        source: &str,
        target: &str,
        existing: &HashSet<&str>,
        progress: &mut Progress,
    ) -> Result<String, FlowError> {
        let fields = edge_fields(edge, flow_id, source, target);
        let known = edge.id.remote().filter(|r| existing.contains(r));

        let remote = match known {
            Some(remote) => {
                self.store
                    .update(Collection::Edges, remote, fields)
                    .await
                    .map_err(|e| progress.fail(SaveStep::Edges, e))?;
                progress.stats.updated += 1;
                remote.to_string()
            }
            None => {
                let record = self
                    .store
                    .create(Collection::Edges, fields)
                    .await
                    .map_err(|e| progress.fail(SaveStep::Edges, e))?;
                progress.stats.created += 1;
                record.id
            }
        };

        tracing::debug!(local = %edge.id.local, remote = %remote, "Saved edge");
        progress.edge_ids.insert(edge.id.local.clone(), remote.clone());
        Ok(remote)
    }
}
