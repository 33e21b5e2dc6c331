use std::sync::Arc;

use super::records::{edge_from_record, flow_from_record, node_from_record, viewport_from_record};
use super::{Cached, FlowCache, FlowDocument, Graph, document_key};
use crate::error::FlowError;
use crate::store::{Collection, Filter, RecordStore};

/// Fetches a flow and its graph from the store, caching the result.
pub struct GraphLoader {
    store: Arc<dyn RecordStore>,
    cache: Arc<FlowCache>,
}

impl GraphLoader {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<FlowCache>) -> Self {
        Self { store, cache }
    }

    /// Flow metadata plus graph. Served from cache while the entry is fresh.
    ///
    /// A missing flow surfaces as `FlowError::NotFound`; any other store
    /// failure as `FlowError::Transport`.
    pub async fn load(&self, flow_id: &str) -> Result<FlowDocument, FlowError> {
        let key = document_key(flow_id);
        if let Some(Cached::Document(doc)) = self.cache.get(&key).await {
            tracing::debug!(flow_id, "Serving flow from cache");
            return Ok(doc);
        }

        let doc = self.fetch(flow_id).await?;
        self.cache.set(key, Cached::Document(doc.clone())).await;
        Ok(doc)
    }

    pub async fn load_graph(&self, flow_id: &str) -> Result<Graph, FlowError> {
        Ok(self.load(flow_id).await?.graph)
    }

    pub async fn invalidate(&self, flow_id: &str) {
        self.cache.clear(Some(&document_key(flow_id))).await;
    }

    async fn fetch(&self, flow_id: &str) -> Result<FlowDocument, FlowError> {
        let flow_record = self.store.get_one(Collection::Flows, flow_id).await?;

        let by_flow = Filter::eq("flow", flow_id);
        let node_records = self
            .store
            .get_full_list(Collection::Nodes, &by_flow, Some("order"))
            .await?;
        let edge_records = self
            .store
            .get_full_list(Collection::Edges, &by_flow, None)
            .await?;

        let graph = Graph {
            flow_id: Some(flow_id.to_string()),
            nodes: node_records.iter().map(node_from_record).collect(),
            edges: edge_records.iter().map(edge_from_record).collect(),
            viewport: viewport_from_record(&flow_record),
        };

        tracing::info!(
            flow_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Loaded flow graph"
        );

        Ok(FlowDocument {
            flow: flow_from_record(&flow_record),
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{NodeKind, Position, RecordId};
    use crate::store::memory::{MemoryStore, Op};
    use crate::store::{Fields, StoreError};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                Collection::Flows,
                "f1",
                fields(json!({"title": "Recon", "description": "Passive recon", "creator": "u1", "isShared": true})),
            )
            .await;
        store
            .seed(
                Collection::Nodes,
                "n2",
                fields(json!({"flow": "f1", "title": "Done", "types": "end", "order": 1, "position": "{\"x\":0,\"y\":150}"})),
            )
            .await;
        store
            .seed(
                Collection::Nodes,
                "n1",
                fields(json!({"flow": "f1", "title": "Begin", "types": "start", "order": 0, "position": "garbage"})),
            )
            .await;
        store
            .seed(Collection::Nodes, "other", fields(json!({"flow": "f2", "title": "Elsewhere"})))
            .await;
        store
            .seed(Collection::Edges, "e1", fields(json!({"flow": "f1", "source": "n1", "target": "n2"})))
            .await;
        store
    }

    fn loader(store: Arc<MemoryStore>, ttl: Duration) -> GraphLoader {
        GraphLoader::new(store, Arc::new(FlowCache::new(ttl)))
    }

    #[tokio::test]
    async fn test_load_builds_graph() {
        let store = seeded_store().await;
        let loader = loader(store, Duration::from_secs(300));

        let doc = loader.load("f1").await.unwrap();
        assert_eq!(doc.flow.title, "Recon");
        assert_eq!(doc.flow.creator_id.as_deref(), Some("u1"));

        let graph = doc.graph;
        assert_eq!(graph.flow_id.as_deref(), Some("f1"));
        let labels: Vec<_> = graph.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Begin", "Done"]);
        assert_eq!(graph.nodes[0].kind, NodeKind::Start);
        assert_eq!(graph.nodes[0].id, RecordId::persisted("n1"));
        // malformed position degrades to origin instead of failing the load
        assert_eq!(graph.nodes[0].position, Position::default());
        assert_eq!(graph.nodes[1].position, Position::new(0.0, 150.0));

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].source, "n1");
        assert_eq!(graph.edges[0].target, "n2");
        assert!(graph.dangling_edges().is_empty());
    }

    #[tokio::test]
    async fn test_missing_flow_is_not_found() {
        let store = seeded_store().await;
        let loader = loader(store, Duration::from_secs(300));
        let err = loader.load_graph("nope").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::NotFound { collection: Collection::Flows, ref id } if id == "nope"
        ));
    }

    #[tokio::test]
    async fn test_other_failures_are_transport() {
        let store = seeded_store().await;
        store.fail_on(
            Op::List,
            Collection::Edges,
            1,
            StoreError::Transport("connection reset".into()),
        );
        let loader = loader(store, Duration::from_secs(300));
        let err = loader.load_graph("f1").await.unwrap_err();
        assert!(matches!(err, FlowError::Transport(_)));
    }

    #[tokio::test]
    async fn test_second_load_served_from_cache() {
        let store = seeded_store().await;
        let loader = loader(store.clone(), Duration::from_secs(300));

        loader.load_graph("f1").await.unwrap();
        loader.load_graph("f1").await.unwrap();
        assert_eq!(store.calls(Op::GetOne, Collection::Flows), 1);
        assert_eq!(store.calls(Op::List, Collection::Nodes), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cache_triggers_refetch() {
        let store = seeded_store().await;
        let loader = loader(store.clone(), Duration::from_millis(300_000));

        loader.load_graph("f1").await.unwrap();
        tokio::time::advance(Duration::from_millis(300_001)).await;
        loader.load_graph("f1").await.unwrap();

        assert_eq!(store.calls(Op::GetOne, Collection::Flows), 2);
        assert_eq!(store.calls(Op::List, Collection::Edges), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let store = seeded_store().await;
        let loader = loader(store.clone(), Duration::from_secs(300));

        loader.load_graph("f1").await.unwrap();
        loader.invalidate("f1").await;
        loader.load_graph("f1").await.unwrap();
        assert_eq!(store.calls(Op::GetOne, Collection::Flows), 2);
    }
}
