use std::sync::Arc;

use serde::Serialize;

use super::records::{flow_create_fields, flow_from_record, node_from_record};
use super::templates::{self, Stamp};
use super::{Cached, Flow, FlowCache, Position, Viewport, invalidate_listings, listing_key};
use crate::error::FlowError;
use crate::store::{Collection, Filter, RecordStore};

const NEWEST_FIRST: &str = "-created";

/// Which of a principal's own flows a listing includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingScope {
    /// Flows the principal authored that are shared.
    Visible,
    /// Every flow the principal authored.
    Authored,
}

impl ListingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingScope::Visible => "visible",
            ListingScope::Authored => "authored",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowListing {
    pub system_flows: Vec<Flow>,
    pub user_flows: Vec<Flow>,
}

/// Lists, creates and templates flows for a principal.
pub struct FlowRegistry {
    store: Arc<dyn RecordStore>,
    cache: Arc<FlowCache>,
}

impl FlowRegistry {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<FlowCache>) -> Self {
        Self { store, cache }
    }

    /// System flows plus the principal's own non-system flows, newest first.
    /// Cached per principal and scope.
    pub async fn list_flows(
        &self,
        principal: &str,
        scope: ListingScope,
    ) -> Result<FlowListing, FlowError> {
        let key = listing_key(principal, scope);
        if let Some(Cached::Listing(listing)) = self.cache.get(&key).await {
            return Ok(listing);
        }

        let system = self
            .store
            .get_full_list(
                Collection::Flows,
                &Filter::eq("isSystemFlow", true),
                Some(NEWEST_FIRST),
            )
            .await?;

        let mut own = Filter::contains("creator", principal).and(Filter::eq("isSystemFlow", false));
        if scope == ListingScope::Visible {
            own = own.and(Filter::eq("isShared", true));
        }
        let user = self
            .store
            .get_full_list(Collection::Flows, &own, Some(NEWEST_FIRST))
            .await?;

        let listing = FlowListing {
            system_flows: system.iter().map(flow_from_record).collect(),
            user_flows: user.iter().map(flow_from_record).collect(),
        };
        tracing::info!(
            principal,
            scope = scope.as_str(),
            system = listing.system_flows.len(),
            user = listing.user_flows.len(),
            "Listed flows"
        );

        self.cache.set(key, Cached::Listing(listing.clone())).await;
        Ok(listing)
    }

    /// Create an empty flow owned by `principal`.
    pub async fn create_flow(
        &self,
        principal: &str,
        title: &str,
        description: &str,
    ) -> Result<Flow, FlowError> {
        let record = self
            .store
            .create(
                Collection::Flows,
                flow_create_fields(title, description, principal, &Viewport::default()),
            )
            .await?;
        tracing::info!(flow_id = %record.id, principal, "Created flow");

        self.invalidate(principal).await;
        Ok(flow_from_record(&record))
    }

    pub async fn invalidate(&self, principal: &str) {
        invalidate_listings(&self.cache, principal).await;
    }

    /// Drop cached listings and list again from the store.
    pub async fn refresh(
        &self,
        principal: &str,
        scope: ListingScope,
    ) -> Result<FlowListing, FlowError> {
        self.invalidate(principal).await;
        self.list_flows(principal, scope).await
    }

    /// Copy a template flow's steps as fresh draft nodes laid out at `origin`.
    pub async fn instantiate_template(
        &self,
        template_flow_id: &str,
        origin: Position,
    ) -> Result<Stamp, FlowError> {
        self.store
            .get_one(Collection::Flows, template_flow_id)
            .await?;
        let records = self
            .store
            .get_full_list(
                Collection::Nodes,
                &Filter::eq("flow", template_flow_id),
                Some("order"),
            )
            .await?;

        let nodes: Vec<_> = records.iter().map(node_from_record).collect();
        tracing::debug!(template_flow_id, count = nodes.len(), "Instantiating template");
        Ok(templates::stamp(&nodes, origin))
    }
}
