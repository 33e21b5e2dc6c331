use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{Collection, Fields, Filter, Record, RecordStore, StoreError};

const PAGE_SIZE: u32 = 500;

/// One page of a PocketBase list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    page: u32,
    total_pages: u32,
    items: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// `RecordStore` over the PocketBase REST API.
pub struct PocketBaseStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl PocketBaseStore {
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn records_url(&self, collection: Collection) -> String {
        format!("{}/api/collections/{}/records", self.base_url, collection)
    }

    fn record_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{id}", self.records_url(collection))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: RequestBuilder,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Response, StoreError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection,
                id: id.unwrap_or_default().to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(rejected(status, &body));
        }
        Ok(resp)
    }

    async fn record(resp: Response) -> Result<Record, StoreError> {
        resp.json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn rejected(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());
    StoreError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn list_query(filter: &Filter, sort: Option<&str>, page: u32) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("page", page.to_string()),
        ("perPage", PAGE_SIZE.to_string()),
    ];
    let expr = filter.to_expression();
    if !expr.is_empty() {
        query.push(("filter", expr));
    }
    if let Some(sort) = sort.filter(|s| !s.is_empty()) {
        query.push(("sort", sort.to_string()));
    }
    query
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn create(&self, collection: Collection, fields: Fields) -> Result<Record, StoreError> {
        let req = self.client.post(self.records_url(collection)).json(&fields);
        let resp = self.send(req, collection, None).await?;
        Self::record(resp).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        let req = self.client.patch(self.record_url(collection, id)).json(&fields);
        let resp = self.send(req, collection, Some(id)).await?;
        Self::record(resp).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let req = self.client.delete(self.record_url(collection, id));
        self.send(req, collection, Some(id)).await?;
        Ok(())
    }

    async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError> {
        let req = self.client.get(self.record_url(collection, id));
        let resp = self.send(req, collection, Some(id)).await?;
        Self::record(resp).await
    }

    async fn get_full_list(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let req = self
                .client
                .get(self.records_url(collection))
                .query(&list_query(filter, sort, page));
            let resp = self.send(req, collection, None).await?;
            let list: ListPage = resp
                .json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let fetched = list.items.len();
            records.extend(list.items);
            if fetched < PAGE_SIZE as usize || list.page >= list.total_pages {
                break;
            }
            page += 1;
        }
        tracing::debug!(%collection, count = records.len(), "Listed records");
        Ok(records)
    }
}
