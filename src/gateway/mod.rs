//! Remote record gateway: the interface boundary to the remote authority.
//!
//! Everything behind this trait is an external collaborator; the consistency
//! layer only depends on the four RPC shapes below.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::record::{Operation, RecordKey, RecordMap};

/// Query against one collection view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionQuery {
    pub collection_id: String,
    pub collection_view_id: String,
    /// Opaque query spec (filters, sorts, aggregates), forwarded verbatim.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub query: Value,
    pub limit: usize,
}

impl CollectionQuery {
    pub fn new(collection_id: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            collection_view_id: view_id.into(),
            query: Value::Null,
            limit: 100,
        }
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Result rows and aggregates, plus the record-map fragment the authority
/// sent along with them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionQueryResult {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub record_map: RecordMap,
}

/// Full-text search request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub sort: String,
    pub source: String,
    pub filters: SearchFilters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 100,
            sort: "Relevance".to_string(),
            source: "quick_find".to_string(),
            filters: SearchFilters::default(),
            space_id: None,
            start_cursor: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub is_deleted_only: bool,
    pub exclude_templates: bool,
    pub is_navigable_only: bool,
    pub require_edit_permissions: bool,
    pub ancestors: Vec<String>,
    pub created_by: Vec<String>,
    pub edited_by: Vec<String>,
    pub last_edited_time: Value,
    pub created_time: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub highlight: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub record_map: RecordMap,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Abstract interface for fetching record values and submitting operations
/// against the remote authority.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Fetch current values for a heterogeneous batch of records. The
    /// response may carry related records beyond those requested; absent
    /// records come back as null entries. `limit` bounds how many related
    /// records one call may resolve.
    async fn get_record_values(&self, requests: &[RecordKey], limit: usize) -> Result<RecordMap>;

    /// Submit one atomic batch of operations. A rejection means nothing in
    /// the batch was applied remotely.
    async fn submit_transaction(&self, operations: &[Operation]) -> Result<()>;

    async fn query_collection(&self, query: &CollectionQuery) -> Result<CollectionQueryResult>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
}
