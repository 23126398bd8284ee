//! # contract: interfaces to the engine's external collaborators
//!
//! This module defines the traits the migration core consumes — the content
//! source read/write API, the object store the archives land in, and the
//! broadcast sink progress events are mirrored to — plus the plain wire types
//! they exchange.
//!
//! ## Interface & Extensibility
//! - Implement [`ContentSource`] to plug in a real HTTP client (see
//!   `source::HttpContentSource`) or a test double.
//! - All methods are async and return [`crate::error::EngineError`] so the
//!   taxonomy (`Unauthorized`, `Unavailable`, `UpstreamFailure`, ...) is
//!   uniform across implementations.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so unit and integration tests can
//!   generate deterministic mocks instead of standing up servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::Result;
use crate::progress::PhaseEvent;

/// One server-side window of a paginated collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Total number of items the source claims the collection holds.
    pub total: u64,
    pub items: Vec<Value>,
}

/// Query parameters for a windowed collection request.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub skip: u64,
    pub take: u64,
    /// Raw filter expression forwarded to the source untouched.
    pub filter: Option<String>,
    pub sort: Option<String>,
}

/// Raw schema description as returned by the source's type-graph endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub schema_type: String,
    #[serde(default)]
    pub fields: Vec<SchemaFieldDef>,
}

/// One field of a schema, including reference targets and nested shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFieldDef {
    #[serde(rename = "fieldId", default)]
    pub field_id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Target schema id for `References` fields.
    #[serde(rename = "refId", default)]
    pub ref_id: Option<String>,
    /// Element descriptions for `Array` fields.
    #[serde(default)]
    pub nested: Option<Vec<SchemaFieldDef>>,
}

/// Read/write access to the headless content source.
///
/// The implementor owns authentication (client-credentials exchange, token
/// refresh) and transport; callers only see typed results and the error
/// taxonomy.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch one window of an entity collection.
    async fn fetch_page(
        &self,
        namespace: &str,
        entity_type: &str,
        query: &PageQuery,
    ) -> Result<Page>;

    /// Fetch one window of the namespace's asset collection.
    async fn fetch_asset_page(&self, namespace: &str, query: &PageQuery) -> Result<Page>;

    /// Fetch the namespace's full type graph.
    async fn fetch_schemas(&self, namespace: &str) -> Result<Vec<SchemaDef>>;

    /// Fetch one entity by id.
    async fn fetch_entity(&self, namespace: &str, entity_type: &str, id: &str) -> Result<Value>;

    /// Apply a partial field-value patch to one entity.
    async fn patch_entity(
        &self,
        namespace: &str,
        entity_type: &str,
        id: &str,
        body: &Value,
    ) -> Result<()>;

    /// Retrieve an asset binary by its content-addressed href. No auth.
    async fn fetch_asset_binary(&self, href: &str, version: Option<i64>) -> Result<Vec<u8>>;
}

/// Object storage the serialized archives are pushed to.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}

/// Real-time fan-out channel; the core only ever publishes progress to it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &PhaseEvent);
}
