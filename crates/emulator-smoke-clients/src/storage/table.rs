//! Table service client
//!
//! Entities travel as flat JSON (`odata=nometadata`), addressed by the
//! `(PartitionKey, RowKey)` pair.

use super::StorageTransport;
use crate::config::StorageSettings;
use crate::error::ClientError;
use crate::probe::EmulatorProbe;
use crate::transport::with_segments;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, IF_MATCH};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// A table entity with free-form properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntity {
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "RowKey")]
    pub row_key: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }

    /// Builder-style property setter
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Drop service-maintained fields so reads compare against writes
    fn strip_metadata(mut self) -> Self {
        self.properties.retain(|name, _| {
            name != "Timestamp" && !name.starts_with("odata.") && !name.contains("@odata.")
        });
        self
    }
}

/// How `update_entity` applies properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Keep properties not present in the update
    #[default]
    Merge,
    /// Replace the entity wholesale
    Replace,
}

impl UpdateMode {
    fn method(&self) -> Method {
        match self {
            // MERGE is a valid extension token
            UpdateMode::Merge => Method::from_bytes(b"MERGE").unwrap_or(Method::PATCH),
            UpdateMode::Replace => Method::PUT,
        }
    }
}

fn prefer_no_content(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("prefer"),
        HeaderValue::from_static("return-no-content"),
    );
}

fn if_match_any() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(IF_MATCH, HeaderValue::from_static("*"));
    headers
}

/// OData key literal: single quotes doubled
fn key_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Account-level table client
#[derive(Debug, Clone)]
pub struct TableServiceClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
}

impl TableServiceClient {
    pub fn new(settings: &StorageSettings) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Arc::new(StorageTransport::new(settings)?),
            endpoint: settings.table_endpoint.clone(),
        })
    }

    /// Get a client for a table without creating it
    pub fn table(&self, name: &str) -> TableClient {
        TableClient {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            name: name.to_string(),
        }
    }

    /// Create a table
    ///
    /// # Errors
    /// * `ClientError::Conflict` - Table already exists
    pub async fn create_table(&self, name: &str) -> Result<TableClient, ClientError> {
        debug!(table = %name, "Creating table");
        let url = with_segments(&self.endpoint, &["Tables"])?;
        let mut headers = HeaderMap::new();
        prefer_no_content(&mut headers);

        self.transport
            .send_table(
                name,
                Method::POST,
                url,
                headers,
                Some(&json!({ "TableName": name })),
            )
            .await?;
        Ok(self.table(name))
    }

    /// Delete a table and its entities
    pub async fn delete_table(&self, name: &str) -> Result<(), ClientError> {
        debug!(table = %name, "Deleting table");
        let segment = format!("Tables('{}')", key_literal(name));
        let url = with_segments(&self.endpoint, &[&segment])?;
        self.transport
            .send_table(name, Method::DELETE, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EmulatorProbe for TableServiceClient {
    fn name(&self) -> &'static str {
        "table"
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        let url = with_segments(&self.endpoint, &["Tables"])?;
        self.transport
            .send_table("Tables", Method::GET, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

/// Client scoped to one table
#[derive(Debug, Clone)]
pub struct TableClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
    name: String,
}

impl TableClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn entity_url(&self, partition_key: &str, row_key: &str) -> Result<Url, ClientError> {
        let segment = format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            self.name,
            key_literal(partition_key),
            key_literal(row_key)
        );
        with_segments(&self.endpoint, &[&segment])
    }

    fn resource(&self, partition_key: &str, row_key: &str) -> String {
        format!("{}({},{})", self.name, partition_key, row_key)
    }

    fn entity_body(entity: &TableEntity) -> Result<Value, ClientError> {
        serde_json::to_value(entity)
            .map_err(|e| ClientError::Parse(format!("failed to encode entity: {}", e)))
    }

    /// Insert a new entity
    ///
    /// # Errors
    /// * `ClientError::Conflict` - Entity with the same keys exists
    pub async fn create_entity(&self, entity: &TableEntity) -> Result<(), ClientError> {
        debug!(
            table = %self.name,
            partition_key = %entity.partition_key,
            row_key = %entity.row_key,
            "Creating table entity"
        );
        let url = with_segments(&self.endpoint, &[&self.name])?;
        let mut headers = HeaderMap::new();
        prefer_no_content(&mut headers);

        self.transport
            .send_table(
                &self.resource(&entity.partition_key, &entity.row_key),
                Method::POST,
                url,
                headers,
                Some(&Self::entity_body(entity)?),
            )
            .await?;
        Ok(())
    }

    /// Read an entity by its keys
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Entity doesn't exist
    pub async fn get_entity(&self, partition_key: &str, row_key: &str) -> Result<TableEntity, ClientError> {
        debug!(table = %self.name, partition_key = %partition_key, row_key = %row_key, "Reading table entity");
        let response = self
            .transport
            .send_table(
                &self.resource(partition_key, row_key),
                Method::GET,
                self.entity_url(partition_key, row_key)?,
                HeaderMap::new(),
                None,
            )
            .await?;
        let entity: TableEntity = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("invalid entity body: {}", e)))?;
        Ok(entity.strip_metadata())
    }

    /// Update an existing entity unconditionally
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Entity doesn't exist
    pub async fn update_entity(&self, entity: &TableEntity, mode: UpdateMode) -> Result<(), ClientError> {
        debug!(
            table = %self.name,
            partition_key = %entity.partition_key,
            row_key = %entity.row_key,
            ?mode,
            "Updating table entity"
        );
        self.transport
            .send_table(
                &self.resource(&entity.partition_key, &entity.row_key),
                mode.method(),
                self.entity_url(&entity.partition_key, &entity.row_key)?,
                if_match_any(),
                Some(&Self::entity_body(entity)?),
            )
            .await?;
        Ok(())
    }

    /// Delete an entity unconditionally
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Entity doesn't exist
    pub async fn delete_entity(&self, partition_key: &str, row_key: &str) -> Result<(), ClientError> {
        debug!(table = %self.name, partition_key = %partition_key, row_key = %row_key, "Deleting table entity");
        self.transport
            .send_table(
                &self.resource(partition_key, row_key),
                Method::DELETE,
                self.entity_url(partition_key, row_key)?,
                if_match_any(),
                None,
            )
            .await?;
        Ok(())
    }
}
