//! Cosmos DB native (SQL) API client
//!
//! # API Endpoints Used
//!
//! - `GET /` - Database account (health check)
//! - `POST /dbs`, `GET|DELETE /dbs/{db}` - Databases
//! - `POST /dbs/{db}/colls`, `GET /dbs/{db}/colls/{coll}` - Containers
//! - `POST /dbs/{db}/colls/{coll}/docs` - Create item
//! - `GET|PUT|DELETE /dbs/{db}/colls/{coll}/docs/{id}` - Read/replace/delete item
//!
//! Every request is signed with the account master key.

use crate::auth::{cosmos_master_token, rfc1123_now};
use crate::config::{CosmosSettings, Secret};
use crate::error::{error_from_response, ClientError, Service};
use crate::probe::EmulatorProbe;
use crate::transport::{header_value, with_segments};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// REST API version sent with every request
pub const COSMOS_API_VERSION: &str = "2018-12-31";

const X_MS_DATE: HeaderName = HeaderName::from_static("x-ms-date");
const X_MS_VERSION: HeaderName = HeaderName::from_static("x-ms-version");
const X_MS_PARTITION_KEY: HeaderName = HeaderName::from_static("x-ms-documentdb-partitionkey");
const X_MS_OFFER_THROUGHPUT: HeaderName = HeaderName::from_static("x-ms-offer-throughput");

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    endpoint: Url,
    key: Secret,
}

impl Inner {
    /// Send a signed request
    ///
    /// `resource_link` is the unencoded path of the addressed resource (for
    /// creates, the parent's path); `segments` builds the request URL.
    async fn send(
        &self,
        method: Method,
        resource_type: &str,
        resource_link: &str,
        segments: &[&str],
        mut headers: HeaderMap,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let date = rfc1123_now();
        let token = cosmos_master_token(&method, resource_type, resource_link, &date, self.key.expose())?;

        headers.insert(X_MS_DATE, header_value(&date)?);
        headers.insert(X_MS_VERSION, HeaderValue::from_static(COSMOS_API_VERSION));
        headers.insert(AUTHORIZATION, header_value(&token)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let url = if segments.is_empty() {
            self.endpoint.clone()
        } else {
            with_segments(&self.endpoint, segments)?
        };
        trace!(%method, %url, resource_type, "Sending Cosmos request");

        let mut request = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let resource = if resource_link.is_empty() {
                resource_type
            } else {
                resource_link
            };
            return Err(error_from_response(Service::Cosmos, resource, response).await);
        }
        Ok(response)
    }
}

async fn json_body(response: reqwest::Response) -> Result<Value, ClientError> {
    response
        .json()
        .await
        .map_err(|e| ClientError::Parse(format!("invalid Cosmos response body: {}", e)))
}

fn partition_key_header(headers: &mut HeaderMap, partition_key: &str) -> Result<(), ClientError> {
    let encoded = serde_json::to_string(&[partition_key])
        .map_err(|e| ClientError::Parse(format!("invalid partition key: {}", e)))?;
    headers.insert(X_MS_PARTITION_KEY, header_value(&encoded)?);
    Ok(())
}

/// Account-level Cosmos DB client
#[derive(Debug, Clone)]
pub struct CosmosClient {
    inner: Arc<Inner>,
}

impl CosmosClient {
    /// Create a client for the account endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &CosmosSettings) -> Result<Self, ClientError> {
        Ok(Self {
            inner: Arc::new(Inner {
                http: crate::transport::http_client(settings.accept_invalid_certs)?,
                endpoint: settings.endpoint.clone(),
                key: settings.key.clone(),
            }),
        })
    }

    /// Get a client for a database without creating it
    pub fn database(&self, id: &str) -> DatabaseClient {
        DatabaseClient {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
        }
    }

    /// Create a database, or reuse it if it already exists
    pub async fn create_database_if_not_exists(&self, id: &str) -> Result<DatabaseClient, ClientError> {
        debug!(database = %id, "Creating Cosmos database");
        let result = self
            .inner
            .send(
                Method::POST,
                "dbs",
                "",
                &["dbs"],
                HeaderMap::new(),
                Some(&json!({ "id": id })),
            )
            .await;

        match result {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(database = %id, "Cosmos database already exists");
            }
            Err(e) => return Err(e),
        }
        Ok(self.database(id))
    }

    /// Delete a database and every container in it
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Database doesn't exist
    pub async fn delete_database(&self, id: &str) -> Result<(), ClientError> {
        debug!(database = %id, "Deleting Cosmos database");
        let link = format!("dbs/{}", id);
        self.inner
            .send(Method::DELETE, "dbs", &link, &["dbs", id], HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EmulatorProbe for CosmosClient {
    fn name(&self) -> &'static str {
        "cosmos"
    }

    fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        self.inner
            .send(Method::GET, "", "", &[], HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

/// Client scoped to one database
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    inner: Arc<Inner>,
    id: String,
}

impl DatabaseClient {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get a client for a container without creating it
    pub fn container(&self, id: &str) -> ContainerClient {
        ContainerClient {
            inner: Arc::clone(&self.inner),
            database: self.id.clone(),
            id: id.to_string(),
        }
    }

    /// Create a container with a hash partition key, or reuse an existing one
    ///
    /// `throughput` is the provisioned RU/s; `None` leaves it to the account.
    pub async fn create_container_if_not_exists(
        &self,
        id: &str,
        partition_key_path: &str,
        throughput: Option<u32>,
    ) -> Result<ContainerClient, ClientError> {
        debug!(database = %self.id, container = %id, partition_key_path, "Creating Cosmos container");
        let mut headers = HeaderMap::new();
        if let Some(ru) = throughput {
            headers.insert(X_MS_OFFER_THROUGHPUT, HeaderValue::from(ru));
        }
        let body = json!({
            "id": id,
            "partitionKey": { "paths": [partition_key_path], "kind": "Hash" }
        });
        let link = format!("dbs/{}", self.id);

        let result = self
            .inner
            .send(
                Method::POST,
                "colls",
                &link,
                &["dbs", &self.id, "colls"],
                headers,
                Some(&body),
            )
            .await;

        match result {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!(container = %id, "Cosmos container already exists");
            }
            Err(e) => return Err(e),
        }
        Ok(self.container(id))
    }
}

/// Client scoped to one container
#[derive(Debug, Clone)]
pub struct ContainerClient {
    inner: Arc<Inner>,
    database: String,
    id: String,
}

impl ContainerClient {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn collection_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.id)
    }

    fn item_link(&self, item_id: &str) -> String {
        format!("{}/docs/{}", self.collection_link(), item_id)
    }

    /// Create an item; the partition key is taken from its `id`
    ///
    /// Containers created by this harness are partitioned on `/id`.
    ///
    /// # Errors
    /// * `ClientError::Conflict` - An item with this id exists
    /// * `ClientError::Parse` - Item has no string `id`
    pub async fn create_item(&self, item: &Value) -> Result<Value, ClientError> {
        let item_id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Parse("item has no string id".into()))?;
        self.create_item_with_partition_key(item, item_id).await
    }

    /// Create an item with an explicit partition key value
    pub async fn create_item_with_partition_key(
        &self,
        item: &Value,
        partition_key: &str,
    ) -> Result<Value, ClientError> {
        debug!(container = %self.id, partition_key, "Creating Cosmos item");
        let mut headers = HeaderMap::new();
        partition_key_header(&mut headers, partition_key)?;

        let response = self
            .inner
            .send(
                Method::POST,
                "docs",
                &self.collection_link(),
                &["dbs", &self.database, "colls", &self.id, "docs"],
                headers,
                Some(item),
            )
            .await?;
        json_body(response).await
    }

    /// Read an item by id and partition key
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Item doesn't exist
    pub async fn read_item(&self, item_id: &str, partition_key: &str) -> Result<Value, ClientError> {
        debug!(container = %self.id, item = %item_id, "Reading Cosmos item");
        let mut headers = HeaderMap::new();
        partition_key_header(&mut headers, partition_key)?;

        let response = self
            .inner
            .send(
                Method::GET,
                "docs",
                &self.item_link(item_id),
                &["dbs", &self.database, "colls", &self.id, "docs", item_id],
                headers,
                None,
            )
            .await?;
        json_body(response).await
    }

    /// Replace an item's body
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Item doesn't exist
    pub async fn replace_item(
        &self,
        item_id: &str,
        partition_key: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        debug!(container = %self.id, item = %item_id, "Replacing Cosmos item");
        let mut headers = HeaderMap::new();
        partition_key_header(&mut headers, partition_key)?;

        let response = self
            .inner
            .send(
                Method::PUT,
                "docs",
                &self.item_link(item_id),
                &["dbs", &self.database, "colls", &self.id, "docs", item_id],
                headers,
                Some(body),
            )
            .await?;
        json_body(response).await
    }

    /// Delete an item
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Item doesn't exist
    pub async fn delete_item(&self, item_id: &str, partition_key: &str) -> Result<(), ClientError> {
        debug!(container = %self.id, item = %item_id, "Deleting Cosmos item");
        let mut headers = HeaderMap::new();
        partition_key_header(&mut headers, partition_key)?;

        self.inner
            .send(
                Method::DELETE,
                "docs",
                &self.item_link(item_id),
                &["dbs", &self.database, "colls", &self.id, "docs", item_id],
                headers,
                None,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_header_is_json_array() {
        let mut headers = HeaderMap::new();
        partition_key_header(&mut headers, "item_1234").unwrap();
        assert_eq!(
            headers.get(X_MS_PARTITION_KEY).unwrap(),
            r#"["item_1234"]"#
        );
    }

    #[test]
    fn test_links() {
        let client = CosmosClient::new(&CosmosSettings::default()).unwrap();
        let container = client.database("testdb_1").container("test_container");
        assert_eq!(container.collection_link(), "dbs/testdb_1/colls/test_container");
        assert_eq!(
            container.item_link("item_1"),
            "dbs/testdb_1/colls/test_container/docs/item_1"
        );
    }
}
