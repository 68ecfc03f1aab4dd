//! Blob service client
//!
//! # API Endpoints Used
//!
//! - `PUT /{container}?restype=container` - Create container
//! - `DELETE /{container}?restype=container` - Delete container
//! - `GET /?comp=list` - List containers (health check)
//! - `PUT /{container}/{blob}` - Upload block blob
//! - `GET /{container}/{blob}` - Download blob
//! - `HEAD /{container}/{blob}` - Blob properties
//! - `DELETE /{container}/{blob}` - Delete blob

use super::StorageTransport;
use crate::config::StorageSettings;
use crate::error::{ClientError, Service};
use crate::probe::EmulatorProbe;
use crate::transport::with_segments;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Account-level blob client
#[derive(Debug, Clone)]
pub struct BlobServiceClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
}

impl BlobServiceClient {
    /// Create a client for the account's blob endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the account
    /// key is not base64.
    pub fn new(settings: &StorageSettings) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Arc::new(StorageTransport::new(settings)?),
            endpoint: settings.blob_endpoint.clone(),
        })
    }

    /// Get a client for a container without creating it
    pub fn container(&self, name: &str) -> BlobContainerClient {
        BlobContainerClient {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            name: name.to_string(),
        }
    }

    /// Create a container
    ///
    /// # Errors
    /// * `ClientError::Conflict` - Container already exists
    pub async fn create_container(&self, name: &str) -> Result<BlobContainerClient, ClientError> {
        debug!(container = %name, "Creating blob container");
        let mut url = with_segments(&self.endpoint, &[name])?;
        url.query_pairs_mut().append_pair("restype", "container");

        self.transport
            .send_blob_queue(Service::Blob, name, Method::PUT, url, HeaderMap::new(), None)
            .await?;
        Ok(self.container(name))
    }

    /// Delete a container and everything in it
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Container doesn't exist
    pub async fn delete_container(&self, name: &str) -> Result<(), ClientError> {
        debug!(container = %name, "Deleting blob container");
        let mut url = with_segments(&self.endpoint, &[name])?;
        url.query_pairs_mut().append_pair("restype", "container");

        self.transport
            .send_blob_queue(Service::Blob, name, Method::DELETE, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EmulatorProbe for BlobServiceClient {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("comp", "list")
            .append_pair("maxresults", "1");
        self.transport
            .send_blob_queue(Service::Blob, "containers", Method::GET, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

/// Client scoped to one blob container
#[derive(Debug, Clone)]
pub struct BlobContainerClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
    name: String,
}

impl BlobContainerClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn blob_url(&self, blob: &str) -> Result<Url, ClientError> {
        with_segments(&self.endpoint, &[&self.name, blob])
    }

    fn resource(&self, blob: &str) -> String {
        format!("{}/{}", self.name, blob)
    }

    /// Upload a block blob
    ///
    /// With `overwrite == false` the upload is conditional on the blob not
    /// existing yet.
    ///
    /// # Errors
    /// * `ClientError::Conflict` - Blob exists and `overwrite` is false
    /// * `ClientError::NotFound` - Container doesn't exist
    pub async fn upload(&self, blob: &str, data: &[u8], overwrite: bool) -> Result<(), ClientError> {
        debug!(container = %self.name, blob = %blob, bytes = data.len(), overwrite, "Uploading blob");

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-ms-blob-type"),
            HeaderValue::from_static("BlockBlob"),
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        if !overwrite {
            headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        }

        self.transport
            .send_blob_queue(
                Service::Blob,
                &self.resource(blob),
                Method::PUT,
                self.blob_url(blob)?,
                headers,
                Some(data.to_vec()),
            )
            .await?;
        Ok(())
    }

    /// Download a blob's full content
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Blob doesn't exist
    pub async fn download(&self, blob: &str) -> Result<Vec<u8>, ClientError> {
        debug!(container = %self.name, blob = %blob, "Downloading blob");
        let response = self
            .transport
            .send_blob_queue(
                Service::Blob,
                &self.resource(blob),
                Method::GET,
                self.blob_url(blob)?,
                HeaderMap::new(),
                None,
            )
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Check whether a blob exists
    pub async fn exists(&self, blob: &str) -> Result<bool, ClientError> {
        let result = self
            .transport
            .send_blob_queue(
                Service::Blob,
                &self.resource(blob),
                Method::HEAD,
                self.blob_url(blob)?,
                HeaderMap::new(),
                None,
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a blob
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Blob doesn't exist
    pub async fn delete(&self, blob: &str) -> Result<(), ClientError> {
        debug!(container = %self.name, blob = %blob, "Deleting blob");
        self.transport
            .send_blob_queue(
                Service::Blob,
                &self.resource(blob),
                Method::DELETE,
                self.blob_url(blob)?,
                HeaderMap::new(),
                None,
            )
            .await?;
        Ok(())
    }
}
