//! Blob, queue and table storage clients
//!
//! All three services share the account credential and the Shared Key
//! request pipeline defined here. Each service client owns its endpoint.

pub mod blob;
pub mod queue;
pub mod table;
pub mod xml;

pub use blob::{BlobContainerClient, BlobServiceClient};
pub use queue::{QueueClient, QueueMessage, QueueServiceClient, SentMessage};
pub use table::{TableClient, TableEntity, TableServiceClient, UpdateMode};

use crate::auth::{rfc1123_now, StorageSharedKey};
use crate::config::StorageSettings;
use crate::error::{error_from_response, ClientError, Service};
use crate::transport::header_value;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;
use tracing::trace;
use url::Url;

/// REST API version sent to the Blob and Queue services
pub const BLOB_QUEUE_API_VERSION: &str = "2021-08-06";

/// REST API version sent to the Table service
pub const TABLE_API_VERSION: &str = "2019-02-02";

const X_MS_DATE: HeaderName = HeaderName::from_static("x-ms-date");
const X_MS_VERSION: HeaderName = HeaderName::from_static("x-ms-version");

/// Signed request pipeline shared by the storage clients
#[derive(Debug, Clone)]
pub(crate) struct StorageTransport {
    http: reqwest::Client,
    credential: StorageSharedKey,
}

impl StorageTransport {
    pub(crate) fn new(settings: &StorageSettings) -> Result<Self, ClientError> {
        Ok(Self {
            http: crate::transport::http_client(false)?,
            credential: StorageSharedKey::new(
                settings.account_name.clone(),
                settings.account_key.expose(),
            )?,
        })
    }

    /// Send a Shared Key signed Blob/Queue request
    ///
    /// Non-success statuses are mapped through `error_from_response`.
    pub(crate) async fn send_blob_queue(
        &self,
        service: Service,
        resource: &str,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, ClientError> {
        headers.insert(X_MS_DATE, header_value(&rfc1123_now())?);
        headers.insert(X_MS_VERSION, HeaderValue::from_static(BLOB_QUEUE_API_VERSION));
        let length = body.as_ref().map_or(0, Vec::len);
        if method != Method::GET && method != Method::HEAD {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }

        let authorization = self.credential.sign_blob_queue(&method, &url, &headers)?;
        headers.insert(AUTHORIZATION, authorization);

        trace!(%service, %method, %url, "Sending storage request");
        let mut request = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(service, resource, response).await);
        }
        Ok(response)
    }

    /// Send a Shared Key signed Table request with an optional JSON body
    pub(crate) async fn send_table(
        &self,
        resource: &str,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let date = rfc1123_now();
        let content_type = if body.is_some() { "application/json" } else { "" };

        headers.insert(X_MS_DATE, header_value(&date)?);
        headers.insert(X_MS_VERSION, HeaderValue::from_static(TABLE_API_VERSION));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json;odata=nometadata"),
        );
        headers.insert(
            HeaderName::from_static("dataserviceversion"),
            HeaderValue::from_static("3.0;NetFx"),
        );
        headers.insert(
            HeaderName::from_static("maxdataserviceversion"),
            HeaderValue::from_static("3.0;NetFx"),
        );

        let payload = match body {
            Some(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(
                    serde_json::to_vec(value)
                        .map_err(|e| ClientError::Parse(format!("failed to encode entity: {}", e)))?,
                )
            }
            None => None,
        };
        if method != Method::GET {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.as_ref().map_or(0, Vec::len)));
        }

        let authorization = self.credential.sign_table(&method, &url, &date, content_type)?;
        headers.insert(AUTHORIZATION, authorization);

        trace!(%method, %url, "Sending table request");
        let mut request = self.http.request(method, url).headers(headers);
        if let Some(payload) = payload {
            request = request.body(payload);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(Service::Table, resource, response).await);
        }
        Ok(response)
    }
}
