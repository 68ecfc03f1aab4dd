//! Client error types

use crate::config::ConfigError;
use serde::Deserialize;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error for wrapping driver-specific errors
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Emulated service an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Cosmos,
    Mongo,
    Blob,
    Queue,
    Table,
    ServiceBus,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Cosmos => "cosmos",
            Service::Mongo => "mongo",
            Service::Blob => "blob",
            Service::Queue => "queue",
            Service::Table => "table",
            Service::ServiceBus => "service-bus",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the emulator clients
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with an unexpected status
    #[error("{service} API error: {status} {code} - {message}")]
    Api {
        service: Service,
        status: u16,
        code: String,
        message: String,
    },

    /// Resource does not exist
    #[error("{service} resource not found: {resource}")]
    NotFound { service: Service, resource: String },

    /// Resource already exists or precondition failed
    #[error("{service} resource conflict: {resource}")]
    Conflict { service: Service, resource: String },

    /// Response body could not be interpreted
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Request could not be signed
    #[error("authentication error: {0}")]
    Auth(String),

    /// Client configuration is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client was closed before use
    #[error("{0} client is closed")]
    Closed(Service),

    /// Driver failure outside the REST clients
    #[error("{service} driver error: {message}")]
    Driver {
        service: Service,
        message: String,
        #[source]
        source: Option<BoxedError>,
    },
}

impl ClientError {
    /// Create a driver error with source
    pub fn driver(
        service: Service,
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            service,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    /// True when the emulator could not be reached at all
    pub fn is_connection(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Map a non-success response into a `ClientError`
///
/// 404 and 409/412 become `NotFound`/`Conflict`; anything else is an `Api`
/// error carrying whatever code and message the service put in the body.
pub async fn error_from_response(
    service: Service,
    resource: &str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status();
    match status.as_u16() {
        404 => {
            return ClientError::NotFound {
                service,
                resource: resource.to_string(),
            }
        }
        409 | 412 => {
            return ClientError::Conflict {
                service,
                resource: resource.to_string(),
            }
        }
        _ => {}
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = parse_error_body(&body);
    ClientError::Api {
        service,
        status: status.as_u16(),
        code: code.unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
        message: message.unwrap_or(body),
    }
}

#[derive(Debug, Deserialize)]
struct JsonError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    #[serde(rename = "odata.error")]
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: Option<String>,
    message: Option<ODataMessage>,
}

#[derive(Debug, Deserialize)]
struct ODataMessage {
    value: Option<String>,
}

/// Extract `(code, message)` from a Cosmos, Table or Storage error body
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(odata) = serde_json::from_str::<ODataError>(trimmed) {
            return (
                odata.error.code,
                odata.error.message.and_then(|m| m.value),
            );
        }
        if let Ok(json) = serde_json::from_str::<JsonError>(trimmed) {
            return (json.code, json.message);
        }
        return (None, None);
    }
    if trimmed.starts_with('<') {
        return (
            crate::storage::xml::extract_element(trimmed, "Code"),
            crate::storage::xml::extract_element(trimmed, "Message"),
        );
    }
    (None, None)
}
