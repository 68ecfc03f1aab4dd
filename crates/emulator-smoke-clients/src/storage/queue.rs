//! Queue service client
//!
//! Message text is sent as-is (no base64 encoding policy), XML-escaped
//! inside the `<QueueMessage>` envelope.

use super::{xml, StorageTransport};
use crate::config::StorageSettings;
use crate::error::{ClientError, Service};
use crate::probe::EmulatorProbe;
use crate::transport::with_segments;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Server-side maximum for a single receive or peek
pub const MAX_MESSAGES_PER_CALL: u32 = 32;

/// Receipt for an enqueued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub pop_receipt: String,
}

/// A message received with a visibility lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Required to delete the message while the lease is held
    pub pop_receipt: String,
    pub content: String,
    pub dequeue_count: u32,
}

/// Account-level queue client
#[derive(Debug, Clone)]
pub struct QueueServiceClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
}

impl QueueServiceClient {
    pub fn new(settings: &StorageSettings) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Arc::new(StorageTransport::new(settings)?),
            endpoint: settings.queue_endpoint.clone(),
        })
    }

    /// Get a client for a queue without creating it
    pub fn queue(&self, name: &str) -> QueueClient {
        QueueClient {
            transport: Arc::clone(&self.transport),
            endpoint: self.endpoint.clone(),
            name: name.to_string(),
        }
    }

    /// Create a queue
    ///
    /// Creating a queue that already exists with the same metadata succeeds.
    pub async fn create_queue(&self, name: &str) -> Result<QueueClient, ClientError> {
        debug!(queue = %name, "Creating storage queue");
        let url = with_segments(&self.endpoint, &[name])?;
        self.transport
            .send_blob_queue(Service::Queue, name, Method::PUT, url, HeaderMap::new(), None)
            .await?;
        Ok(self.queue(name))
    }

    /// Delete a queue and its messages
    pub async fn delete_queue(&self, name: &str) -> Result<(), ClientError> {
        debug!(queue = %name, "Deleting storage queue");
        let url = with_segments(&self.endpoint, &[name])?;
        self.transport
            .send_blob_queue(Service::Queue, name, Method::DELETE, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EmulatorProbe for QueueServiceClient {
    fn name(&self) -> &'static str {
        "queue"
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
            .send_blob_queue(Service::Queue, "queues", Method::GET, url, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

/// Client scoped to one queue
#[derive(Debug, Clone)]
pub struct QueueClient {
    transport: Arc<StorageTransport>,
    endpoint: Url,
    name: String,
}

impl QueueClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn messages_url(&self) -> Result<Url, ClientError> {
        with_segments(&self.endpoint, &[&self.name, "messages"])
    }

    /// Enqueue a text message
    pub async fn send_message(&self, text: &str) -> Result<SentMessage, ClientError> {
        debug!(queue = %self.name, bytes = text.len(), "Sending queue message");
        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            xml::escape(text)
        );
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));

        let response = self
            .transport
            .send_blob_queue(
                Service::Queue,
                &self.name,
                Method::POST,
                self.messages_url()?,
                headers,
                Some(body.into_bytes()),
            )
            .await?;
        let text = response.text().await?;

        let message_id = xml::extract_element(&text, "MessageId")
            .ok_or_else(|| ClientError::Parse("enqueue response has no MessageId".into()))?;
        let pop_receipt = xml::extract_element(&text, "PopReceipt")
            .ok_or_else(|| ClientError::Parse("enqueue response has no PopReceipt".into()))?;
        Ok(SentMessage {
            message_id,
            pop_receipt,
        })
    }

    /// Receive up to `max` messages, hiding them for `visibility_timeout`
    pub async fn receive_messages(
        &self,
        max: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, ClientError> {
        let max = max.clamp(1, MAX_MESSAGES_PER_CALL);
        let mut url = self.messages_url()?;
        url.query_pairs_mut()
            .append_pair("numofmessages", &max.to_string())
            .append_pair(
                "visibilitytimeout",
                &visibility_timeout.as_secs().max(1).to_string(),
            );

        let response = self
            .transport
            .send_blob_queue(Service::Queue, &self.name, Method::GET, url, HeaderMap::new(), None)
            .await?;
        let text = response.text().await?;

        let messages = xml::records(&text, "QueueMessage")?
            .iter()
            .map(parse_received)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(queue = %self.name, count = messages.len(), "Received queue messages");
        Ok(messages)
    }

    /// Peek at up to `max` message texts without leasing them
    pub async fn peek_messages(&self, max: u32) -> Result<Vec<String>, ClientError> {
        let max = max.clamp(1, MAX_MESSAGES_PER_CALL);
        let mut url = self.messages_url()?;
        url.query_pairs_mut()
            .append_pair("numofmessages", &max.to_string())
            .append_pair("peekonly", "true");

        let response = self
            .transport
            .send_blob_queue(Service::Queue, &self.name, Method::GET, url, HeaderMap::new(), None)
            .await?;
        let text = response.text().await?;

        Ok(xml::records(&text, "QueueMessage")?
            .into_iter()
            .filter_map(|mut record| record.remove("MessageText"))
            .collect())
    }

    /// Delete a received message using its pop receipt
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Message gone or pop receipt stale
    pub async fn delete_message(&self, message: &QueueMessage) -> Result<(), ClientError> {
        debug!(queue = %self.name, message_id = %message.message_id, "Deleting queue message");
        let mut url = with_segments(&self.endpoint, &[&self.name, "messages", &message.message_id])?;
        url.query_pairs_mut()
            .append_pair("popreceipt", &message.pop_receipt);

        self.transport
            .send_blob_queue(
                Service::Queue,
                &format!("{}/{}", self.name, message.message_id),
                Method::DELETE,
                url,
                HeaderMap::new(),
                None,
            )
            .await?;
        Ok(())
    }
}

fn parse_received(record: &xml::Record) -> Result<QueueMessage, ClientError> {
    let field = |name: &str| {
        record
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::Parse(format!("queue message has no {}", name)))
    };
    Ok(QueueMessage {
        message_id: field("MessageId")?,
        pop_receipt: field("PopReceipt")?,
        content: field("MessageText")?,
        dequeue_count: record
            .get("DequeueCount")
            .and_then(|c| c.parse().ok())
            .unwrap_or(0),
    })
}
