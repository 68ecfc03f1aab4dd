//! Service Bus queue client
//!
//! Speaks AMQP 1.0 through `azservicebus`. The emulator serves plain AMQP on
//! port 5672 and only knows the queues declared in its own config, so there
//! is no queue management here.
//!
//! The connection and each link are opened on first use and kept until
//! `close()`. A received message stays locked until it is completed or
//! abandoned through the receiver that handed it out.

use crate::config::{Secret, ServiceBusSettings};
use crate::error::{ClientError, Service};
use crate::probe::EmulatorProbe;
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::{
    ServiceBusClientOptions, ServiceBusReceivedMessage, ServiceBusReceiver,
    ServiceBusReceiverOptions, ServiceBusRetryOptions, ServiceBusSender, ServiceBusSenderOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use url::Url;

/// Bound on opening the AMQP connection, including the TCP dial
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout for link and settle operations
const TRY_TIMEOUT: Duration = Duration::from_secs(30);

type Connection = azservicebus::ServiceBusClient<BasicRetryPolicy>;

/// Outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBusMessage {
    pub body: String,
    pub message_id: Option<String>,
}

impl ServiceBusMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    fn to_amqp(&self) -> Result<azservicebus::ServiceBusMessage, ClientError> {
        let mut message = azservicebus::ServiceBusMessage::new(self.body.as_bytes().to_vec());
        if let Some(id) = &self.message_id {
            message
                .set_message_id(id.as_str())
                .map_err(|e| driver_error("invalid message id", e))?;
        }
        Ok(message)
    }
}

/// Message held under a peek-lock until completed or abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub lock_token: String,
    pub sequence_number: i64,
    pub delivery_count: u32,
}

impl ReceivedMessage {
    /// Body decoded as UTF-8
    pub fn body_text(&self) -> Result<&str, ClientError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| ClientError::Parse(format!("message body is not UTF-8: {}", e)))
    }

    fn from_amqp(message: &ServiceBusReceivedMessage) -> Result<Self, ClientError> {
        let body = message
            .body()
            .map_err(|e| driver_error("message has no data body", e))?
            .to_vec();
        Ok(Self {
            body,
            message_id: message.message_id().map(|id| id.into_owned()),
            lock_token: format!("{:x}", message.lock_token()),
            sequence_number: message.sequence_number(),
            // The broker counts the first delivery as 1
            delivery_count: message.delivery_count().unwrap_or(1),
        })
    }
}

fn driver_error(
    message: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ClientError {
    ClientError::driver(Service::ServiceBus, message, source)
}

#[derive(Debug)]
struct Inner {
    endpoint: Url,
    connection_string: Secret,
    development: bool,
    connection: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed(Service::ServiceBus));
        }
        Ok(())
    }

    fn options() -> ServiceBusClientOptions {
        ServiceBusClientOptions {
            retry_options: ServiceBusRetryOptions {
                max_retries: 1,
                try_timeout: TRY_TIMEOUT,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Lock the shared connection, opening it if this is the first use
    async fn connection(&self) -> Result<MutexGuard<'_, Option<Connection>>, ClientError> {
        self.ensure_open()?;
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            debug!(endpoint = %self.endpoint, "Opening Service Bus AMQP connection");
            let conn = self.connection_string.expose();
            let opening = async {
                if self.development {
                    Connection::unsecured()
                        .new_from_connection_string(conn, Self::options())
                        .await
                } else {
                    Connection::new_from_connection_string(conn, Self::options()).await
                }
            };
            let connection = tokio::time::timeout(CONNECT_TIMEOUT, opening)
                .await
                .map_err(|e| driver_error("timed out opening AMQP connection", e))?
                .map_err(|e| driver_error("failed to open AMQP connection", e))?;
            *guard = Some(connection);
        }
        Ok(guard)
    }

    async fn open_sender(&self, queue: &str) -> Result<ServiceBusSender, ClientError> {
        let mut guard = self.connection().await?;
        let connection = guard
            .as_mut()
            .ok_or(ClientError::Closed(Service::ServiceBus))?;
        connection
            .create_sender(queue, ServiceBusSenderOptions::default())
            .await
            .map_err(|e| driver_error("failed to open sender link", e))
    }

    async fn open_receiver(&self, queue: &str) -> Result<ServiceBusReceiver, ClientError> {
        let mut guard = self.connection().await?;
        let connection = guard
            .as_mut()
            .ok_or(ClientError::Closed(Service::ServiceBus))?;
        connection
            .create_receiver_for_queue(queue, ServiceBusReceiverOptions::default())
            .await
            .map_err(|e| driver_error("failed to open receiver link", e))
    }
}

/// Namespace-level Service Bus client
#[derive(Debug, Clone)]
pub struct ServiceBusClient {
    inner: Arc<Inner>,
}

impl ServiceBusClient {
    /// Create a client for the namespace
    ///
    /// Nothing is dialed until the first operation or health check.
    pub fn new(settings: &ServiceBusSettings) -> Result<Self, ClientError> {
        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: settings.endpoint.clone(),
                connection_string: settings.connection_string(),
                development: settings.development,
                connection: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Get a sender for a queue
    pub fn sender(&self, queue: &str) -> QueueSender {
        QueueSender {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            link: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Get a peek-lock receiver for a queue
    pub fn receiver(&self, queue: &str) -> QueueReceiver {
        QueueReceiver {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            link: Mutex::new(None),
            locked: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the client and every sender and receiver derived from it
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(connection) = self.inner.connection.lock().await.take() {
            if let Err(e) = connection.dispose().await {
                warn!(error = %e, "Failed to close Service Bus connection cleanly");
            }
        }
        debug!(endpoint = %self.inner.endpoint, "Closed Service Bus client");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EmulatorProbe for ServiceBusClient {
    fn name(&self) -> &'static str {
        "service-bus"
    }

    fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Dials the AMQP port, then opens the connection
    async fn health_check(&self) -> Result<(), ClientError> {
        self.inner.ensure_open()?;
        let host = self.inner.endpoint.host_str().unwrap_or("localhost");
        let port = self.inner.endpoint.port().unwrap_or(crate::config::AMQP_PORT);
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|e| driver_error("timed out dialing AMQP port", e))?
            .map_err(|e| driver_error("failed to dial AMQP port", e))?;

        self.inner.connection().await?;
        Ok(())
    }
}

/// Sends messages to one queue
#[derive(Debug)]
pub struct QueueSender {
    inner: Arc<Inner>,
    queue: String,
    link: Mutex<Option<ServiceBusSender>>,
    closed: AtomicBool,
}

impl QueueSender {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed(Service::ServiceBus));
        }
        self.inner.ensure_open()
    }

    /// Send one message
    pub async fn send(&self, message: &ServiceBusMessage) -> Result<(), ClientError> {
        self.ensure_open()?;
        let outgoing = message.to_amqp()?;
        debug!(queue = %self.queue, bytes = message.body.len(), "Sending Service Bus message");

        let mut link = self.link.lock().await;
        if link.is_none() {
            *link = Some(self.inner.open_sender(&self.queue).await?);
        }
        let sender = link.as_mut().ok_or(ClientError::Closed(Service::ServiceBus))?;
        sender
            .send_message(outgoing)
            .await
            .map_err(|e| driver_error("send failed", e))
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(sender) = self.link.lock().await.take() {
            if let Err(e) = sender.dispose().await {
                debug!(queue = %self.queue, error = %e, "Sender link did not close cleanly");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Complete,
    Abandon,
}

/// Receives messages from one queue in peek-lock mode
#[derive(Debug)]
pub struct QueueReceiver {
    inner: Arc<Inner>,
    queue: String,
    link: Mutex<Option<ServiceBusReceiver>>,
    /// Messages handed out and not yet settled, by lock token
    locked: Mutex<HashMap<String, ServiceBusReceivedMessage>>,
    closed: AtomicBool,
}

impl QueueReceiver {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed(Service::ServiceBus));
        }
        self.inner.ensure_open()
    }

    /// Wait up to `max_wait` for one message and lock it
    ///
    /// Returns `None` when the wait elapses with the queue empty.
    pub async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, ClientError> {
        self.ensure_open()?;
        let mut link = self.link.lock().await;
        if link.is_none() {
            *link = Some(self.inner.open_receiver(&self.queue).await?);
        }
        let receiver = link.as_mut().ok_or(ClientError::Closed(Service::ServiceBus))?;

        let message = match receiver
            .receive_message_with_max_wait_time(max_wait)
            .await
            .map_err(|e| driver_error("receive failed", e))?
        {
            Some(message) => message,
            None => {
                debug!(queue = %self.queue, "No Service Bus message within wait");
                return Ok(None);
            }
        };

        let received = ReceivedMessage::from_amqp(&message)?;
        debug!(
            queue = %self.queue,
            sequence_number = received.sequence_number,
            delivery_count = received.delivery_count,
            "Received Service Bus message"
        );
        self.locked
            .lock()
            .await
            .insert(received.lock_token.clone(), message);
        Ok(Some(received))
    }

    /// Settle a locked message as processed
    ///
    /// # Errors
    /// * `ClientError::NotFound` - Message was not received here or is
    ///   already settled
    pub async fn complete(&self, message: &ReceivedMessage) -> Result<(), ClientError> {
        self.settle(message, Settlement::Complete).await
    }

    /// Release the lock so the message can be received again
    pub async fn abandon(&self, message: &ReceivedMessage) -> Result<(), ClientError> {
        self.settle(message, Settlement::Abandon).await
    }

    async fn settle(
        &self,
        message: &ReceivedMessage,
        settlement: Settlement,
    ) -> Result<(), ClientError> {
        self.ensure_open()?;
        debug!(
            queue = %self.queue,
            sequence_number = message.sequence_number,
            ?settlement,
            "Settling Service Bus message"
        );
        let locked = self
            .locked
            .lock()
            .await
            .remove(&message.lock_token)
            .ok_or_else(|| ClientError::NotFound {
                service: Service::ServiceBus,
                resource: format!("{}/{}", self.queue, message.lock_token),
            })?;

        let mut link = self.link.lock().await;
        let receiver = link.as_mut().ok_or(ClientError::Closed(Service::ServiceBus))?;
        match settlement {
            Settlement::Complete => receiver
                .complete_message(&locked)
                .await
                .map_err(|e| driver_error("complete failed", e)),
            Settlement::Abandon => receiver
                .abandon_message(&locked, None)
                .await
                .map_err(|e| driver_error("abandon failed", e)),
        }
    }

    /// Close the link; unsettled messages are released by the broker
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.locked.lock().await.clear();
        if let Some(receiver) = self.link.lock().await.take() {
            if let Err(e) = receiver.dispose().await {
                debug!(queue = %self.queue, error = %e, "Receiver link did not close cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ServiceBusClient {
        ServiceBusClient::new(&ServiceBusSettings::default()).expect("valid settings")
    }

    /// Settings for a local host where nothing listens on the AMQP port
    fn unreachable_settings() -> ServiceBusSettings {
        let mut settings = ServiceBusSettings::from_connection_string(
            "Endpoint=sb://127.0.0.1;SharedAccessKeyName=k;SharedAccessKey=s",
        )
        .expect("valid connection string");
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        settings.endpoint.set_port(Some(port)).unwrap();
        settings
    }

    fn received(lock_token: &str) -> ReceivedMessage {
        ReceivedMessage {
            body: b"Test message".to_vec(),
            message_id: None,
            lock_token: lock_token.into(),
            sequence_number: 1,
            delivery_count: 1,
        }
    }

    #[tokio::test]
    async fn test_closed_client_rejects_operations() {
        let client = client();
        let sender = client.sender("queue.1");
        client.close().await;
        assert!(client.is_closed());

        let result = sender.send(&ServiceBusMessage::new("hello")).await;
        assert!(matches!(result, Err(ClientError::Closed(Service::ServiceBus))));
        let result = client.health_check().await;
        assert!(matches!(result, Err(ClientError::Closed(_))));
    }

    #[tokio::test]
    async fn test_closed_receiver_rejects_receive() {
        let client = client();
        let receiver = client.receiver("queue.1");
        receiver.close().await;

        let result = receiver.receive(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Closed(_))));
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_settle_unknown_lock_is_not_found() {
        let receiver = client().receiver("queue.1");

        let result = receiver.complete(&received("no-such-lock")).await;
        assert!(matches!(result, Err(ClientError::NotFound { .. })));
        let result = receiver.abandon(&received("no-such-lock")).await;
        assert!(matches!(result, Err(ClientError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_health_check_unreachable_is_driver_error() {
        let client = ServiceBusClient::new(&unreachable_settings()).unwrap();

        let result = client.health_check().await;
        assert!(matches!(
            result,
            Err(ClientError::Driver {
                service: Service::ServiceBus,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = client();
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
    }

    #[test]
    fn test_message_id_is_carried() {
        let message = ServiceBusMessage::new("hello").with_message_id("m-1");
        let amqp = message.to_amqp().unwrap();
        assert_eq!(amqp.message_id().as_deref(), Some("m-1"));
    }

    #[test]
    fn test_empty_message_id_is_rejected() {
        let message = ServiceBusMessage::new("hello").with_message_id("");
        assert!(matches!(message.to_amqp(), Err(ClientError::Driver { .. })));
    }

    #[test]
    fn test_body_text() {
        assert_eq!(received("t").body_text().unwrap(), "Test message");
    }

    #[test]
    fn test_body_text_not_utf8() {
        let mut message = received("t");
        message.body = vec![0xff, 0xfe];
        assert!(matches!(message.body_text(), Err(ClientError::Parse(_))));
    }
}
