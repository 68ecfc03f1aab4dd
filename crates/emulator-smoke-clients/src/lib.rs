//! Thin clients for the local Azure emulators
//!
//! One client per emulator API. The REST services are spoken over `reqwest`:
//!
//! - **Cosmos DB** ([`CosmosClient`]) - native SQL API, master-key signed
//! - **MongoDB** ([`mongo::MongoClient`], feature: `mongo`) - Cosmos DB's
//!   MongoDB API through the official driver
//! - **Blob / Queue / Table** ([`storage`]) - Azurite, Shared Key signed
//! - **Service Bus** ([`ServiceBusClient`]) - AMQP 1.0 through `azservicebus`
//!
//! Every client implements [`EmulatorProbe`], and every fallible operation
//! returns [`ClientError`].
//!
//! # Examples
//!
//! ```no_run
//! use emulator_smoke_clients::{BlobServiceClient, EmulatorConfig, ConfigOverrides};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EmulatorConfig::load(None, &ConfigOverrides::default())?;
//! let blobs = BlobServiceClient::new(&config.storage)?;
//! let container = blobs.create_container("testcontainer1a2b3c4d").await?;
//! container.upload("test_blob.txt", b"This is a test blob content", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cosmos;
mod error;
#[cfg(feature = "mongo")]
pub mod mongo;
mod probe;
pub mod service_bus;
pub mod storage;
mod transport;

// Re-exports
pub use config::{
    ConfigError, ConfigOverrides, CosmosSettings, EmulatorConfig, MongoSettings, Secret,
    ServiceBusSettings, StorageSettings,
};
pub use cosmos::{ContainerClient, CosmosClient, DatabaseClient};
pub use error::{error_from_response, BoxedError, ClientError, Service};
pub use probe::EmulatorProbe;
pub use service_bus::{
    QueueReceiver, QueueSender, ReceivedMessage, ServiceBusClient, ServiceBusMessage,
};
pub use storage::{
    BlobContainerClient, BlobServiceClient, QueueClient, QueueMessage, QueueServiceClient,
    SentMessage, TableClient, TableEntity, TableServiceClient, UpdateMode,
};
