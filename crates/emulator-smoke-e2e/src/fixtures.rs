//! Per-scenario emulator resources
//!
//! Each fixture creates uniquely named resources, registers their deletion
//! with a [`Cleanup`] as soon as they exist, and hands the report back from
//! `teardown`. A setup that fails half-way cleans up what it already made.

use crate::cleanup::{Cleanup, CleanupReport};
use crate::diagnostics::{self, DiagnosticReport};
use crate::naming::{NamingError, ResourceKind};
use crate::scenarios::Group;
use emulator_smoke_clients::{
    BlobContainerClient, BlobServiceClient, ClientError, ContainerClient, CosmosClient,
    DatabaseClient, EmulatorConfig, EmulatorProbe, QueueClient, QueueServiceClient,
    ServiceBusClient, TableClient, TableServiceClient,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Container every Cosmos scenario writes to
pub const COSMOS_CONTAINER_ID: &str = "test_container";
pub const COSMOS_PARTITION_KEY_PATH: &str = "/id";
pub const COSMOS_THROUGHPUT: u32 = 400;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Naming(#[from] NamingError),
}

/// Why a group did not run
#[derive(Debug)]
pub struct Skip {
    pub group: Group,
    pub reason: String,
    pub diagnostics: Option<DiagnosticReport>,
}

impl Skip {
    /// Log the skip and echo it to stderr so test output shows it
    pub fn announce(&self) {
        warn!(group = %self.group, reason = %self.reason, "Skipping emulator group");
        eprintln!("SKIPPED {}: {}", self.group, self.reason);
        if let Some(diagnostics) = &self.diagnostics {
            eprintln!("{}", diagnostics);
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: {}", self.group, self.reason)
    }
}

/// Probe an emulator; unreachable means skip
///
/// Returns `Ok(Err(skip))` when the emulator cannot be reached and
/// `Err(_)` when it answered but rejected the request, which is a failure
/// rather than a reason to skip.
pub async fn check_reachable(
    probe: &dyn EmulatorProbe,
    group: Group,
    config: &EmulatorConfig,
) -> Result<Result<(), Skip>, ClientError> {
    match probe.health_check().await {
        Ok(()) => {
            info!(service = probe.name(), endpoint = %probe.endpoint(), "Emulator reachable");
            Ok(Ok(()))
        }
        Err(e) if e.is_connection() || matches!(e, ClientError::Driver { .. }) => {
            let diagnostics = diagnostics::collect(group, config).await;
            Ok(Err(Skip {
                group,
                reason: format!("{} at {} unreachable: {}", probe.name(), probe.endpoint(), e),
                diagnostics: Some(diagnostics),
            }))
        }
        Err(e) => Err(e),
    }
}

/// Hand back `probe` if its emulator answers, otherwise announce the skip
///
/// Any probe failure skips here; use [`check_reachable`] to tell an
/// unreachable emulator from one that rejects the credentials.
pub async fn connect_or_skip<P: EmulatorProbe>(
    probe: P,
    group: Group,
    config: &EmulatorConfig,
) -> Option<P> {
    match check_reachable(&probe, group, config).await {
        Ok(Ok(())) => Some(probe),
        Ok(Err(skip)) => {
            skip.announce();
            None
        }
        Err(e) => {
            Skip {
                group,
                reason: format!("{} rejected the probe: {}", probe.name(), e),
                diagnostics: None,
            }
            .announce();
            None
        }
    }
}

/// Probe clients for every API a group uses
pub async fn group_probes(
    group: Group,
    config: &EmulatorConfig,
) -> Result<Vec<Box<dyn EmulatorProbe>>, ClientError> {
    let probes: Vec<Box<dyn EmulatorProbe>> = match group {
        Group::Cosmos => vec![Box::new(CosmosClient::new(&config.cosmos)?)],
        #[cfg(feature = "mongo")]
        Group::Mongo => vec![Box::new(
            emulator_smoke_clients::mongo::MongoClient::connect(&config.mongo).await?,
        )],
        #[cfg(not(feature = "mongo"))]
        Group::Mongo => Vec::new(),
        Group::Storage => vec![
            Box::new(BlobServiceClient::new(&config.storage)?),
            Box::new(QueueServiceClient::new(&config.storage)?),
            Box::new(TableServiceClient::new(&config.storage)?),
        ],
        Group::ServiceBus => vec![Box::new(ServiceBusClient::new(&config.service_bus)?)],
    };
    Ok(probes)
}

// ============================================================================
// Cosmos DB
// ============================================================================

/// Database `testdb_<suffix>` with container `test_container` on `/id`
#[derive(Debug)]
pub struct CosmosFixture {
    pub client: CosmosClient,
    pub database: DatabaseClient,
    pub container: ContainerClient,
    cleanup: Cleanup,
}

impl CosmosFixture {
    pub async fn setup(config: &EmulatorConfig) -> Result<Self, FixtureError> {
        let client = CosmosClient::new(&config.cosmos)?;
        let database_id = ResourceKind::Database.generate("testdb_")?;
        let mut cleanup = Cleanup::new();

        let database = client.create_database_if_not_exists(&database_id).await?;
        {
            let client = client.clone();
            let id = database_id.clone();
            cleanup.push(format!("cosmos database {}", database_id), move || async move {
                client.delete_database(&id).await
            });
        }

        let container = match database
            .create_container_if_not_exists(
                COSMOS_CONTAINER_ID,
                COSMOS_PARTITION_KEY_PATH,
                Some(COSMOS_THROUGHPUT),
            )
            .await
        {
            Ok(container) => container,
            Err(e) => {
                cleanup.run().await;
                return Err(e.into());
            }
        };

        info!(database = %database_id, container = COSMOS_CONTAINER_ID, "Cosmos fixture ready");
        Ok(Self {
            client,
            database,
            container,
            cleanup,
        })
    }

    pub async fn teardown(self) -> CleanupReport {
        self.cleanup.run().await
    }
}

// ============================================================================
// Azurite storage
// ============================================================================

/// Blob container, queue and table, each uniquely named
#[derive(Debug)]
pub struct StorageFixture {
    pub blobs: BlobServiceClient,
    pub queues: QueueServiceClient,
    pub tables: TableServiceClient,
    pub container: BlobContainerClient,
    pub queue: QueueClient,
    pub table: TableClient,
    cleanup: Cleanup,
}

impl StorageFixture {
    pub async fn setup(config: &EmulatorConfig) -> Result<Self, FixtureError> {
        let blobs = BlobServiceClient::new(&config.storage)?;
        let queues = QueueServiceClient::new(&config.storage)?;
        let tables = TableServiceClient::new(&config.storage)?;

        let container_name = ResourceKind::BlobContainer.generate("testcontainer")?;
        let queue_name = ResourceKind::Queue.generate("testqueue")?;
        let table_name = ResourceKind::Table.generate("testtable")?;

        let mut cleanup = Cleanup::new();
        match Self::create_all(
            &blobs,
            &queues,
            &tables,
            [container_name.as_str(), queue_name.as_str(), table_name.as_str()],
            &mut cleanup,
        )
        .await
        {
            Ok((container, queue, table)) => {
                info!(
                    container = %container_name,
                    queue = %queue_name,
                    table = %table_name,
                    "Storage fixture ready"
                );
                Ok(Self {
                    blobs,
                    queues,
                    tables,
                    container,
                    queue,
                    table,
                    cleanup,
                })
            }
            Err(e) => {
                cleanup.run().await;
                Err(e.into())
            }
        }
    }

    async fn create_all(
        blobs: &BlobServiceClient,
        queues: &QueueServiceClient,
        tables: &TableServiceClient,
        [container_name, queue_name, table_name]: [&str; 3],
        cleanup: &mut Cleanup,
    ) -> Result<(BlobContainerClient, QueueClient, TableClient), ClientError> {
        let container = blobs.create_container(container_name).await?;
        {
            let blobs = blobs.clone();
            let name = container_name.to_string();
            cleanup.push(format!("blob container {}", container_name), move || async move {
                blobs.delete_container(&name).await
            });
        }

        let queue = queues.create_queue(queue_name).await?;
        {
            let queues = queues.clone();
            let name = queue_name.to_string();
            cleanup.push(format!("storage queue {}", queue_name), move || async move {
                queues.delete_queue(&name).await
            });
        }

        let table = tables.create_table(table_name).await?;
        {
            let tables = tables.clone();
            let name = table_name.to_string();
            cleanup.push(format!("table {}", table_name), move || async move {
                tables.delete_table(&name).await
            });
        }

        Ok((container, queue, table))
    }

    pub async fn teardown(self) -> CleanupReport {
        self.cleanup.run().await
    }
}

// ============================================================================
// Service Bus
// ============================================================================

/// Messages a fixture completes from a shared queue before handing it out
const DRAIN_LIMIT: usize = 100;

/// Wait per drain receive; an empty queue answers within it
const DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Client plus the configured queue
///
/// The emulator only serves queues declared in its own config, so the
/// queue is shared between runs rather than created here. Leftover
/// messages are completed during setup.
#[derive(Debug)]
pub struct ServiceBusFixture {
    pub client: ServiceBusClient,
    pub queue: String,
    /// Leftover messages completed during setup
    pub drained: usize,
    cleanup: Cleanup,
}

impl ServiceBusFixture {
    pub async fn setup(config: &EmulatorConfig) -> Result<Self, FixtureError> {
        let queue = config.service_bus.queue.clone();
        ResourceKind::BusQueue.validate(&queue)?;

        let client = ServiceBusClient::new(&config.service_bus)?;
        let mut cleanup = Cleanup::new();
        {
            let client = client.clone();
            cleanup.push("service bus client", move || async move {
                client.close().await;
                Ok(())
            });
        }

        let drained = match drain(&client, &queue).await {
            Ok(drained) => drained,
            Err(e) => {
                cleanup.run().await;
                return Err(e.into());
            }
        };
        if drained > 0 {
            warn!(queue = %queue, drained, "Completed leftover Service Bus messages");
        }

        info!(queue = %queue, "Service Bus fixture ready");
        Ok(Self {
            client,
            queue,
            drained,
            cleanup,
        })
    }

    pub async fn teardown(self) -> CleanupReport {
        self.cleanup.run().await
    }
}

/// Complete whatever an earlier run left in the queue
async fn drain(client: &ServiceBusClient, queue: &str) -> Result<usize, ClientError> {
    let receiver = client.receiver(queue);
    let result = async {
        let mut drained = 0;
        while drained < DRAIN_LIMIT {
            match receiver.receive(DRAIN_WAIT).await? {
                Some(message) => {
                    receiver.complete(&message).await?;
                    drained += 1;
                }
                None => break,
            }
        }
        Ok::<_, ClientError>(drained)
    }
    .await;
    receiver.close().await;
    result
}

// ============================================================================
// MongoDB API
// ============================================================================

#[cfg(feature = "mongo")]
pub use mongo_fixture::{MongoFixture, MONGO_COLLECTION};

#[cfg(feature = "mongo")]
mod mongo_fixture {
    use super::*;
    use emulator_smoke_clients::mongo::{MongoClient, MongoCollection};

    pub const MONGO_COLLECTION: &str = "test_collection";

    /// Database `testdb_<suffix>` with collection `test_collection`
    #[derive(Debug)]
    pub struct MongoFixture {
        pub client: MongoClient,
        pub database: String,
        pub collection: MongoCollection,
        cleanup: Cleanup,
    }

    impl MongoFixture {
        pub async fn setup(config: &EmulatorConfig) -> Result<Self, FixtureError> {
            let client = MongoClient::connect(&config.mongo).await?;
            let database = ResourceKind::Database.generate("testdb_")?;
            let collection = client.collection(&database, MONGO_COLLECTION);

            // Databases spring into existence on first write
            let mut cleanup = Cleanup::new();
            {
                let client = client.clone();
                let name = database.clone();
                cleanup.push(format!("mongo database {}", database), move || async move {
                    client.drop_database(&name).await
                });
            }

            info!(database = %database, collection = MONGO_COLLECTION, "Mongo fixture ready");
            Ok(Self {
                client,
                database,
                collection,
                cleanup,
            })
        }

        pub async fn teardown(self) -> CleanupReport {
            self.cleanup.run().await
        }
    }
}
