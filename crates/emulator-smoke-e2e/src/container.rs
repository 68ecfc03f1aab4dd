//! Disposable Azurite container for storage tests
//!
//! Uses testcontainers to run Azurite on random host ports, so storage
//! scenarios can run without a preinstalled emulator.

use emulator_smoke_clients::config::{AZURITE_ACCOUNT, AZURITE_KEY};
use emulator_smoke_clients::{ConfigError, StorageSettings};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt, TestcontainersError};
use tracing::info;

pub const BLOB_PORT: u16 = 10000;
pub const QUEUE_PORT: u16 = 10001;
pub const TABLE_PORT: u16 = 10002;

/// A running Azurite container
pub struct TestAzurite {
    container: testcontainers::ContainerAsync<GenericImage>,
    pub blob_port: u16,
    pub queue_port: u16,
    pub table_port: u16,
}

impl TestAzurite {
    /// Start Azurite with blob, queue and table listening on all interfaces
    pub async fn start() -> Result<Self, TestcontainersError> {
        let image_name = crate::azurite_image();
        let (image, tag) = image_name
            .rsplit_once(':')
            .unwrap_or((&image_name, "latest"));

        // GenericImage methods first, then ContainerRequest methods
        let image = GenericImage::new(image, tag)
            .with_exposed_port(ContainerPort::Tcp(BLOB_PORT))
            .with_exposed_port(ContainerPort::Tcp(QUEUE_PORT))
            .with_exposed_port(ContainerPort::Tcp(TABLE_PORT))
            .with_wait_for(WaitFor::message_on_stdout(
                "Azurite Blob service is successfully listening",
            ));

        let container = image
            .with_cmd(vec![
                "azurite",
                "--blobHost",
                "0.0.0.0",
                "--queueHost",
                "0.0.0.0",
                "--tableHost",
                "0.0.0.0",
                "--skipApiVersionCheck",
                "--loose",
            ])
            .start()
            .await?;

        let blob_port = container.get_host_port_ipv4(BLOB_PORT).await?;
        let queue_port = container.get_host_port_ipv4(QUEUE_PORT).await?;
        let table_port = container.get_host_port_ipv4(TABLE_PORT).await?;
        info!(blob_port, queue_port, table_port, "Azurite container started");

        Ok(Self {
            container,
            blob_port,
            queue_port,
            table_port,
        })
    }

    /// Connection string pointing at the mapped ports
    pub fn connection_string(&self) -> String {
        format!(
            "DefaultEndpointsProtocol=http;AccountName={account};AccountKey={key};\
BlobEndpoint=http://127.0.0.1:{blob}/{account};\
QueueEndpoint=http://127.0.0.1:{queue}/{account};\
TableEndpoint=http://127.0.0.1:{table}/{account};",
            account = AZURITE_ACCOUNT,
            key = AZURITE_KEY,
            blob = self.blob_port,
            queue = self.queue_port,
            table = self.table_port,
        )
    }

    pub fn storage_settings(&self) -> Result<StorageSettings, ConfigError> {
        StorageSettings::from_connection_string(&self.connection_string())
    }

    /// Stop the container
    pub async fn stop(self) -> Result<(), TestcontainersError> {
        self.container.stop().await
    }
}
