//! Service Bus emulator scenarios

use super::{assert_passed_or_skipped, config};
use emulator_smoke_clients::{ServiceBusClient, ServiceBusMessage};
use emulator_smoke_e2e::fixtures::{connect_or_skip, ServiceBusFixture};
use emulator_smoke_e2e::scenarios::{run_group, Group};
use std::time::Duration;

#[tokio::test]
async fn test_service_bus_group() {
    let config = config();
    let outcomes = run_group(Group::ServiceBus, &config).await;
    assert_passed_or_skipped(&outcomes);
}

/// An abandoned message comes back with a higher delivery count
#[tokio::test]
async fn test_abandoned_message_is_redelivered() {
    let config = config();
    let client = ServiceBusClient::new(&config.service_bus).expect("Failed to build client");
    if connect_or_skip(client, Group::ServiceBus, &config).await.is_none() {
        return;
    }

    let fixture = ServiceBusFixture::setup(&config).await.expect("Fixture setup failed");
    let sender = fixture.client.sender(&fixture.queue);
    let receiver = fixture.client.receiver(&fixture.queue);

    let result = async {
        sender.send(&ServiceBusMessage::new("redeliver me")).await?;
        let first = receiver.receive(config.receive_wait).await?;
        if let Some(first) = &first {
            receiver.abandon(first).await?;
        }
        let second = receiver.receive(config.receive_wait).await?;
        if let Some(second) = &second {
            receiver.complete(second).await?;
        }
        Ok::<_, emulator_smoke_clients::ClientError>((first, second))
    }
    .await;
    sender.close().await;
    receiver.close().await;
    let report = fixture.teardown().await;

    let (first, second) = result.expect("Service Bus round trip failed");
    let first = first.expect("first receive returned nothing");
    let second = second.expect("abandoned message was not redelivered");
    assert_eq!(second.body_text().unwrap(), "redeliver me");
    assert!(second.delivery_count > first.delivery_count);
    assert!(report.is_clean(), "{}", report);
}

#[tokio::test]
async fn test_receive_on_empty_queue_returns_none() {
    let config = config();
    let client = ServiceBusClient::new(&config.service_bus).expect("Failed to build client");
    if connect_or_skip(client, Group::ServiceBus, &config).await.is_none() {
        return;
    }

    let fixture = ServiceBusFixture::setup(&config).await.expect("Fixture setup failed");
    let receiver = fixture.client.receiver(&fixture.queue);
    let received = receiver.receive(Duration::from_secs(1)).await;
    receiver.close().await;
    let report = fixture.teardown().await;

    // Setup completed whatever earlier runs left behind
    assert!(received.expect("receive failed").is_none());
    assert!(report.is_clean(), "{}", report);
}
