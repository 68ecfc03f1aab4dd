//! Azurite blob, queue and table scenarios

use super::{Recorder, Scenario, ScenarioError, ScenarioReport};
use crate::fixtures::{FixtureError, StorageFixture};
use crate::naming::ResourceKind;
use emulator_smoke_clients::{TableEntity, UpdateMode};
use serde_json::Value;
use std::time::Duration;

pub const TEST_BLOB: &str = "test_blob.txt";
pub const TEST_PARTITION: &str = "test-partition";

/// Lease held on a received queue message
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upload, download, overwrite, download, delete and verify one blob
pub async fn blob_crud(fixture: &StorageFixture) -> Result<ScenarioReport, ScenarioError> {
    let mut run = Recorder::new(Scenario::BlobCrud);
    let container = &fixture.container;

    let original = b"This is a test blob content";
    run.step("upload blob", container.upload(TEST_BLOB, original, false))
        .await?;
    let downloaded = run.step("download blob", container.download(TEST_BLOB)).await?;
    run.expect_eq("download blob", original.as_slice(), downloaded.as_slice())?;

    let updated = b"This is updated blob content";
    run.step("overwrite blob", container.upload(TEST_BLOB, updated, true))
        .await?;
    let downloaded = run
        .step("download updated blob", container.download(TEST_BLOB))
        .await?;
    run.expect_eq("download updated blob", updated.as_slice(), downloaded.as_slice())?;

    run.step("delete blob", container.delete(TEST_BLOB)).await?;
    run.verify_absent(
        "verify deleted",
        &format!("blob {}/{}", container.name(), TEST_BLOB),
        container.download(TEST_BLOB),
    )
    .await?;

    Ok(run.finish())
}

/// Send one message, receive exactly it, delete it, confirm the queue drained
pub async fn queue_send_receive(fixture: &StorageFixture) -> Result<ScenarioReport, ScenarioError> {
    let mut run = Recorder::new(Scenario::QueueSendReceive);
    let queue = &fixture.queue;
    let text = "Test queue message";

    run.step("send message", queue.send_message(text)).await?;

    let received = run
        .step("receive message", queue.receive_messages(1, VISIBILITY_TIMEOUT))
        .await?;
    run.expect_eq("receive message", 1, received.len())?;
    let message = &received[0];
    run.expect_eq("receive message", text, message.content.as_str())?;

    run.step("delete message", queue.delete_message(message)).await?;

    let remaining = run.step("peek after delete", queue.peek_messages(1)).await?;
    run.expect_eq("peek after delete", Vec::<String>::new(), remaining)?;

    Ok(run.finish())
}

fn property<'a>(entity: &'a TableEntity, name: &str) -> Option<&'a str> {
    entity.get(name).and_then(Value::as_str)
}

/// Insert, read, merge-update, read, delete and verify one entity
pub async fn table_crud(fixture: &StorageFixture) -> Result<ScenarioReport, ScenarioError> {
    let mut run = Recorder::new(Scenario::TableCrud);
    let table = &fixture.table;
    let row_key = ResourceKind::RowKey
        .generate("test-row-")
        .map_err(FixtureError::from)?;

    let entity = TableEntity::new(TEST_PARTITION, &row_key).with("TestProperty", "TestValue");
    run.step("create entity", table.create_entity(&entity)).await?;

    let read = run
        .step("get entity", table.get_entity(TEST_PARTITION, &row_key))
        .await?;
    run.expect_eq("get entity", Some("TestValue"), property(&read, "TestProperty"))?;

    let update = TableEntity::new(TEST_PARTITION, &row_key).with("TestProperty", "UpdatedValue");
    run.step("update entity", table.update_entity(&update, UpdateMode::Merge))
        .await?;

    let read = run
        .step("get updated entity", table.get_entity(TEST_PARTITION, &row_key))
        .await?;
    run.expect_eq(
        "get updated entity",
        Some("UpdatedValue"),
        property(&read, "TestProperty"),
    )?;

    run.step("delete entity", table.delete_entity(TEST_PARTITION, &row_key))
        .await?;
    run.verify_absent(
        "verify deleted",
        &format!("entity ({}, {})", TEST_PARTITION, row_key),
        table.get_entity(TEST_PARTITION, &row_key),
    )
    .await?;

    Ok(run.finish())
}
