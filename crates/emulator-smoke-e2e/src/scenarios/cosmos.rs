use super::{Recorder, Scenario, ScenarioError, ScenarioReport};
use crate::fixtures::CosmosFixture;
use crate::naming::ResourceKind;
use chrono::Utc;
use serde_json::{json, Value};

fn field<'a>(item: &'a Value, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str)
}

/// Create, read, replace, read, delete and verify one item
pub async fn cosmos_crud(fixture: &CosmosFixture) -> Result<ScenarioReport, ScenarioError> {
    let mut run = Recorder::new(Scenario::CosmosCrud);
    let container = &fixture.container;
    let item_id = ResourceKind::Item
        .generate("item_")
        .map_err(crate::fixtures::FixtureError::from)?;

    let item = json!({
        "id": item_id,
        "name": "Test Item",
        "description": "This is a test item",
        "created_at": Utc::now().to_rfc3339(),
    });
    let created = run.step("create item", container.create_item(&item)).await?;
    run.expect_eq("create item", Some(item_id.as_str()), field(&created, "id"))?;

    let read = run
        .step("read item", container.read_item(&item_id, &item_id))
        .await?;
    run.expect_eq("read item", Some("Test Item"), field(&read, "name"))?;

    let mut updated = read.clone();
    updated["name"] = json!("Updated Test Item");
    let replaced = run
        .step("replace item", container.replace_item(&item_id, &item_id, &updated))
        .await?;
    run.expect_eq("replace item", Some("Updated Test Item"), field(&replaced, "name"))?;

    let reread = run
        .step("read updated item", container.read_item(&item_id, &item_id))
        .await?;
    run.expect_eq("read updated item", Some("Updated Test Item"), field(&reread, "name"))?;

    run.step("delete item", container.delete_item(&item_id, &item_id))
        .await?;
    run.verify_absent(
        "verify deleted",
        &format!("item {}", item_id),
        container.read_item(&item_id, &item_id),
    )
    .await?;

    Ok(run.finish())
}
