//! Cosmos DB native API scenarios

use super::{assert_passed_or_skipped, config};
use emulator_smoke_clients::CosmosClient;
use emulator_smoke_e2e::fixtures::{connect_or_skip, CosmosFixture};
use emulator_smoke_e2e::scenarios::{run_group, run_scenario, Group, Scenario, ScenarioOutcome};
use serde_json::json;

#[tokio::test]
async fn test_cosmos_group() {
    let config = config();
    let outcomes = run_group(Group::Cosmos, &config).await;
    assert_passed_or_skipped(&outcomes);
}

#[tokio::test]
async fn test_cosmos_crud_records_every_step() {
    let config = config();
    let outcome = run_scenario(Scenario::CosmosCrud, &config).await;
    if let ScenarioOutcome::Passed { report, .. } = &outcome {
        assert_eq!(
            report.step_names(),
            vec![
                "create item",
                "read item",
                "replace item",
                "read updated item",
                "delete item",
                "verify deleted",
            ]
        );
    } else {
        assert_passed_or_skipped(std::slice::from_ref(&outcome));
    }
}

/// A second create with the same id is a conflict, not an overwrite
#[tokio::test]
async fn test_cosmos_duplicate_item_conflicts() {
    let config = config();
    let client = CosmosClient::new(&config.cosmos).expect("Failed to build client");
    if connect_or_skip(client, Group::Cosmos, &config).await.is_none() {
        return;
    }

    let fixture = CosmosFixture::setup(&config).await.expect("Fixture setup failed");
    let item = json!({ "id": "duplicate_item", "name": "first" });
    let result = async {
        fixture.container.create_item(&item).await?;
        fixture.container.create_item(&item).await
    }
    .await;
    let report = fixture.teardown().await;

    let err = result.expect_err("second create should conflict");
    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert!(report.is_clean(), "{}", report);
}
