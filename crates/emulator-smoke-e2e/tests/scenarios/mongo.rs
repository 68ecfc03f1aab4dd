//! MongoDB API scenarios

use super::{assert_passed_or_skipped, config};
use emulator_smoke_e2e::scenarios::{run_group, Group};

#[tokio::test]
async fn test_mongo_group() {
    let config = config();
    let outcomes = run_group(Group::Mongo, &config).await;
    assert_passed_or_skipped(&outcomes);
}

#[cfg(not(feature = "mongo"))]
#[tokio::test]
async fn test_mongo_skipped_without_feature() {
    let outcomes = run_group(Group::Mongo, &config()).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_skipped());
    assert!(outcomes[0].to_string().contains("`mongo` feature"));
}

#[cfg(feature = "mongo")]
#[tokio::test]
async fn test_mongo_missing_document_is_none() {
    use emulator_smoke_e2e::fixtures::{connect_or_skip, MongoFixture};
    use emulator_smoke_clients::mongo::MongoClient;

    let config = config();
    let Ok(client) = MongoClient::connect(&config.mongo).await else {
        return;
    };
    if connect_or_skip(client, Group::Mongo, &config).await.is_none() {
        return;
    }

    let fixture = MongoFixture::setup(&config).await.expect("Fixture setup failed");
    let found = fixture.collection.find_by_id("no_such_item").await;
    let replaced = fixture
        .collection
        .replace("no_such_item", emulator_smoke_clients::mongo::bson::doc! { "name": "x" })
        .await;
    fixture.teardown().await;

    assert!(found.expect("find failed").is_none());
    assert!(replaced.expect_err("replace should miss").is_not_found());
}
