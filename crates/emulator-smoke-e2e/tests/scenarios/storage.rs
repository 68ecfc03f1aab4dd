//! Azurite blob, queue and table scenarios

use super::{assert_passed_or_skipped, config};
use emulator_smoke_clients::{BlobServiceClient, EmulatorConfig};
use emulator_smoke_e2e::container::TestAzurite;
use emulator_smoke_e2e::fixtures::{connect_or_skip, StorageFixture};
use emulator_smoke_e2e::scenarios::{run_group, Group, ScenarioOutcome};

#[tokio::test]
async fn test_storage_group() {
    let config = config();
    let outcomes = run_group(Group::Storage, &config).await;
    assert_eq!(outcomes.len(), 3);
    assert_passed_or_skipped(&outcomes);
}

#[tokio::test]
async fn test_blob_upload_without_overwrite_conflicts() {
    let config = config();
    let blobs = BlobServiceClient::new(&config.storage).expect("Failed to build client");
    if connect_or_skip(blobs, Group::Storage, &config).await.is_none() {
        return;
    }

    let fixture = StorageFixture::setup(&config).await.expect("Fixture setup failed");
    let result = async {
        fixture.container.upload("once.txt", b"first", false).await?;
        fixture.container.upload("once.txt", b"second", false).await
    }
    .await;
    let content = fixture.container.download("once.txt").await;
    let report = fixture.teardown().await;

    let err = result.expect_err("second upload should conflict");
    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert_eq!(content.expect("download failed"), b"first".to_vec());
    assert!(report.is_clean(), "{}", report);
}

#[tokio::test]
async fn test_storage_teardown_removes_resources() {
    let config = config();
    let blobs = BlobServiceClient::new(&config.storage).expect("Failed to build client");
    let Some(blobs) = connect_or_skip(blobs, Group::Storage, &config).await else {
        return;
    };

    let fixture = StorageFixture::setup(&config).await.expect("Fixture setup failed");
    let container = fixture.container.name().to_string();
    let report = fixture.teardown().await;
    assert_eq!(report.attempted, 3);
    assert!(report.is_clean(), "{}", report);

    let err = blobs
        .container(&container)
        .download("anything")
        .await
        .expect_err("container should be gone");
    assert!(err.is_not_found(), "unexpected error: {}", err);
}

/// Runs the storage group against a throwaway Azurite container
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_storage_group_in_container() {
    let azurite = TestAzurite::start().await.expect("Failed to start Azurite");
    let config = EmulatorConfig {
        storage: azurite.storage_settings().expect("Invalid storage settings"),
        ..config()
    };

    let outcomes = run_group(Group::Storage, &config).await;
    azurite.stop().await.expect("Failed to stop Azurite");

    for outcome in &outcomes {
        assert!(
            matches!(outcome, ScenarioOutcome::Passed { .. }),
            "expected pass: {}",
            outcome
        );
    }
}
