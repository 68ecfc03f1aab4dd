//! MongoDB API scenario, built with the `mongo` feature

#[cfg(feature = "mongo")]
pub use imp::mongo_crud;

#[cfg(feature = "mongo")]
mod imp {
    use super::super::{Recorder, Scenario, ScenarioError, ScenarioReport};
    use crate::fixtures::{FixtureError, MongoFixture};
    use crate::naming::ResourceKind;
    use chrono::Utc;
    use emulator_smoke_clients::mongo::bson::{doc, Document};

    /// Test document stamped with the current time
    pub(super) fn item_document(id: &str, name: &str) -> Document {
        doc! {
            "_id": id,
            "name": name,
            "description": "This is a test item",
            "created_at": Utc::now().to_rfc3339(),
        }
    }

    fn name(document: &Document) -> Option<&str> {
        document.get_str("name").ok()
    }

    /// Insert, find, replace, find, delete and verify one document
    pub async fn mongo_crud(fixture: &MongoFixture) -> Result<ScenarioReport, ScenarioError> {
        let mut run = Recorder::new(Scenario::MongoCrud);
        let collection = &fixture.collection;
        let id = ResourceKind::Item
            .generate("item_")
            .map_err(FixtureError::from)?;

        run.step(
            "insert document",
            collection.insert(item_document(&id, "Test Item")),
        )
        .await?;

        let found = run.step("find document", collection.find_by_id(&id)).await?;
        run.expect_eq("find document", Some("Test Item"), found.as_ref().and_then(name))?;

        run.step(
            "replace document",
            collection.replace(&id, item_document(&id, "Updated Test Item")),
        )
        .await?;

        let found = run
            .step("find updated document", collection.find_by_id(&id))
            .await?;
        run.expect_eq(
            "find updated document",
            Some("Updated Test Item"),
            found.as_ref().and_then(name),
        )?;

        let deleted = run.step("delete document", collection.delete(&id)).await?;
        run.expect_eq("delete document", 1, deleted)?;

        let resource = format!("document {}/{}", collection.name(), id);
        let leftover = run
            .step("verify deleted", collection.find_by_id(&id))
            .await?;
        if leftover.is_some() {
            return Err(ScenarioError::StillPresent {
                step: "verify deleted",
                resource,
            });
        }

        Ok(run.finish())
    }
}
