use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::FindOptions,
    Client, Collection,
};
use uuid::Uuid;

use super::{RecordStore, StorageError};
use crate::models::accident::{Accident, AccidentId};

/// Keeps one MongoDB document per accident. Reads come back ordered by
/// `createdAt` with the internal `_id` stripped.
///
/// `save_all` fills a staging collection and renames it over the live one,
/// so a failed write leaves the previous collection in place.
#[derive(Debug, Clone)]
pub struct DocumentRecordStore {
    client: Client,
    collection: Collection<Accident>,
}

impl DocumentRecordStore {
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(uri).await?;
        let collection = client.database(database).collection::<Accident>(collection);

        Ok(Self { client, collection })
    }

    async fn replace_with_staged(
        &self,
        staging_name: &str,
        records: &[Accident],
    ) -> Result<(), mongodb::error::Error> {
        let namespace = self.collection.namespace();
        let database = self.client.database(&namespace.db);

        database.create_collection(staging_name, None).await?;
        if !records.is_empty() {
            database
                .collection::<Accident>(staging_name)
                .insert_many(records, None)
                .await?;
        }

        let command = doc! {
            "renameCollection": format!("{}.{}", namespace.db, staging_name),
            "to": format!("{}.{}", namespace.db, namespace.coll),
            "dropTarget": true,
        };
        self.client.database("admin").run_command(command, None).await?;
        Ok(())
    }
}

fn id_filter(id: &AccidentId) -> Document {
    let mut candidates = vec![Bson::String(id.to_string())];
    if let Ok(number) = id.to_string().parse::<i64>() {
        candidates.push(Bson::Int64(number));
    }
    doc! { "id": { "$in": candidates } }
}

#[async_trait]
impl RecordStore for DocumentRecordStore {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn load_all(&self) -> Result<Vec<Accident>, StorageError> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": 1 })
            .projection(doc! { "_id": 0 })
            .build();

        let cursor = self.collection.find(None, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn save_all(&self, records: &[Accident]) -> Result<(), StorageError> {
        let staging_name = format!(
            "{}.staging.{}",
            self.collection.name(),
            Uuid::new_v4().simple()
        );

        if let Err(error) = self.replace_with_staged(&staging_name, records).await {
            let staging = self
                .client
                .database(&self.collection.namespace().db)
                .collection::<Accident>(&staging_name);
            if let Err(cleanup) = staging.drop(None).await {
                log::warn!("Failed to drop staging collection {staging_name}: {cleanup}");
            }
            return Err(error.into());
        }
        Ok(())
    }

    async fn append(&self, record: &Accident) -> Result<(), StorageError> {
        self.collection.insert_one(record, None).await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &AccidentId) -> Result<bool, StorageError> {
        let result = self.collection.delete_one(id_filter(id), None).await?;
        Ok(result.deleted_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::accident::CreatedAt;

    #[test]
    fn numeric_ids_match_both_stored_shapes() {
        let filter = id_filter(&AccidentId::Int(1718));

        assert_eq!(
            filter,
            doc! { "id": { "$in": [Bson::String("1718".to_string()), Bson::Int64(1718)] } }
        );
    }

    #[test]
    fn text_ids_match_only_text() {
        let filter = id_filter(&AccidentId::Text("a9f".to_string()));

        assert_eq!(filter, doc! { "id": { "$in": ["a9f"] } });
    }

    /// Opens a throwaway collection on the server named by `MONGODB_TEST_URI`,
    /// or returns `None` so the test is skipped when no server is configured.
    async fn scratch_store(name: &str) -> Option<DocumentRecordStore> {
        let Ok(uri) = std::env::var("MONGODB_TEST_URI") else {
            eprintln!("MONGODB_TEST_URI is not set, skipping {name}");
            return None;
        };
        let collection = format!("accidents_{name}_{}", Uuid::new_v4().simple());

        Some(
            DocumentRecordStore::connect(&uri, "incident_map_test", &collection)
                .await
                .unwrap(),
        )
    }

    fn record(id: AccidentId, created_at: &str) -> Accident {
        Accident {
            id: Some(id),
            nombre: Some("Deslave".to_string()),
            created_at: Some(CreatedAt::Iso(created_at.to_string())),
            ..Accident::default()
        }
    }

    fn ids(records: &[Accident]) -> Vec<String> {
        records
            .iter()
            .filter_map(|record| record.id.as_ref().map(ToString::to_string))
            .collect()
    }

    #[actix_web::test]
    async fn loads_in_created_at_order_without_internal_ids() {
        let Some(store) = scratch_store("ordered").await else {
            return;
        };
        assert!(store.load_all().await.unwrap().is_empty());

        store
            .save_all(&[
                record(AccidentId::Int(1), "2024-01-03T00:00:00.000Z"),
                record(AccidentId::Int(2), "2024-01-01T00:00:00.000Z"),
                record(AccidentId::Int(3), "2024-01-02T00:00:00.000Z"),
            ])
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(ids(&loaded), ["2", "3", "1"]);
        assert!(loaded.iter().all(|record| !record.extra.contains_key("_id")));

        store.collection.drop(None).await.unwrap();
    }

    #[actix_web::test]
    async fn save_all_replaces_the_whole_collection() {
        let Some(store) = scratch_store("replace").await else {
            return;
        };
        let first = [
            record(AccidentId::Int(1), "2024-01-01T00:00:00.000Z"),
            record(AccidentId::Int(2), "2024-01-02T00:00:00.000Z"),
        ];
        store.save_all(&first).await.unwrap();

        store
            .save_all(&[record(AccidentId::Text("c".to_string()), "2024-01-03T00:00:00.000Z")])
            .await
            .unwrap();
        assert_eq!(ids(&store.load_all().await.unwrap()), ["c"]);

        store.save_all(&[]).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        store.collection.drop(None).await.unwrap();
    }

    #[actix_web::test]
    async fn append_adds_one_record() {
        let Some(store) = scratch_store("append").await else {
            return;
        };
        store
            .save_all(&[record(AccidentId::Int(1), "2024-01-01T00:00:00.000Z")])
            .await
            .unwrap();

        store
            .append(&record(AccidentId::Int(2), "2024-01-02T00:00:00.000Z"))
            .await
            .unwrap();

        assert_eq!(ids(&store.load_all().await.unwrap()), ["1", "2"]);
        store.collection.drop(None).await.unwrap();
    }

    #[actix_web::test]
    async fn delete_by_id_reports_whether_a_record_matched() {
        let Some(store) = scratch_store("delete").await else {
            return;
        };
        store
            .save_all(&[
                record(AccidentId::Int(1), "2024-01-01T00:00:00.000Z"),
                record(AccidentId::Text("7".to_string()), "2024-01-02T00:00:00.000Z"),
            ])
            .await
            .unwrap();

        assert!(store.delete_by_id(&AccidentId::Int(1)).await.unwrap());
        assert!(!store.delete_by_id(&AccidentId::Int(1)).await.unwrap());
        assert!(store.delete_by_id(&AccidentId::from_path("7")).await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());

        store.collection.drop(None).await.unwrap();
    }
}
