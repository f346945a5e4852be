use std::sync::Arc;

use chrono::Utc;

use crate::{
    config::IdPolicy,
    database::{RecordStore, StorageError},
    models::accident::{Accident, AccidentId, CreatedAt},
};

/// All record mutations go through here. Nothing is locked: on the file store
/// every operation is a full load-modify-save cycle.
pub struct AccidentService {
    store: Arc<dyn RecordStore>,
    id_policy: IdPolicy,
    restore_target: Vec<Accident>,
}

impl AccidentService {
    pub fn new(store: Arc<dyn RecordStore>, id_policy: IdPolicy, restore_target: Vec<Accident>) -> Self {
        Self {
            store,
            id_policy,
            restore_target,
        }
    }

    pub async fn list(&self) -> Result<Vec<Accident>, StorageError> {
        self.store.load_all().await
    }

    /// Stores a new record, assigning `id` when absent and always stamping
    /// `createdAt`. Returns the record as stored.
    pub async fn create(&self, mut candidate: Accident) -> Result<Accident, StorageError> {
        let now = Utc::now();
        if candidate.id.as_ref().map_or(true, AccidentId::is_blank) {
            candidate.extra.remove("id");
            candidate.id = Some(self.id_policy.assign(now));
        }
        candidate.created_at = Some(CreatedAt::from(now));

        self.store.append(&candidate).await?;

        if let Some(id) = &candidate.id {
            log::info!("Stored accident {id} in the {} store", self.store.name());
        }
        Ok(candidate)
    }

    pub async fn restore_defaults(&self) -> Result<Vec<Accident>, StorageError> {
        self.replace_all(self.restore_target.clone()).await
    }

    /// Overwrites the whole collection with `records`.
    pub async fn replace_all(&self, records: Vec<Accident>) -> Result<Vec<Accident>, StorageError> {
        self.store.save_all(&records).await?;
        log::info!(
            "Replaced the {} collection with {} records",
            self.store.name(),
            records.len()
        );
        Ok(records)
    }

    pub async fn delete(&self, id: &AccidentId) -> Result<bool, StorageError> {
        let deleted = self.store.delete_by_id(id).await?;
        if deleted {
            log::info!("Deleted accident {id}");
        }
        Ok(deleted)
    }
}
