//! Persistence of the full accident collection.
//!
//! Every store reads and replaces the whole collection at once. There is no
//! locking: on stores without a native append, two callers that load, modify
//! and save concurrently race, and the last `save_all` wins.

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::{
    config::StoreConfig,
    models::accident::{Accident, AccidentId},
};

pub mod document;
pub mod file;

pub use document::DocumentRecordStore;
pub use file::FileRecordStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{location} does not hold a JSON array of records: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize records: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("document store error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("{operation} is not supported by the {store} store")]
    Unsupported {
        operation: &'static str,
        store: &'static str,
    },
}

impl StorageError {
    /// Stable reason code, suitable for logs and client-facing envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "STORAGE_IO_FAILED",
            Self::Corrupt { .. } => "STORAGE_CORRUPT",
            Self::Serialize(_) => "SERIALIZATION_FAILED",
            Self::Database(_) => "DATABASE_FAILED",
            Self::Unsupported { .. } => "OPERATION_UNSUPPORTED",
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Returns the whole collection in stored order. A missing backing
    /// store is an empty collection.
    async fn load_all(&self) -> Result<Vec<Accident>, StorageError>;

    /// Replaces the whole collection. Readers see either the old or the new
    /// collection, never a partial one.
    async fn save_all(&self, records: &[Accident]) -> Result<(), StorageError>;

    /// Adds one record at the end of the collection.
    async fn append(&self, record: &Accident) -> Result<(), StorageError> {
        let mut records = self.load_all().await?;
        records.push(record.clone());
        self.save_all(&records).await
    }

    /// Removes the record with the given id, returning whether one matched.
    async fn delete_by_id(&self, id: &AccidentId) -> Result<bool, StorageError> {
        log::debug!("Refusing to delete {id} from the {} store", self.name());
        Err(StorageError::Unsupported {
            operation: "delete_by_id",
            store: self.name(),
        })
    }
}

pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, StorageError> {
    match config {
        StoreConfig::File { path } => {
            log::info!("Using file store at {}", path.display());
            Ok(Arc::new(FileRecordStore::new(path.clone())))
        }
        StoreConfig::Mongo {
            uri,
            database,
            collection,
        } => {
            log::info!("Using document store {database}.{collection}");
            let store = DocumentRecordStore::connect(uri, database, collection).await?;
            Ok(Arc::new(store))
        }
    }
}
