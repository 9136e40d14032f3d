use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use shared::types::ServiceRecord;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("invalid registration: {0}")]
    Validation(&'static str),
}

/// In-memory registry of monitored services.
///
/// Owns the canonical copy of every record. Readers always get clones, so a
/// snapshot never observes writes made after it was taken.
#[derive(Clone, Default)]
pub struct ServiceDirectory {
    services: Arc<RwLock<HashMap<String, ServiceRecord>>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any previous record (and its metrics) with the same id
    pub async fn register(&self, record: ServiceRecord) -> Result<(), DirectoryError> {
        if record.id.is_empty() {
            return Err(DirectoryError::Validation("id is required"));
        }
        if record.endpoint.is_empty() {
            return Err(DirectoryError::Validation("url is required"));
        }

        let id = record.id.clone();
        let mut services = self.services.write().await;
        if services.insert(id.clone(), record).is_some() {
            tracing::debug!("Replaced existing registration for {}", id);
        }
        Ok(())
    }

    /// Point-in-time copy of all records, in no particular order
    pub async fn list_snapshot(&self) -> Vec<ServiceRecord> {
        let services = self.services.read().await;
        services.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<ServiceRecord> {
        let services = self.services.read().await;
        services.get(id).cloned()
    }

    /// Publish the result of a check. Inserts the record if it is missing.
    pub async fn update(&self, record: ServiceRecord) {
        let mut services = self.services.write().await;
        services.insert(record.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }
}
