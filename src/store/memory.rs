use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{QueueEntryStore, RegistrantStore, StorageError, UniqueIdAssignment};
use crate::models::{QueueEntry, Registrant};

/// In-process store backing both traits. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    queue: Arc<DashMap<String, QueueEntry>>,
    registrants: Arc<DashMap<String, Registrant>>,
    /// unique_id -> registrant id
    unique_ids: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_queue_entry(&self, entry: QueueEntry) {
        self.queue.insert(entry.registrant_id.clone(), entry);
    }

    /// Seed a registrant. An already-held `unique_id` is reassigned to it.
    pub fn insert_registrant(&self, registrant: Registrant) {
        if let Some(uid) = &registrant.unique_id {
            self.unique_ids.insert(uid.clone(), registrant.id.clone());
        }
        self.registrants.insert(registrant.id.clone(), registrant);
    }

    pub fn queue_entry(&self, registrant_id: &str) -> Option<QueueEntry> {
        self.queue.get(registrant_id).map(|e| e.value().clone())
    }

    pub fn registrant(&self, id: &str) -> Option<Registrant> {
        self.registrants.get(id).map(|r| r.value().clone())
    }

    /// All registrants currently holding `unique_id`.
    pub fn holders_of(&self, unique_id: &str) -> Vec<String> {
        self.registrants
            .iter()
            .filter(|r| r.unique_id.as_deref() == Some(unique_id))
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl QueueEntryStore for MemoryStore {
    async fn find(&self, registrant_id: &str) -> Result<Option<QueueEntry>, StorageError> {
        Ok(self.queue_entry(registrant_id))
    }

    async fn save(&self, entry: &QueueEntry, holder: Uuid) -> Result<(), StorageError> {
        let mut stored = self.queue.get_mut(&entry.registrant_id).ok_or_else(|| {
            StorageError::Missing(format!("queue entry for registrant {}", entry.registrant_id))
        })?;
        if stored.leased_by != Some(holder) {
            return Err(StorageError::LeaseLost(format!(
                "queue entry for registrant {} is no longer leased by {holder}",
                entry.registrant_id
            )));
        }
        let leased_until = stored.leased_until;
        let leased_by = stored.leased_by;
        *stored = QueueEntry {
            leased_until,
            leased_by,
            ..entry.clone()
        };
        Ok(())
    }

    async fn try_lease(
        &self,
        registrant_id: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let Some(mut entry) = self.queue.get_mut(registrant_id) else {
            return Ok(false);
        };

        let now = Utc::now();
        let live = entry.leased_until.is_some_and(|until| until >= now);
        if live && entry.leased_by != Some(holder) {
            return Ok(false);
        }

        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        entry.leased_by = Some(holder);
        entry.leased_until = now.checked_add_signed(ttl);
        Ok(true)
    }

    async fn release_lease(&self, registrant_id: &str, holder: Uuid) -> Result<(), StorageError> {
        if let Some(mut entry) = self.queue.get_mut(registrant_id) {
            if entry.leased_by == Some(holder) {
                entry.leased_by = None;
                entry.leased_until = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrantStore for MemoryStore {
    async fn find(&self, id: &str) -> Result<Option<Registrant>, StorageError> {
        Ok(self.registrant(id))
    }

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Registrant>, StorageError> {
        let Some(holder) = self.unique_ids.get(unique_id).map(|h| h.value().clone()) else {
            return Ok(None);
        };
        Ok(self.registrant(&holder))
    }

    async fn assign_unique_id(
        &self,
        id: &str,
        unique_id: &str,
    ) -> Result<UniqueIdAssignment, StorageError> {
        let mut registrant = self
            .registrants
            .get_mut(id)
            .ok_or_else(|| StorageError::Missing(format!("registrant {id}")))?;
        if let Some(held) = &registrant.unique_id {
            return Ok(UniqueIdAssignment::AlreadyAssigned(held.clone()));
        }

        match self.unique_ids.entry(unique_id.to_string()) {
            Entry::Occupied(held) => {
                return Err(StorageError::Conflict(format!(
                    "unique_id {unique_id} is held by registrant {}",
                    held.get()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(id.to_string());
            }
        }

        registrant.unique_id = Some(unique_id.to_string());
        Ok(UniqueIdAssignment::Assigned)
    }
}
