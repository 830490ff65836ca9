use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{QueueEntryStore, RegistrantStore, StorageError, UniqueIdAssignment};
use crate::db;
use crate::models::{QueueEntry, Registrant};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueEntryStore for PgStore {
    async fn find(&self, registrant_id: &str) -> Result<Option<QueueEntry>, StorageError> {
        Ok(db::queue_entries::find_by_registrant(&self.pool, registrant_id).await?)
    }

    async fn save(&self, entry: &QueueEntry, holder: Uuid) -> Result<(), StorageError> {
        let updated = db::queue_entries::update_request_state(&self.pool, entry, holder).await?;
        if updated > 0 {
            return Ok(());
        }
        match db::queue_entries::find_by_registrant(&self.pool, &entry.registrant_id).await? {
            Some(_) => Err(StorageError::LeaseLost(format!(
                "queue entry for registrant {} is no longer leased by {holder}",
                entry.registrant_id
            ))),
            None => Err(StorageError::Missing(format!(
                "queue entry for registrant {}",
                entry.registrant_id
            ))),
        }
    }

    async fn try_lease(
        &self,
        registrant_id: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        Ok(db::queue_entries::try_lease(&self.pool, registrant_id, holder, ttl).await?)
    }

    async fn release_lease(&self, registrant_id: &str, holder: Uuid) -> Result<(), StorageError> {
        Ok(db::queue_entries::release_lease(&self.pool, registrant_id, holder).await?)
    }
}

#[async_trait]
impl RegistrantStore for PgStore {
    async fn find(&self, id: &str) -> Result<Option<Registrant>, StorageError> {
        Ok(db::registrants::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Registrant>, StorageError> {
        Ok(db::registrants::find_by_unique_id(&self.pool, unique_id).await?)
    }

    async fn assign_unique_id(
        &self,
        id: &str,
        unique_id: &str,
    ) -> Result<UniqueIdAssignment, StorageError> {
        if db::registrants::assign_unique_id(&self.pool, id, unique_id).await? > 0 {
            return Ok(UniqueIdAssignment::Assigned);
        }
        let registrant = db::registrants::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StorageError::Missing(format!("registrant {id}")))?;
        match registrant.unique_id {
            Some(held) => Ok(UniqueIdAssignment::AlreadyAssigned(held)),
            None => Err(StorageError::Conflict(format!(
                "unique_id of registrant {id} changed during assignment"
            ))),
        }
    }
}
