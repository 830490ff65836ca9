//! Per-registrant ID generation request workflow.
//!
//! One invocation loads the queue entry, obtains an access token, asks the
//! identity authority for a UIN, assigns it to the registrant and records the
//! outcome on the queue entry. Processing failures never escape
//! [`WorkflowEngine::process`]; they are written to the queue entry so the
//! surrounding scheduler can redeliver the registrant while it is `PENDING`.
//! Only [`StorageError`] is returned, because bookkeeping itself needs storage.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::authority::{AuthorityError, IdentityAuthority};
use crate::config::Config;
use crate::models::{QueueEntry, RequestStatus};
use crate::store::{QueueEntryStore, RegistrantStore, StorageError, UniqueIdAssignment};
use crate::token::TokenProvider;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_attempts: i32,
    /// Bound on token acquisition plus the authority call.
    pub request_timeout: Duration,
    pub lease_duration: Duration,
    pub logger_name: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_request_attempts,
            request_timeout: config.request_timeout,
            lease_duration: config.lease_duration,
            logger_name: config.logger_name.clone(),
        }
    }
}

/// What an invocation persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No queue entry exists; nothing was written.
    NoQueueEntry,
    /// The entry was already COMPLETED or FAILED; nothing was written.
    AlreadyTerminal(RequestStatus),
    /// Another invocation holds the lease on this registrant; nothing was written.
    Busy,
    /// The lease expired and was taken over before the outcome could be
    /// recorded; the queue entry was left to the new holder.
    LeaseLost,
    Completed { unique_id: String },
    /// The registrant already held a UIN from an earlier, partially recorded run.
    Reconciled { unique_id: String },
    /// Failure recorded, entry left PENDING for redelivery.
    Retrying { attempts: i32, error: String },
    /// Failure recorded and the attempt threshold reached.
    Failed { attempts: i32, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessError {
    RegistrantNotFound(String),
    TokenUnavailable(String),
    Authority(AuthorityError),
    DuplicateIdentifier {
        unique_id: String,
        holder: Option<String>,
    },
    TimedOut(Duration),
    Cancelled,
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::RegistrantNotFound(id) => {
                write!(f, "No res_partner entry found for registrant_id: {id}")
            }
            ProcessError::TokenUnavailable(msg) => write!(f, "Access token unavailable: {msg}"),
            ProcessError::Authority(err) => write!(f, "{err}"),
            ProcessError::DuplicateIdentifier { unique_id, holder } => match holder {
                Some(holder) => write!(
                    f,
                    "MOSIP ID {unique_id} is already present in res_partner.unique_id (registrant {holder})"
                ),
                None => write!(
                    f,
                    "MOSIP ID {unique_id} is already present in res_partner.unique_id"
                ),
            },
            ProcessError::TimedOut(after) => {
                write!(f, "ID generation request timed out after {}s", after.as_secs())
            }
            ProcessError::Cancelled => write!(f, "ID generation request was cancelled"),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Failure of one step: either counted against the entry, or a storage fault.
enum StepError {
    Process(ProcessError),
    Storage(StorageError),
}

impl From<ProcessError> for StepError {
    fn from(err: ProcessError) -> Self {
        StepError::Process(err)
    }
}

impl From<StorageError> for StepError {
    fn from(err: StorageError) -> Self {
        StepError::Storage(err)
    }
}

struct Assignment {
    unique_id: String,
    reconciled: bool,
}

pub struct WorkflowEngine {
    queue: Arc<dyn QueueEntryStore>,
    registrants: Arc<dyn RegistrantStore>,
    tokens: Arc<dyn TokenProvider>,
    authority: Arc<dyn IdentityAuthority>,
    settings: EngineSettings,
    /// In-process serialization per registrant id.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkflowEngine {
    pub fn new(
        queue: Arc<dyn QueueEntryStore>,
        registrants: Arc<dyn RegistrantStore>,
        tokens: Arc<dyn TokenProvider>,
        authority: Arc<dyn IdentityAuthority>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            queue,
            registrants,
            tokens,
            authority,
            settings,
            locks: DashMap::new(),
        }
    }

    pub async fn process(&self, registrant_id: &str) -> Result<Outcome, StorageError> {
        self.process_with_cancel(registrant_id, None).await
    }

    /// Like [`process`](Self::process), but a `true` on `cancel` while the
    /// authority is being called ends the attempt as a counted failure.
    pub async fn process_with_cancel(
        &self,
        registrant_id: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, StorageError> {
        let holder = Uuid::now_v7();
        let span = tracing::info_span!(
            "id_generation_request",
            logger = %self.settings.logger_name,
            registrant_id = %registrant_id,
            invocation = %holder,
        );

        async {
            tracing::info!("Starting ID generation request for registrant_id: {registrant_id}");
            let outcome = self.serialized(registrant_id, holder, cancel).await;
            match &outcome {
                Ok(outcome) => tracing::info!(
                    ?outcome,
                    "Completed ID generation request for registrant_id: {registrant_id}"
                ),
                Err(e) => tracing::error!(
                    "Storage failure during ID generation request for registrant_id {registrant_id}: {e}"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn serialized(
        &self,
        registrant_id: &str,
        holder: Uuid,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, StorageError> {
        let lock = self
            .locks
            .entry(registrant_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock().await;

        let result = self.leased(registrant_id, holder, cancel).await;

        drop(guard);
        drop(lock);
        self.locks
            .remove_if(registrant_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn leased(
        &self,
        registrant_id: &str,
        holder: Uuid,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, StorageError> {
        let leased = self
            .queue
            .try_lease(registrant_id, holder, self.settings.lease_duration)
            .await?;

        if !leased {
            return match self.queue.find(registrant_id).await? {
                None => {
                    tracing::error!("No queue entry found for registrant_id: {registrant_id}");
                    Ok(Outcome::NoQueueEntry)
                }
                Some(_) => {
                    tracing::warn!(
                        "Queue entry for registrant_id {registrant_id} is leased by another worker"
                    );
                    Ok(Outcome::Busy)
                }
            };
        }

        let result = match self.queue.find(registrant_id).await {
            Ok(Some(entry)) => self.run(entry, holder, cancel).await,
            Ok(None) => {
                tracing::error!("No queue entry found for registrant_id: {registrant_id}");
                Ok(Outcome::NoQueueEntry)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.queue.release_lease(registrant_id, holder).await {
            tracing::warn!("Failed to release lease for registrant_id {registrant_id}: {e}");
        }

        result
    }

    async fn run(
        &self,
        mut entry: QueueEntry,
        holder: Uuid,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Outcome, StorageError> {
        if entry.request_status.is_terminal() {
            tracing::info!(
                status = ?entry.request_status,
                "Queue entry already terminal, skipping"
            );
            return Ok(Outcome::AlreadyTerminal(entry.request_status));
        }

        let attempt = self.assign(&entry.registrant_id, cancel).await;
        let now = Utc::now();

        match attempt {
            Ok(assignment) => {
                entry.record_success(now);
                if !self.commit(&entry, holder).await? {
                    return Ok(Outcome::LeaseLost);
                }
                tracing::info!(
                    unique_id = %assignment.unique_id,
                    "ID generation request completed for registrant_id: {}",
                    entry.registrant_id
                );
                Ok(if assignment.reconciled {
                    Outcome::Reconciled {
                        unique_id: assignment.unique_id,
                    }
                } else {
                    Outcome::Completed {
                        unique_id: assignment.unique_id,
                    }
                })
            }
            Err(StepError::Storage(e)) => Err(e),
            Err(StepError::Process(err)) => {
                let error = err.to_string();
                tracing::error!(
                    "Error during ID generation request for registrant_id {}: {error}",
                    entry.registrant_id
                );

                entry.record_failure(now, error.clone(), self.settings.max_attempts);
                if !self.commit(&entry, holder).await? {
                    return Ok(Outcome::LeaseLost);
                }

                let attempts = entry.number_of_attempts_request;
                if entry.request_status == RequestStatus::Failed {
                    tracing::warn!(
                        attempts,
                        max_attempts = self.settings.max_attempts,
                        "Attempt threshold reached, marking request FAILED"
                    );
                    Ok(Outcome::Failed { attempts, error })
                } else {
                    Ok(Outcome::Retrying { attempts, error })
                }
            }
        }
    }

    /// Write the bookkeeping fenced on `holder`. False when the lease was lost.
    async fn commit(&self, entry: &QueueEntry, holder: Uuid) -> Result<bool, StorageError> {
        match self.queue.save(entry, holder).await {
            Ok(()) => Ok(true),
            Err(StorageError::LeaseLost(msg)) => {
                tracing::warn!(
                    "Outcome for registrant_id {} not recorded: {msg}",
                    entry.registrant_id
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn assign(
        &self,
        registrant_id: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Assignment, StepError> {
        let registrant = self
            .registrants
            .find(registrant_id)
            .await?
            .ok_or_else(|| ProcessError::RegistrantNotFound(registrant_id.to_string()))?;

        // A previous run assigned the UIN but crashed before recording it.
        if let Some(unique_id) = registrant.unique_id.clone() {
            tracing::info!(
                unique_id = %unique_id,
                "Registrant already holds a UIN, completing without calling the authority"
            );
            return Ok(Assignment {
                unique_id,
                reconciled: true,
            });
        }

        let unique_id = self.fetch_remote(cancel).await?;
        tracing::info!(unique_id = %unique_id, "Received UIN from authority");

        if let Some(existing) = self.registrants.find_by_unique_id(&unique_id).await? {
            if existing.id != registrant.id {
                return Err(ProcessError::DuplicateIdentifier {
                    unique_id,
                    holder: Some(existing.id),
                }
                .into());
            }
        }

        match self
            .registrants
            .assign_unique_id(&registrant.id, &unique_id)
            .await
        {
            Ok(UniqueIdAssignment::Assigned) => Ok(Assignment {
                unique_id,
                reconciled: false,
            }),
            Ok(UniqueIdAssignment::AlreadyAssigned(held)) => {
                tracing::warn!(
                    unique_id = %held,
                    discarded = %unique_id,
                    "Registrant was assigned a UIN concurrently, keeping the existing one"
                );
                let reconciled = held != unique_id;
                Ok(Assignment {
                    unique_id: held,
                    reconciled,
                })
            }
            Err(StorageError::Conflict(_)) => Err(ProcessError::DuplicateIdentifier {
                unique_id,
                holder: None,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_remote(
        &self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<String, ProcessError> {
        let remote = async {
            let token = self
                .tokens
                .access_token()
                .await
                .map_err(|e| ProcessError::TokenUnavailable(e.message))?;
            if token.is_empty() {
                return Err(ProcessError::TokenUnavailable(
                    "Failed to retrieve access token from token response".to_string(),
                ));
            }
            tracing::info!("Received access token");

            self.authority
                .fetch_identifier(&token)
                .await
                .map_err(ProcessError::Authority)
        };

        let timeout = self.settings.request_timeout;
        let bounded = async {
            tokio::time::timeout(timeout, remote)
                .await
                .unwrap_or(Err(ProcessError::TimedOut(timeout)))
        };

        match cancel {
            Some(mut cancel) => tokio::select! {
                result = bounded => result,
                _ = cancelled(&mut cancel) => Err(ProcessError::Cancelled),
            },
            None => bounded.await,
        }
    }
}

/// Resolves once `true` is observed. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
