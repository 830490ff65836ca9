use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl TryFrom<String> for RequestStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(RequestStatus::Pending),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "FAILED" => Ok(RequestStatus::Failed),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// Status of the downstream update stage that picks up completed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    NotApplicable,
    Pending,
    Completed,
    Failed,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::NotApplicable => "NOT_APPLICABLE",
            UpdateStatus::Pending => "PENDING",
            UpdateStatus::Completed => "COMPLETED",
            UpdateStatus::Failed => "FAILED",
        }
    }
}

impl TryFrom<String> for UpdateStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "NOT_APPLICABLE" => Ok(UpdateStatus::NotApplicable),
            "PENDING" => Ok(UpdateStatus::Pending),
            "COMPLETED" => Ok(UpdateStatus::Completed),
            "FAILED" => Ok(UpdateStatus::Failed),
            _ => Err(UnknownStatus(value)),
        }
    }
}

#[derive(Debug)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status value: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueEntry {
    pub registrant_id: String,
    pub number_of_attempts_request: i32,
    #[sqlx(rename = "id_generation_request_status", try_from = "String")]
    pub request_status: RequestStatus,
    #[sqlx(rename = "id_generation_update_status", try_from = "String")]
    pub update_status: UpdateStatus,
    pub last_attempt_datetime_request: Option<DateTime<Utc>>,
    pub last_attempt_error_code_request: Option<String>,
    #[serde(skip_serializing)]
    pub leased_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub leased_by: Option<Uuid>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// A freshly enqueued entry, as the external enqueuing process creates it.
    pub fn pending(registrant_id: impl Into<String>) -> Self {
        Self {
            registrant_id: registrant_id.into(),
            number_of_attempts_request: 0,
            request_status: RequestStatus::Pending,
            update_status: UpdateStatus::NotApplicable,
            last_attempt_datetime_request: None,
            last_attempt_error_code_request: None,
            leased_until: None,
            leased_by: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.number_of_attempts_request += 1;
        self.request_status = RequestStatus::Completed;
        self.update_status = UpdateStatus::Pending;
        self.last_attempt_datetime_request = Some(at);
        self.last_attempt_error_code_request = None;
    }

    /// Counts a failed attempt. The entry becomes `FAILED` once the attempt
    /// count reaches `max_attempts`, otherwise it stays `PENDING` for redelivery.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: String, max_attempts: i32) {
        self.number_of_attempts_request += 1;
        self.last_attempt_datetime_request = Some(at);
        self.last_attempt_error_code_request = Some(error);
        if self.number_of_attempts_request >= max_attempts {
            self.request_status = RequestStatus::Failed;
        }
    }
}
