use chrono::{DateTime, Utc};

use super::domain::{
    Category, ClientFiscalStatus, ClientId, Consultation, ConsultationId, ExecutionLogEntry,
};

/// Storage abstraction for consultations, the per-client roll-up, and the execution log.
///
/// `latest` must return the most recently inserted consultation for the pair, whatever
/// its status; the aggregator relies on that ordering.
pub trait ConsultationStore: Send + Sync {
    fn insert(&self, consultation: Consultation) -> Result<Consultation, StoreError>;
    /// Replaces the stored row. A row already `done` or `failed` is never overwritten:
    /// implementations answer `StoreError::Finalized` instead.
    fn update(&self, consultation: &Consultation) -> Result<(), StoreError>;
    fn fetch(&self, id: ConsultationId) -> Result<Option<Consultation>, StoreError>;
    fn latest(
        &self,
        client_id: &ClientId,
        category: Category,
    ) -> Result<Option<Consultation>, StoreError>;
    /// Newest first.
    fn recent(&self, limit: usize) -> Result<Vec<Consultation>, StoreError>;
    /// Consultations still `running` that were created before `cutoff`.
    fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Consultation>, StoreError>;
    fn save_client_status(&self, status: ClientFiscalStatus) -> Result<(), StoreError>;
    fn client_status(&self, client_id: &ClientId)
        -> Result<Option<ClientFiscalStatus>, StoreError>;
    fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;
    fn logs_for(&self, id: ConsultationId) -> Result<Vec<ExecutionLogEntry>, StoreError>;
    /// Drops every consultation and log entry; returns how many consultations were removed.
    fn clear_history(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record already reached a terminal state")]
    Finalized,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Time source for consultation timestamps and the stale sweep.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
