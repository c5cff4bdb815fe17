use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::batch::{
    plan, BatchConfig, BatchCoordinator, BatchProgress, BatchReport, CancellationFlag,
};
use super::cnpj;
use super::domain::{Category, Client, ClientFiscalStatus, ClientId, ConsultationId};
use super::provider::LookupProvider;
use super::runner::{ConsultationError, ConsultationRunner};
use super::store::{ConsultationStore, StoreError};
use super::views::{ConsultationDetail, ConsultationOutcome, ConsultationSummary, ConsultationView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Running,
    Finished,
}

/// What callers see of the current (or last) batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub phase: BatchPhase,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub progress: BatchProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

struct BatchSlot {
    snapshot: BatchSnapshot,
    cancel: CancellationFlag,
}

/// Facade wiring the runner, aggregator, and batch coordinator for the HTTP and CLI layers.
pub struct FiscalMonitorService<S, P> {
    runner: Arc<ConsultationRunner<S, P>>,
    coordinator: Arc<BatchCoordinator<S, P>>,
    batch: Arc<Mutex<Option<BatchSlot>>>,
}

impl<S, P> FiscalMonitorService<S, P>
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    pub fn new(runner: ConsultationRunner<S, P>, batch_config: BatchConfig) -> Self {
        let runner = Arc::new(runner);
        let coordinator = Arc::new(BatchCoordinator::new(Arc::clone(&runner), batch_config));
        Self {
            runner,
            coordinator,
            batch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn runner(&self) -> &ConsultationRunner<S, P> {
        &self.runner
    }

    pub fn coordinator(&self) -> &BatchCoordinator<S, P> {
        &self.coordinator
    }

    /// Runs one consultation and returns it with the client's recomputed standing.
    pub async fn consult(
        &self,
        client: &Client,
        category: Category,
    ) -> Result<ConsultationOutcome, ServiceError> {
        ensure_valid_cnpj(client)?;
        let consultation = self.runner.run(client, category).await?;
        let client_status = self
            .runner
            .store()
            .client_status(&client.id)?
            .ok_or(StoreError::NotFound)?;
        Ok(ConsultationOutcome {
            consultation: ConsultationView::from(&consultation),
            client_status,
        })
    }

    pub fn consultation(&self, id: ConsultationId) -> Result<ConsultationDetail, ServiceError> {
        let store = self.runner.store();
        let consultation = store.fetch(id)?.ok_or(StoreError::NotFound)?;
        let log = store.logs_for(id)?;
        Ok(ConsultationDetail {
            consultation: ConsultationView::from(&consultation),
            log,
        })
    }

    pub fn client_status(&self, client_id: &ClientId) -> Result<ClientFiscalStatus, ServiceError> {
        Ok(self.runner.aggregator().recompute(client_id)?)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<ConsultationView>, ServiceError> {
        let consultations = self.runner.store().recent(limit)?;
        Ok(consultations.iter().map(ConsultationView::from).collect())
    }

    pub fn summary(&self, limit: usize) -> Result<ConsultationSummary, ServiceError> {
        let consultations = self.runner.store().recent(limit)?;
        Ok(ConsultationSummary::from_consultations(&consultations))
    }

    pub fn clear_history(&self) -> Result<usize, ServiceError> {
        let removed = self.runner.store().clear_history()?;
        info!(removed, "consultation history cleared");
        Ok(removed)
    }

    pub fn sweep_stale(&self) -> Result<usize, ServiceError> {
        Ok(self.runner.sweep_stale()?)
    }

    /// Starts a batch on a background task. Only one batch may run at a time.
    pub fn start_batch(
        &self,
        clients: Vec<Client>,
        categories: Vec<Category>,
    ) -> Result<BatchSnapshot, ServiceError> {
        let categories = if categories.is_empty() {
            Category::ordered().to_vec()
        } else {
            categories
        };
        let total = plan(&clients, &categories).len();
        if total == 0 {
            return Err(ServiceError::EmptyBatch);
        }

        let cancel = CancellationFlag::new();
        let snapshot = {
            let mut slot = self.batch.lock().map_err(|_| ServiceError::BatchStateUnavailable)?;
            if matches!(&*slot, Some(current) if current.snapshot.phase == BatchPhase::Running) {
                return Err(ServiceError::BatchInProgress);
            }
            let snapshot = BatchSnapshot {
                batch_id: Uuid::new_v4(),
                phase: BatchPhase::Running,
                cancel_requested: false,
                started_at: self.runner.clock().now(),
                progress: BatchProgress {
                    completed: 0,
                    total,
                    percent: 0,
                    recent_log: Vec::new(),
                },
                report: None,
            };
            *slot = Some(BatchSlot {
                snapshot: snapshot.clone(),
                cancel: cancel.clone(),
            });
            snapshot
        };

        info!(batch_id = %snapshot.batch_id, pairs = total, "batch scheduled");

        let coordinator = Arc::clone(&self.coordinator);
        let progress_slot = Arc::clone(&self.batch);
        let finish_slot = Arc::clone(&self.batch);
        tokio::spawn(async move {
            let sink = move |progress: &BatchProgress| {
                if let Ok(mut slot) = progress_slot.lock() {
                    if let Some(current) = slot.as_mut() {
                        current.snapshot.progress = progress.clone();
                    }
                }
            };
            let report = coordinator
                .run_batch(&clients, &categories, &sink, &cancel)
                .await;

            match finish_slot.lock() {
                Ok(mut slot) => {
                    if let Some(current) = slot.as_mut() {
                        current.snapshot.phase = BatchPhase::Finished;
                        current.snapshot.report = Some(report);
                    }
                }
                Err(_) => warn!("batch state lock poisoned; report dropped"),
            }
        });

        Ok(snapshot)
    }

    pub fn current_batch(&self) -> Result<Option<BatchSnapshot>, ServiceError> {
        let slot = self.batch.lock().map_err(|_| ServiceError::BatchStateUnavailable)?;
        Ok(slot.as_ref().map(|current| current.snapshot.clone()))
    }

    /// Asks the running batch to stop; the in-flight consultation still completes.
    pub fn cancel_batch(&self) -> Result<BatchSnapshot, ServiceError> {
        let mut slot = self.batch.lock().map_err(|_| ServiceError::BatchStateUnavailable)?;
        match slot.as_mut() {
            Some(current) if current.snapshot.phase == BatchPhase::Running => {
                current.cancel.cancel();
                current.snapshot.cancel_requested = true;
                info!(batch_id = %current.snapshot.batch_id, "batch cancellation requested");
                Ok(current.snapshot.clone())
            }
            _ => Err(ServiceError::NoBatchRunning),
        }
    }
}

fn ensure_valid_cnpj(client: &Client) -> Result<(), ServiceError> {
    if cnpj::is_valid(&client.cnpj) {
        Ok(())
    } else {
        Err(ServiceError::InvalidCnpj(client.id.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Consultation(#[from] ConsultationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("client {0} has an invalid CNPJ")]
    InvalidCnpj(ClientId),
    #[error("no active client/category pairs to process")]
    EmptyBatch,
    #[error("a batch is already running")]
    BatchInProgress,
    #[error("no batch is running")]
    NoBatchRunning,
    #[error("batch state unavailable")]
    BatchStateUnavailable,
}
