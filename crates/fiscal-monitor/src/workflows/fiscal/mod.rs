//! Fiscal certificate monitoring: provider lookups, classification, retries, the
//! per-client roll-up, and rate-limited batches.

pub mod aggregator;
pub mod batch;
pub mod classifier;
pub mod cnpj;
pub mod domain;
pub mod infosimples;
pub mod provider;
pub mod router;
pub mod runner;
pub mod service;
pub mod store;
pub mod views;

pub use aggregator::ClientStatusAggregator;
pub use batch::{
    BatchConfig, BatchCoordinator, BatchItem, BatchProgress, BatchReport, CancellationFlag,
    ItemOutcome, ProgressSink,
};
pub use classifier::StatusClassifier;
pub use domain::{
    Category, CategoryStanding, CertificateOutcome, Client, ClientFiscalStatus, ClientId,
    Consultation, ConsultationId, ConsultationStatus, ExecutionLogEntry, FailureKind,
    LegacyLabelConvention, LogLevel, TransitionError, Verdict,
};
pub use infosimples::InfoSimplesClient;
pub use provider::{LookupProvider, LookupRequest, ProviderError, ProviderItem, ProviderResponse};
pub use router::fiscal_router;
pub use runner::{ConsultationError, ConsultationRunner, RunnerConfig};
pub use service::{BatchPhase, BatchSnapshot, FiscalMonitorService, ServiceError};
pub use store::{Clock, ConsultationStore, StoreError, SystemClock};
pub use views::{ConsultationDetail, ConsultationOutcome, ConsultationSummary, ConsultationView};

#[cfg(test)]
mod tests;
