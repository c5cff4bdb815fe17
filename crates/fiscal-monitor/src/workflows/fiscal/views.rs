use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::domain::{
    Category, ClientFiscalStatus, ClientId, Consultation, ConsultationId, ConsultationStatus,
    ExecutionLogEntry, FailureKind, Verdict,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultationView {
    pub id: ConsultationId,
    pub client_id: ClientId,
    pub category: Category,
    pub category_label: &'static str,
    pub status: ConsultationStatus,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl From<&Consultation> for ConsultationView {
    fn from(consultation: &Consultation) -> Self {
        Self {
            id: consultation.id(),
            client_id: consultation.client_id().clone(),
            category: consultation.category(),
            category_label: consultation.category().label(),
            status: consultation.status(),
            status_label: consultation.status().label(),
            verdict: consultation.verdict(),
            failure_kind: consultation.failure_kind(),
            error_message: consultation.error_message().map(str::to_string),
            attempts: consultation.attempts(),
            document_url: consultation.document_url().map(str::to_string),
            valid_until: consultation.valid_until(),
            created_at: consultation.created_at(),
            executed_at: consultation.executed_at(),
        }
    }
}

/// Response for a single run: the terminal consultation plus the recomputed roll-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultationOutcome {
    pub consultation: ConsultationView,
    pub client_status: ClientFiscalStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultationDetail {
    pub consultation: ConsultationView,
    pub log: Vec<ExecutionLogEntry>,
}

/// Counts over a window of recent consultations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsultationSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub regular: usize,
    pub irregular: usize,
    /// Share of the window that finished `done`, as an integer percent.
    pub success_rate: u8,
}

impl ConsultationSummary {
    pub fn from_consultations(consultations: &[Consultation]) -> Self {
        let mut summary = Self {
            total: consultations.len(),
            ..Self::default()
        };
        for consultation in consultations {
            match consultation.status() {
                ConsultationStatus::Done => summary.done += 1,
                ConsultationStatus::Failed => summary.failed += 1,
                ConsultationStatus::Queued | ConsultationStatus::Running => {
                    summary.in_progress += 1
                }
            }
            match consultation.verdict() {
                Some(Verdict::Regular) => summary.regular += 1,
                Some(Verdict::Irregular) => summary.irregular += 1,
                _ => {}
            }
        }
        if summary.total > 0 {
            summary.success_rate = ((summary.done * 100) / summary.total) as u8;
        }
        summary
    }
}
