use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::cnpj;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Company whose certificates are monitored. Owned by the dashboard; passed in by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub legal_name: String,
    pub cnpj: String,
    #[serde(default)]
    pub state_registration: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Client {
    pub fn cnpj_digits(&self) -> String {
        cnpj::digits(&self.cnpj)
    }

    /// Masked registration id, safe for log lines.
    pub fn masked_cnpj(&self) -> String {
        cnpj::mask(&self.cnpj)
    }

    pub fn state_registration(&self) -> Option<&str> {
        self.state_registration
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "federal")]
    FederalDebtCertificate,
    #[serde(alias = "state")]
    StateDebtCertificate,
    #[serde(alias = "payroll_fund")]
    PayrollFundRegularity,
}

impl Category {
    pub const fn ordered() -> [Self; 3] {
        [
            Self::FederalDebtCertificate,
            Self::StateDebtCertificate,
            Self::PayrollFundRegularity,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::FederalDebtCertificate => "Federal Debt Certificate",
            Self::StateDebtCertificate => "State Debt Certificate",
            Self::PayrollFundRegularity => "Payroll Fund Regularity",
        }
    }

    pub const fn slug(self) -> &'static str {
        match self {
            Self::FederalDebtCertificate => "federal_debt_certificate",
            Self::StateDebtCertificate => "state_debt_certificate",
            Self::PayrollFundRegularity => "payroll_fund_regularity",
        }
    }

    pub fn from_slug(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ordered().into_iter().find(|category| {
            category.slug() == normalized
                || match category {
                    Self::FederalDebtCertificate => normalized == "federal",
                    Self::StateDebtCertificate => normalized == "state",
                    Self::PayrollFundRegularity => normalized == "payroll_fund",
                }
        })
    }

    /// State certificates are issued per state registration number, which not every client holds.
    pub const fn requires_state_registration(self) -> bool {
        matches!(self, Self::StateDebtCertificate)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsultationId(pub Uuid);

impl ConsultationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsultationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsultationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl ConsultationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Regular,
    Irregular,
    Unknown,
}

impl Verdict {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Regular => "Regular",
            Self::Irregular => "Irregular",
            Self::Unknown => "Unknown",
        }
    }

    /// Converts a historical `positiva`/`negativa` row under the convention it was written with.
    pub fn from_legacy_label(label: &str, convention: LegacyLabelConvention) -> Self {
        let label = label.trim().to_lowercase();
        let (regular, irregular) = match convention {
            LegacyLabelConvention::NegativaMeansRegular => ("negativa", "positiva"),
            LegacyLabelConvention::PositivaMeansRegular => ("positiva", "negativa"),
        };
        if label == regular {
            Self::Regular
        } else if label == irregular {
            Self::Irregular
        } else {
            Self::Unknown
        }
    }
}

/// Polarity used by older rows: the certificate vocabulary ("negative certificate" is the
/// clean one) versus the inverted mapping some screens wrote for a while.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyLabelConvention {
    NegativaMeansRegular,
    PositivaMeansRegular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network, timeout, HTTP, or provider-code failure; retried up to the attempt cap.
    Transient,
    /// Provider echoed a different registration id than the one requested.
    Integrity,
    /// Client lacks a field the category needs; the provider is never called.
    MissingPrecondition,
    /// Left `running` past the stale threshold, usually after a crash mid-call.
    Interrupted,
}

impl FailureKind {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Transient => "provider failure",
            Self::Integrity => "integrity violation",
            Self::MissingPrecondition => "missing precondition",
            Self::Interrupted => "interrupted",
        }
    }

    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Payload captured from a successful provider answer.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateOutcome {
    pub verdict: Verdict,
    pub raw_payload: Value,
    pub document_url: Option<String>,
    pub valid_until: Option<NaiveDate>,
}

/// One attempt to obtain a fiscal certificate for one client and one category.
///
/// Fields are only reachable through the transition methods, which keep the record
/// consistent: a verdict exists exactly when the status is `Done`, an error message and
/// failure kind exist exactly when the status is `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consultation {
    id: ConsultationId,
    client_id: ClientId,
    category: Category,
    status: ConsultationStatus,
    verdict: Option<Verdict>,
    raw_payload: Option<Value>,
    document_url: Option<String>,
    valid_until: Option<NaiveDate>,
    error_message: Option<String>,
    failure_kind: Option<FailureKind>,
    attempts: u32,
    created_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
}

impl Consultation {
    pub fn queued(client_id: ClientId, category: Category, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ConsultationId::new(),
            client_id,
            category,
            status: ConsultationStatus::Queued,
            verdict: None,
            raw_payload: None,
            document_url: None,
            valid_until: None,
            error_message: None,
            failure_kind: None,
            attempts: 1,
            created_at,
            executed_at: None,
        }
    }

    pub fn id(&self) -> ConsultationId {
        self.id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn status(&self) -> ConsultationStatus {
        self.status
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub fn raw_payload(&self) -> Option<&Value> {
        self.raw_payload.as_ref()
    }

    pub fn document_url(&self) -> Option<&str> {
        self.document_url.as_deref()
    }

    pub fn valid_until(&self) -> Option<NaiveDate> {
        self.valid_until
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn is_regular(&self) -> bool {
        self.status == ConsultationStatus::Done && self.verdict == Some(Verdict::Regular)
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect_status(ConsultationStatus::Queued, ConsultationStatus::Running)?;
        self.status = ConsultationStatus::Running;
        Ok(())
    }

    pub fn record_retry(&mut self) -> Result<(), TransitionError> {
        self.expect_status(ConsultationStatus::Running, ConsultationStatus::Running)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn complete(
        &mut self,
        outcome: CertificateOutcome,
        executed_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(ConsultationStatus::Running, ConsultationStatus::Done)?;
        self.status = ConsultationStatus::Done;
        self.verdict = Some(outcome.verdict);
        self.raw_payload = Some(outcome.raw_payload);
        self.document_url = outcome.document_url;
        self.valid_until = outcome.valid_until;
        self.executed_at = Some(executed_at);
        Ok(())
    }

    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        raw_payload: Option<Value>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: ConsultationStatus::Failed,
            });
        }
        self.status = ConsultationStatus::Failed;
        self.verdict = None;
        self.failure_kind = Some(kind);
        self.error_message = Some(message.into());
        self.raw_payload = raw_payload;
        self.executed_at = Some(executed_at);
        Ok(())
    }

    fn expect_status(
        &self,
        expected: ConsultationStatus,
        to: ConsultationStatus,
    ) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("consultation cannot move from {} to {}", .from.label(), .to.label())]
pub struct TransitionError {
    pub from: ConsultationStatus,
    pub to: ConsultationStatus,
}

/// Latest standing for one category, as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStanding {
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<ConsultationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConsultationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub compliant: bool,
}

/// Denormalized per-client roll-up, written only by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFiscalStatus {
    pub client_id: ClientId,
    pub overall: Verdict,
    pub categories: Vec<CategoryStanding>,
}

impl ClientFiscalStatus {
    pub fn is_regular(&self) -> bool {
        self.overall == Verdict::Regular
    }

    pub fn non_compliant(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories
            .iter()
            .filter(|standing| !standing.compliant)
            .map(|standing| standing.category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Append-only audit row for notable runner events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub consultation_id: ConsultationId,
    pub level: LogLevel,
    pub message: String,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}
