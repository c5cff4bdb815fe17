use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::aggregator::ClientStatusAggregator;
use super::classifier::StatusClassifier;
use super::cnpj;
use super::domain::{
    Category, CertificateOutcome, Client, ClientId, Consultation, ExecutionLogEntry, FailureKind,
    LogLevel, TransitionError,
};
use super::provider::{LookupProvider, LookupRequest, ProviderError, ProviderResponse};
use super::store::{Clock, ConsultationStore, StoreError, SystemClock};
use crate::config::{MonitorConfig, ProviderConfig};

const PRECONDITION_PREFIX: &str = "skipped — missing precondition";
const INTERRUPTED_MESSAGE: &str = "timeout (process interrupted)";

/// Retry and timeout policy for a single consultation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Clamped to `1..=MonitorConfig::MAX_ATTEMPTS` at run time.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub default_timeout: Duration,
    pub payroll_fund_timeout: Duration,
    pub stale_after: Duration,
}

impl RunnerConfig {
    pub fn from_config(monitor: &MonitorConfig, provider: &ProviderConfig) -> Self {
        Self {
            max_attempts: monitor.max_attempts,
            retry_delay: monitor.retry_delay,
            default_timeout: provider.default_timeout,
            payroll_fund_timeout: provider.payroll_fund_timeout,
            stale_after: monitor.stale_after,
        }
    }

    pub fn timeout_for(&self, category: Category) -> Duration {
        match category {
            Category::PayrollFundRegularity => self.payroll_fund_timeout,
            _ => self.default_timeout,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            default_timeout: Duration::from_secs(60),
            payroll_fund_timeout: Duration::from_secs(120),
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsultationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Why one provider attempt did not yield a certificate.
#[derive(Debug)]
struct AttemptFailure {
    kind: FailureKind,
    message: String,
    payload: Option<Value>,
}

impl AttemptFailure {
    fn transient(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            payload,
        }
    }

    fn from_provider(err: ProviderError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string(), None)
        } else {
            Self {
                kind: FailureKind::MissingPrecondition,
                message: format!("{PRECONDITION_PREFIX}: {err}"),
                payload: None,
            }
        }
    }
}

/// Executes one certificate lookup end to end and owns every terminal write.
pub struct ConsultationRunner<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    aggregator: ClientStatusAggregator<S>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
}

impl<S, P> ConsultationRunner<S, P>
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, config: RunnerConfig) -> Self {
        Self {
            aggregator: ClientStatusAggregator::new(Arc::clone(&store)),
            store,
            provider,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn aggregator(&self) -> &ClientStatusAggregator<S> {
        &self.aggregator
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs a consultation to a terminal state and recomputes the client's status.
    ///
    /// Provider failures end up recorded on the returned consultation; only store
    /// failures surface as `Err`.
    pub async fn run(
        &self,
        client: &Client,
        category: Category,
    ) -> Result<Consultation, ConsultationError> {
        let masked = client.masked_cnpj();
        let consultation =
            Consultation::queued(client.id.clone(), category, self.clock.now());
        let mut consultation = self.store.insert(consultation)?;
        consultation.start()?;
        self.store.update(&consultation)?;

        info!(
            consultation_id = %consultation.id(),
            client = %masked,
            category = %category,
            "consultation started"
        );

        let request = match self.lookup_request(client, category) {
            Ok(request) => request,
            Err(reason) => {
                warn!(
                    consultation_id = %consultation.id(),
                    client = %masked,
                    category = %category,
                    reason = %reason,
                    "consultation skipped"
                );
                consultation.fail(
                    FailureKind::MissingPrecondition,
                    format!("{PRECONDITION_PREFIX}: {reason}"),
                    None,
                    self.clock.now(),
                )?;
                return self.finish(consultation);
            }
        };

        let max_attempts = self.config.max_attempts.clamp(1, MonitorConfig::MAX_ATTEMPTS);
        loop {
            match self.attempt(category, &request).await {
                Ok(outcome) => {
                    info!(
                        consultation_id = %consultation.id(),
                        client = %masked,
                        category = %category,
                        attempt = consultation.attempts(),
                        verdict = outcome.verdict.label(),
                        "consultation completed"
                    );
                    consultation.complete(outcome, self.clock.now())?;
                    break;
                }
                Err(failure)
                    if failure.kind.is_retryable() && consultation.attempts() < max_attempts =>
                {
                    warn!(
                        consultation_id = %consultation.id(),
                        client = %masked,
                        category = %category,
                        attempt = consultation.attempts(),
                        error = %failure.message,
                        "provider attempt failed, retrying"
                    );
                    self.log(
                        &consultation,
                        LogLevel::Warning,
                        format!(
                            "attempt {}/{} failed: {}",
                            consultation.attempts(),
                            max_attempts,
                            failure.message
                        ),
                        failure.payload.unwrap_or(Value::Null),
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    consultation.record_retry()?;
                    match self.store.update(&consultation) {
                        Ok(()) => {}
                        Err(StoreError::Finalized) => return self.superseded(consultation),
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(failure) => {
                    error!(
                        consultation_id = %consultation.id(),
                        client = %masked,
                        category = %category,
                        attempt = consultation.attempts(),
                        kind = failure.kind.tag(),
                        error = %failure.message,
                        "consultation failed"
                    );
                    self.log(
                        &consultation,
                        LogLevel::Error,
                        format!(
                            "{} after {} attempt(s): {}",
                            failure.kind.tag(),
                            consultation.attempts(),
                            failure.message
                        ),
                        failure.payload.clone().unwrap_or(Value::Null),
                    );
                    consultation.fail(
                        failure.kind,
                        failure.message,
                        failure.payload,
                        self.clock.now(),
                    )?;
                    break;
                }
            }
        }

        self.finish(consultation)
    }

    /// Fails every consultation left `running` past the stale threshold and
    /// recomputes the affected clients. Returns how many were swept.
    pub fn sweep_stale(&self) -> Result<usize, ConsultationError> {
        let now = self.clock.now();
        let threshold = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let stale = self.store.running_before(now - threshold)?;

        let mut swept = 0;
        let mut clients: BTreeSet<ClientId> = BTreeSet::new();
        for mut consultation in stale {
            consultation.fail(FailureKind::Interrupted, INTERRUPTED_MESSAGE, None, now)?;
            match self.store.update(&consultation) {
                Ok(()) => swept += 1,
                // Finished between the query and the write.
                Err(StoreError::Finalized) => continue,
                Err(err) => return Err(err.into()),
            }
            self.log(
                &consultation,
                LogLevel::Error,
                INTERRUPTED_MESSAGE.to_string(),
                json!({ "created_at": consultation.created_at() }),
            );
            clients.insert(consultation.client_id().clone());
        }

        for client_id in &clients {
            self.aggregator.recompute(client_id)?;
        }
        if swept > 0 {
            warn!(swept, "stale consultations marked as interrupted");
        }
        Ok(swept)
    }

    fn finish(&self, consultation: Consultation) -> Result<Consultation, ConsultationError> {
        match self.store.update(&consultation) {
            Ok(()) => {}
            Err(StoreError::Finalized) => return self.superseded(consultation),
            Err(err) => return Err(err.into()),
        }
        self.aggregator.recompute(consultation.client_id())?;
        Ok(consultation)
    }

    /// The stored row was closed elsewhere (the stale sweep) while this run was in
    /// flight. The stored terminal state stands and the local outcome is dropped.
    fn superseded(&self, local: Consultation) -> Result<Consultation, ConsultationError> {
        let stored = self
            .store
            .fetch(local.id())?
            .ok_or(StoreError::NotFound)?;
        warn!(
            consultation_id = %stored.id(),
            category = %stored.category(),
            stored_status = stored.status().label(),
            discarded_status = local.status().label(),
            "consultation was closed while in flight; keeping the stored outcome"
        );
        self.aggregator.recompute(stored.client_id())?;
        Ok(stored)
    }

    fn lookup_request(&self, client: &Client, category: Category) -> Result<LookupRequest, String> {
        if !cnpj::is_valid(&client.cnpj) {
            return Err(format!(
                "CNPJ {} fails check-digit validation",
                client.masked_cnpj()
            ));
        }
        let state_registration = if category.requires_state_registration() {
            match client.state_registration() {
                Some(registration) => Some(registration.to_string()),
                None => return Err("state registration number not on file".to_string()),
            }
        } else {
            None
        };

        Ok(LookupRequest {
            cnpj: client.cnpj_digits(),
            state_registration,
        })
    }

    async fn attempt(
        &self,
        category: Category,
        request: &LookupRequest,
    ) -> Result<CertificateOutcome, AttemptFailure> {
        let timeout = self.config.timeout_for(category);
        let response = match tokio::time::timeout(timeout, self.provider.fetch(category, request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(AttemptFailure::from_provider(err)),
            Err(_) => {
                return Err(AttemptFailure::transient(
                    ProviderError::Timeout(timeout).to_string(),
                    None,
                ))
            }
        };

        interpret(request, response)
    }

    /// Execution-log writes are best effort; losing an audit row must not strand a
    /// consultation in `running`.
    fn log(&self, consultation: &Consultation, level: LogLevel, message: String, payload: Value) {
        let entry = ExecutionLogEntry {
            consultation_id: consultation.id(),
            level,
            message,
            payload,
            recorded_at: self.clock.now(),
        };
        if let Err(err) = self.store.append_log(entry) {
            warn!(consultation_id = %consultation.id(), error = %err, "execution log write failed");
        }
    }
}

fn interpret(
    request: &LookupRequest,
    response: ProviderResponse,
) -> Result<CertificateOutcome, AttemptFailure> {
    if response.is_failure_code() {
        return Err(AttemptFailure::transient(
            ProviderError::Code {
                code: response.code,
            }
            .to_string(),
            Some(response.raw),
        ));
    }

    let Some(item) = response.items.first() else {
        return Err(AttemptFailure::transient(
            ProviderError::EmptyPayload.to_string(),
            Some(response.raw),
        ));
    };

    let echoed = item.cnpj.as_deref().map(cnpj::digits).unwrap_or_default();
    if !echoed.is_empty() && echoed != request.cnpj {
        return Err(AttemptFailure {
            kind: FailureKind::Integrity,
            message: format!(
                "integrity check failed: provider answered for {} instead of {}",
                cnpj::mask(&echoed),
                cnpj::mask(&request.cnpj)
            ),
            payload: Some(response.raw),
        });
    }

    let verdict = StatusClassifier::classify(item.primary_text(), item.secondary_text());
    let document_url = item.document_url();
    let valid_until = item.validity_date();

    Ok(CertificateOutcome {
        verdict,
        raw_payload: response.raw,
        document_url,
        valid_until,
    })
}
