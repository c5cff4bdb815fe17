use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::workflows::fiscal::domain::{
    Category, CertificateOutcome, Client, ClientFiscalStatus, ClientId, Consultation,
    ConsultationId, ConsultationStatus, ExecutionLogEntry, Verdict,
};
use crate::workflows::fiscal::provider::{
    LookupProvider, LookupRequest, ProviderError, ProviderResponse,
};
use crate::workflows::fiscal::batch::BatchConfig;
use crate::workflows::fiscal::runner::{ConsultationRunner, RunnerConfig};
use crate::workflows::fiscal::service::FiscalMonitorService;
use crate::workflows::fiscal::store::{Clock, ConsultationStore, StoreError};

pub(super) const CNPJ: &str = "11.222.333/0001-81";
pub(super) const CNPJ_DIGITS: &str = "11222333000181";
pub(super) const OTHER_CNPJ: &str = "05718417000108";

pub(super) fn timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub(super) fn client() -> Client {
    Client {
        id: ClientId("client-padaria".to_string()),
        legal_name: "Padaria Central Ltda".to_string(),
        cnpj: CNPJ.to_string(),
        state_registration: Some("9012345678".to_string()),
        active: true,
    }
}

pub(super) fn client_without_state_registration() -> Client {
    Client {
        state_registration: None,
        ..client()
    }
}

pub(super) fn other_client() -> Client {
    Client {
        id: ClientId("client-oficina".to_string()),
        legal_name: "Oficina Mecânica Souza ME".to_string(),
        cnpj: OTHER_CNPJ.to_string(),
        state_registration: Some("1234567890".to_string()),
        active: true,
    }
}

pub(super) fn certificate_payload(cnpj: &str, text: &str) -> Value {
    json!({
        "code": 200,
        "code_message": "A requisição foi processada com sucesso.",
        "data": [{
            "cnpj": cnpj,
            "situacao": text,
            "validade": "15/09/2025",
            "site_receipt": "https://storage.infosimples.com/receipt.html"
        }]
    })
}

pub(super) fn regular_payload() -> Value {
    certificate_payload(CNPJ, "Certidão Negativa de Débitos")
}

pub(super) fn irregular_payload() -> Value {
    certificate_payload(CNPJ, "Certidão Positiva")
}

pub(super) fn code_payload(code: i64) -> Value {
    json!({ "code": code, "code_message": "erro", "data": [] })
}

pub(super) fn empty_payload() -> Value {
    json!({ "code": 200, "data": [] })
}

pub(super) fn outcome(verdict: Verdict) -> CertificateOutcome {
    CertificateOutcome {
        verdict,
        raw_payload: json!({ "code": 200 }),
        document_url: None,
        valid_until: None,
    }
}

/// Builds a terminal `done` consultation without going through a provider.
pub(super) fn done_consultation(
    client_id: &ClientId,
    category: Category,
    verdict: Verdict,
    created_at: DateTime<Utc>,
) -> Consultation {
    let mut consultation = Consultation::queued(client_id.clone(), category, created_at);
    consultation.start().expect("starts");
    consultation
        .complete(outcome(verdict), created_at)
        .expect("completes");
    consultation
}

pub(super) fn running_consultation(
    client_id: &ClientId,
    category: Category,
    created_at: DateTime<Utc>,
) -> Consultation {
    let mut consultation = Consultation::queued(client_id.clone(), category, created_at);
    consultation.start().expect("starts");
    consultation
}

#[derive(Default)]
struct StoreState {
    consultations: Vec<Consultation>,
    statuses: HashMap<ClientId, ClientFiscalStatus>,
    logs: Vec<ExecutionLogEntry>,
    status_writes: usize,
}

#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub(super) fn consultations(&self) -> Vec<Consultation> {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .consultations
            .clone()
    }

    pub(super) fn logs(&self) -> Vec<ExecutionLogEntry> {
        self.state.lock().expect("store mutex poisoned").logs.clone()
    }

    pub(super) fn status_writes(&self) -> usize {
        self.state.lock().expect("store mutex poisoned").status_writes
    }
}

impl ConsultationStore for MemoryStore {
    fn insert(&self, consultation: Consultation) -> Result<Consultation, StoreError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        if guard
            .consultations
            .iter()
            .any(|existing| existing.id() == consultation.id())
        {
            return Err(StoreError::Conflict);
        }
        guard.consultations.push(consultation.clone());
        Ok(consultation)
    }

    fn update(&self, consultation: &Consultation) -> Result<(), StoreError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        let slot = guard
            .consultations
            .iter_mut()
            .find(|existing| existing.id() == consultation.id())
            .ok_or(StoreError::NotFound)?;
        if slot.status().is_terminal() {
            return Err(StoreError::Finalized);
        }
        *slot = consultation.clone();
        Ok(())
    }

    fn fetch(&self, id: ConsultationId) -> Result<Option<Consultation>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .consultations
            .iter()
            .find(|existing| existing.id() == id)
            .cloned())
    }

    fn latest(
        &self,
        client_id: &ClientId,
        category: Category,
    ) -> Result<Option<Consultation>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .consultations
            .iter()
            .rev()
            .find(|existing| existing.client_id() == client_id && existing.category() == category)
            .cloned())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Consultation>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .consultations
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Consultation>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .consultations
            .iter()
            .filter(|existing| {
                existing.status() == ConsultationStatus::Running && existing.created_at() < cutoff
            })
            .cloned()
            .collect())
    }

    fn save_client_status(&self, status: ClientFiscalStatus) -> Result<(), StoreError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        guard.status_writes += 1;
        guard.statuses.insert(status.client_id.clone(), status);
        Ok(())
    }

    fn client_status(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<ClientFiscalStatus>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard.statuses.get(client_id).cloned())
    }

    fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .logs
            .push(entry);
        Ok(())
    }

    fn logs_for(&self, id: ConsultationId) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .logs
            .iter()
            .filter(|entry| entry.consultation_id == id)
            .cloned()
            .collect())
    }

    fn clear_history(&self) -> Result<usize, StoreError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        let removed = guard.consultations.len();
        guard.consultations.clear();
        guard.logs.clear();
        Ok(removed)
    }
}

pub(super) struct UnavailableStore;

impl ConsultationStore for UnavailableStore {
    fn insert(&self, _consultation: Consultation) -> Result<Consultation, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _consultation: &Consultation) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: ConsultationId) -> Result<Option<Consultation>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn latest(
        &self,
        _client_id: &ClientId,
        _category: Category,
    ) -> Result<Option<Consultation>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn recent(&self, _limit: usize) -> Result<Vec<Consultation>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn running_before(&self, _cutoff: DateTime<Utc>) -> Result<Vec<Consultation>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn save_client_status(&self, _status: ClientFiscalStatus) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn client_status(
        &self,
        _client_id: &ClientId,
    ) -> Result<Option<ClientFiscalStatus>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn append_log(&self, _entry: ExecutionLogEntry) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn logs_for(&self, _id: ConsultationId) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn clear_history(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

/// One recorded provider call, stamped with the (virtual) tokio clock.
#[derive(Debug, Clone)]
pub(super) struct ProviderCall {
    pub(super) category: Category,
    pub(super) request: LookupRequest,
    pub(super) at: tokio::time::Instant,
}

/// Provider answering from per-category queues, falling back to a fixed payload.
#[derive(Default)]
pub(super) struct ScriptedProvider {
    queued: Mutex<HashMap<Category, VecDeque<Result<Value, ProviderError>>>>,
    fallback: HashMap<Category, Value>,
    latency: Option<Duration>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl ScriptedProvider {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Every category answers with a clean certificate unless scripted otherwise.
    pub(super) fn all_regular() -> Self {
        Category::ordered()
            .into_iter()
            .fold(Self::new(), |provider, category| {
                provider.with_fallback(category, regular_payload())
            })
    }

    pub(super) fn with_fallback(mut self, category: Category, payload: Value) -> Self {
        self.fallback.insert(category, payload);
        self
    }

    pub(super) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(super) fn then(self, category: Category, answer: Result<Value, ProviderError>) -> Self {
        self.queued
            .lock()
            .expect("script mutex poisoned")
            .entry(category)
            .or_default()
            .push_back(answer);
        self
    }

    pub(super) fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls mutex poisoned").len()
    }
}

#[async_trait]
impl LookupProvider for ScriptedProvider {
    async fn fetch(
        &self,
        category: Category,
        request: &LookupRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(ProviderCall {
                category,
                request: request.clone(),
                at: tokio::time::Instant::now(),
            });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .queued
            .lock()
            .expect("script mutex poisoned")
            .get_mut(&category)
            .and_then(VecDeque::pop_front);

        let raw = match scripted {
            Some(answer) => answer?,
            None => self
                .fallback
                .get(&category)
                .cloned()
                .ok_or_else(|| ProviderError::Transport("script exhausted".to_string()))?,
        };
        ProviderResponse::from_json(raw)
    }
}

/// Provider that never answers, so every attempt runs into the timeout.
#[derive(Default)]
pub(super) struct HangingProvider {
    calls: Mutex<usize>,
}

impl HangingProvider {
    pub(super) fn call_count(&self) -> usize {
        *self.calls.lock().expect("calls mutex poisoned")
    }
}

#[async_trait]
impl LookupProvider for HangingProvider {
    async fn fetch(
        &self,
        _category: Category,
        _request: &LookupRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().expect("calls mutex poisoned") += 1;
        std::future::pending().await
    }
}

pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn at(raw: &str) -> Self {
        Self {
            now: Mutex::new(timestamp(raw)),
        }
    }

    pub(super) fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

pub(super) fn build_runner<P: LookupProvider + 'static>(
    provider: P,
) -> (
    ConsultationRunner<MemoryStore, P>,
    Arc<MemoryStore>,
    Arc<P>,
) {
    let store = Arc::new(MemoryStore::default());
    let provider = Arc::new(provider);
    let runner = ConsultationRunner::new(
        Arc::clone(&store),
        Arc::clone(&provider),
        RunnerConfig::default(),
    );
    (runner, store, provider)
}

pub(super) fn build_service<P: LookupProvider + 'static>(
    provider: P,
) -> (
    FiscalMonitorService<MemoryStore, P>,
    Arc<MemoryStore>,
    Arc<P>,
) {
    let (runner, store, provider) = build_runner(provider);
    let service = FiscalMonitorService::new(runner, BatchConfig::default());
    (service, store, provider)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
