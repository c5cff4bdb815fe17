use chrono::{DateTime, Utc};
use fiscal_monitor::config::{MonitorConfig, ProviderConfig};
use fiscal_monitor::workflows::fiscal::{
    BatchConfig, Category, ClientFiscalStatus, ClientId, Consultation, ConsultationId,
    ConsultationRunner, ConsultationStatus, ConsultationStore, ExecutionLogEntry,
    FiscalMonitorService, InfoSimplesClient, RunnerConfig, StoreError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type MonitorService = FiscalMonitorService<InMemoryConsultationStore, InfoSimplesClient>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
struct Tables {
    consultations: Vec<Consultation>,
    statuses: HashMap<ClientId, ClientFiscalStatus>,
    logs: Vec<ExecutionLogEntry>,
}

/// Process-local store; history lives as long as the process does.
#[derive(Default, Clone)]
pub(crate) struct InMemoryConsultationStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryConsultationStore {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl ConsultationStore for InMemoryConsultationStore {
    fn insert(&self, consultation: Consultation) -> Result<Consultation, StoreError> {
        let mut tables = self.tables()?;
        if tables
            .consultations
            .iter()
            .any(|existing| existing.id() == consultation.id())
        {
            return Err(StoreError::Conflict);
        }
        tables.consultations.push(consultation.clone());
        Ok(consultation)
    }

    fn update(&self, consultation: &Consultation) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let slot = tables
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
        let tables = self.tables()?;
        Ok(tables
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
        let tables = self.tables()?;
        Ok(tables
            .consultations
            .iter()
            .rev()
            .find(|existing| existing.client_id() == client_id && existing.category() == category)
            .cloned())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Consultation>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .consultations
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn running_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Consultation>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .consultations
            .iter()
            .filter(|existing| {
                existing.status() == ConsultationStatus::Running && existing.created_at() < cutoff
            })
            .cloned()
            .collect())
    }

    fn save_client_status(&self, status: ClientFiscalStatus) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.statuses.insert(status.client_id.clone(), status);
        Ok(())
    }

    fn client_status(&self, client_id: &ClientId) -> Result<Option<ClientFiscalStatus>, StoreError> {
        Ok(self.tables()?.statuses.get(client_id).cloned())
    }

    fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.tables()?.logs.push(entry);
        Ok(())
    }

    fn logs_for(&self, id: ConsultationId) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .logs
            .iter()
            .filter(|entry| entry.consultation_id == id)
            .cloned()
            .collect())
    }

    fn clear_history(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        let removed = tables.consultations.len();
        tables.consultations.clear();
        tables.logs.clear();
        Ok(removed)
    }
}

pub(crate) fn build_runner(
    provider: &ProviderConfig,
    monitor: &MonitorConfig,
) -> ConsultationRunner<InMemoryConsultationStore, InfoSimplesClient> {
    let store = Arc::new(InMemoryConsultationStore::default());
    let client = Arc::new(InfoSimplesClient::new(provider));
    ConsultationRunner::new(store, client, RunnerConfig::from_config(monitor, provider))
}

pub(crate) fn build_service(provider: &ProviderConfig, monitor: &MonitorConfig) -> MonitorService {
    FiscalMonitorService::new(
        build_runner(provider, monitor),
        BatchConfig::from_config(monitor),
    )
}

pub(crate) fn parse_category(raw: &str) -> Result<Category, String> {
    Category::from_slug(raw).ok_or_else(|| {
        let known = Category::ordered()
            .iter()
            .map(|category| category.slug())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown category '{raw}' (expected one of: {known})")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn consultation(client: &str, category: Category, minute: u32) -> Consultation {
        let created_at = Utc
            .with_ymd_and_hms(2025, 3, 10, 9, minute, 0)
            .single()
            .expect("valid timestamp");
        Consultation::queued(ClientId(client.to_string()), category, created_at)
    }

    #[test]
    fn latest_prefers_the_most_recent_insert() {
        let store = InMemoryConsultationStore::default();
        let first = consultation("acme", Category::FederalDebtCertificate, 0);
        let second = consultation("acme", Category::FederalDebtCertificate, 5);
        store.insert(first).expect("insert first");
        store.insert(second.clone()).expect("insert second");

        let latest = store
            .latest(&ClientId("acme".to_string()), Category::FederalDebtCertificate)
            .expect("store readable")
            .expect("latest present");
        assert_eq!(latest.id(), second.id());
        assert_eq!(store.recent(1).expect("recent")[0].id(), second.id());
    }

    #[test]
    fn duplicate_inserts_conflict_and_unknown_updates_miss() {
        let store = InMemoryConsultationStore::default();
        let record = consultation("acme", Category::PayrollFundRegularity, 0);
        store.insert(record.clone()).expect("first insert");

        match store.insert(record) {
            Err(StoreError::Conflict) => {}
            other => panic!("expected conflict, got {other:?}"),
        }
        match store.update(&consultation("acme", Category::PayrollFundRegularity, 1)) {
            Err(StoreError::NotFound) => {}
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn running_before_only_returns_old_running_rows() {
        let store = InMemoryConsultationStore::default();
        let mut old = consultation("acme", Category::StateDebtCertificate, 0);
        old.start().expect("start old");
        let mut fresh = consultation("acme", Category::FederalDebtCertificate, 30);
        fresh.start().expect("start fresh");
        let queued = consultation("acme", Category::PayrollFundRegularity, 1);
        for record in [old.clone(), fresh, queued] {
            store.insert(record).expect("insert");
        }

        let cutoff = Utc
            .with_ymd_and_hms(2025, 3, 10, 9, 15, 0)
            .single()
            .expect("valid cutoff");
        let stale = store.running_before(cutoff).expect("store readable");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), old.id());
    }

    #[test]
    fn categories_parse_from_slugs_and_short_names() {
        assert_eq!(parse_category("state"), Ok(Category::StateDebtCertificate));
        assert_eq!(
            parse_category("payroll-fund-regularity"),
            Ok(Category::PayrollFundRegularity)
        );
        let error = parse_category("municipal").expect_err("unknown category");
        assert!(error.contains("federal_debt_certificate"));
    }
}
