use std::sync::Arc;

use tracing::debug;

use super::domain::{Category, CategoryStanding, ClientFiscalStatus, ClientId, Verdict};
use super::store::{ConsultationStore, StoreError};

/// Rolls the latest consultation of every category up into one client-level verdict.
///
/// A category that was never consulted, is still in flight, or failed counts as
/// non-compliant, so the client is regular only when all three certificates are clean.
pub struct ClientStatusAggregator<S> {
    store: Arc<S>,
}

impl<S> Clone for ClientStatusAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> ClientStatusAggregator<S>
where
    S: ConsultationStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Computes the standing without persisting it.
    pub fn evaluate(&self, client_id: &ClientId) -> Result<ClientFiscalStatus, StoreError> {
        let mut categories = Vec::with_capacity(Category::ordered().len());
        for category in Category::ordered() {
            let standing = match self.store.latest(client_id, category)? {
                Some(consultation) => CategoryStanding {
                    category,
                    consultation_id: Some(consultation.id()),
                    status: Some(consultation.status()),
                    verdict: consultation.verdict(),
                    compliant: consultation.is_regular(),
                },
                None => CategoryStanding {
                    category,
                    consultation_id: None,
                    status: None,
                    verdict: None,
                    compliant: false,
                },
            };
            categories.push(standing);
        }

        let overall = if categories.iter().all(|standing| standing.compliant) {
            Verdict::Regular
        } else {
            Verdict::Irregular
        };

        Ok(ClientFiscalStatus {
            client_id: client_id.clone(),
            overall,
            categories,
        })
    }

    /// Re-derives and persists the client status. Running it twice writes the same value.
    pub fn recompute(&self, client_id: &ClientId) -> Result<ClientFiscalStatus, StoreError> {
        let status = self.evaluate(client_id)?;
        debug!(
            client_id = %client_id,
            overall = status.overall.label(),
            "client fiscal status recomputed"
        );
        self.store.save_client_status(status.clone())?;
        Ok(status)
    }
}
