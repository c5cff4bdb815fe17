//! Sequential, rate-limited consultation runs across many clients.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{Category, Client, ClientId, Consultation, ConsultationId, FailureKind, Verdict};
use super::provider::LookupProvider;
use super::runner::ConsultationRunner;
use super::store::ConsultationStore;
use crate::config::MonitorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Minimum pause between two consecutive pairs.
    pub rate_limit_delay: Duration,
    /// Number of lines kept in the rolling progress log.
    pub log_window: usize,
}

impl BatchConfig {
    pub fn from_config(monitor: &MonitorConfig) -> Self {
        Self {
            rate_limit_delay: monitor.rate_limit_delay,
            log_window: monitor.log_window,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_delay: Duration::from_secs(3),
            log_window: 50,
        }
    }
}

/// Cooperative stop signal shared between the batch and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Regular,
    Irregular,
    Skipped,
    Failed,
}

impl ItemOutcome {
    pub const fn glyph(self) -> &'static str {
        match self {
            Self::Regular => "✅",
            Self::Irregular => "⚠️",
            Self::Skipped => "⏭",
            Self::Failed => "❌",
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Irregular => "irregular",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    fn of(consultation: &Consultation) -> Self {
        match (consultation.verdict(), consultation.failure_kind()) {
            (Some(Verdict::Regular), _) => Self::Regular,
            (Some(_), _) => Self::Irregular,
            (None, Some(FailureKind::MissingPrecondition)) => Self::Skipped,
            (None, _) => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub client_id: ClientId,
    pub client_name: String,
    pub category: Category,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consultation_id: Option<ConsultationId>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchItem {
    fn from_consultation(client: &Client, consultation: &Consultation) -> Self {
        Self {
            client_id: client.id.clone(),
            client_name: client.legal_name.clone(),
            category: consultation.category(),
            outcome: ItemOutcome::of(consultation),
            consultation_id: Some(consultation.id()),
            attempts: consultation.attempts(),
            reason: consultation.error_message().map(str::to_string),
        }
    }

    fn errored(client: &Client, category: Category, reason: String) -> Self {
        Self {
            client_id: client.id.clone(),
            client_name: client.legal_name.clone(),
            category,
            outcome: ItemOutcome::Failed,
            consultation_id: None,
            attempts: 0,
            reason: Some(reason),
        }
    }

    pub fn log_line(&self) -> String {
        let mut line = format!(
            "{} {}: {} ({})",
            self.outcome.glyph(),
            self.client_name,
            self.category.label(),
            self.outcome.tag()
        );
        if let Some(reason) = &self.reason {
            line.push_str(": ");
            line.push_str(reason);
        }
        line
    }
}

/// Snapshot published after every processed pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
    pub recent_log: Vec<String>,
}

/// Receives progress snapshots; closures work directly.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, progress: &BatchProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn publish(&self, progress: &BatchProgress) {
        self(progress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub planned: usize,
    pub processed: usize,
    pub regular: usize,
    pub irregular: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    fn tally(
        planned: usize,
        items: Vec<BatchItem>,
        cancelled: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let count = |outcome: ItemOutcome| items.iter().filter(|item| item.outcome == outcome).count();
        Self {
            planned,
            processed: items.len(),
            regular: count(ItemOutcome::Regular),
            irregular: count(ItemOutcome::Irregular),
            skipped: count(ItemOutcome::Skipped),
            failed: count(ItemOutcome::Failed),
            cancelled,
            started_at,
            finished_at,
            items,
        }
    }
}

/// Walks (client, category) pairs one at a time through the runner.
pub struct BatchCoordinator<S, P> {
    runner: Arc<ConsultationRunner<S, P>>,
    config: BatchConfig,
}

impl<S, P> BatchCoordinator<S, P>
where
    S: ConsultationStore + 'static,
    P: LookupProvider + 'static,
{
    pub fn new(runner: Arc<ConsultationRunner<S, P>>, config: BatchConfig) -> Self {
        Self { runner, config }
    }

    pub async fn run_batch(
        &self,
        clients: &[Client],
        categories: &[Category],
        progress: &dyn ProgressSink,
        cancel: &CancellationFlag,
    ) -> BatchReport {
        let clock = self.runner.clock();
        let started_at = clock.now();
        let pairs = plan(clients, categories);
        let total = pairs.len();
        let window = self.config.log_window.max(1);
        let mut recent_log: VecDeque<String> = VecDeque::with_capacity(window);
        let mut items = Vec::with_capacity(total);
        let mut cancelled = false;

        info!(
            clients = clients.len(),
            pairs = total,
            "batch started"
        );

        for (index, (client, category)) in pairs.into_iter().enumerate() {
            if index > 0 {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                tokio::time::sleep(self.config.rate_limit_delay).await;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let item = match self.runner.run(client, category).await {
                Ok(consultation) => BatchItem::from_consultation(client, &consultation),
                Err(err) => {
                    warn!(
                        client = %client.masked_cnpj(),
                        category = %category,
                        error = %err,
                        "batch item could not be recorded"
                    );
                    BatchItem::errored(client, category, err.to_string())
                }
            };

            if recent_log.len() == window {
                recent_log.pop_front();
            }
            recent_log.push_back(item.log_line());
            items.push(item);

            let completed = items.len();
            progress.publish(&BatchProgress {
                completed,
                total,
                percent: percent(completed, total),
                recent_log: recent_log.iter().cloned().collect(),
            });
        }

        let report = BatchReport::tally(total, items, cancelled, started_at, clock.now());
        info!(
            planned = report.planned,
            processed = report.processed,
            regular = report.regular,
            irregular = report.irregular,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "batch finished"
        );
        report
    }
}

/// Pairs a batch would process: active clients in order, each with every requested
/// category (duplicates dropped).
pub fn plan<'a>(clients: &'a [Client], categories: &[Category]) -> Vec<(&'a Client, Category)> {
    let mut unique: Vec<Category> = Vec::with_capacity(categories.len());
    for category in categories {
        if !unique.contains(category) {
            unique.push(*category);
        }
    }

    clients
        .iter()
        .filter(|client| client.active)
        .flat_map(|client| unique.iter().map(move |category| (client, *category)))
        .collect()
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100) / total).min(100) as u8
}
