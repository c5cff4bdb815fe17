use crate::infra::{build_runner, build_service, parse_category};
use clap::Args;
use fiscal_monitor::config::AppConfig;
use fiscal_monitor::error::AppError;
use fiscal_monitor::telemetry::{self, LogSink};
use fiscal_monitor::workflows::fiscal::cnpj;
use fiscal_monitor::workflows::fiscal::{
    BatchConfig, BatchCoordinator, BatchProgress, BatchReport, CancellationFlag, Category, Client,
    ClientId, StatusClassifier,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Args, Debug)]
pub(crate) struct ClassifyArgs {
    /// Main status text returned by the provider (situação or certidão)
    pub(crate) primary: String,
    /// Secondary text such as the provider message
    #[arg(long, default_value = "")]
    pub(crate) secondary: String,
}

#[derive(Args, Debug)]
pub(crate) struct ConsultArgs {
    /// Company registration number, formatted or digits only
    #[arg(long)]
    pub(crate) cnpj: String,
    /// Legal name used in logs and output
    #[arg(long)]
    pub(crate) name: String,
    /// State registration number; required for state certificates
    #[arg(long)]
    pub(crate) state_registration: Option<String>,
    /// Client identifier (defaults to the CNPJ digits)
    #[arg(long)]
    pub(crate) id: Option<String>,
    #[arg(long, value_parser = parse_category)]
    pub(crate) category: Category,
}

#[derive(Args, Debug)]
pub(crate) struct BatchArgs {
    /// JSON file holding an array of clients
    #[arg(long)]
    pub(crate) clients: PathBuf,
    /// Restrict the batch to these categories (repeatable; all when omitted)
    #[arg(long = "category", value_parser = parse_category)]
    pub(crate) categories: Vec<Category>,
}

pub(crate) fn run_classify(args: ClassifyArgs) -> Result<(), AppError> {
    let verdict = StatusClassifier::classify(&args.primary, &args.secondary);
    println!("{}", verdict.label());
    Ok(())
}

pub(crate) async fn run_consult(args: ConsultArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init_with_sink(&config.telemetry, LogSink::Stderr)?;

    let client = client_from_args(args.id, args.name, args.cnpj, args.state_registration);
    let service = build_service(&config.provider, &config.monitor);
    let outcome = service.consult(&client, args.category).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub(crate) async fn run_batch(args: BatchArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init_with_sink(&config.telemetry, LogSink::Stderr)?;

    let clients = load_clients(&args.clients)?;
    let categories = if args.categories.is_empty() {
        Category::ordered().to_vec()
    } else {
        args.categories
    };

    let runner = Arc::new(build_runner(&config.provider, &config.monitor));
    let coordinator = BatchCoordinator::new(runner, BatchConfig::from_config(&config.monitor));

    let cancel = CancellationFlag::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current lookup before stopping");
            interrupt.cancel();
        }
    });

    let sink = |progress: &BatchProgress| {
        if let Some(line) = progress.recent_log.last() {
            println!(
                "[{:>3}%] {}/{} {}",
                progress.percent, progress.completed, progress.total, line
            );
        }
    };
    let report = coordinator
        .run_batch(&clients, &categories, &sink, &cancel)
        .await;

    for line in summary_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

fn client_from_args(
    id: Option<String>,
    name: String,
    cnpj_raw: String,
    state_registration: Option<String>,
) -> Client {
    let id = id.unwrap_or_else(|| cnpj::digits(&cnpj_raw));
    Client {
        id: ClientId(id),
        legal_name: name,
        cnpj: cnpj::format(&cnpj_raw),
        state_registration,
        active: true,
    }
}

fn load_clients(path: &Path) -> Result<Vec<Client>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    let clients: Vec<Client> = serde_json::from_str(&raw)?;
    if clients.is_empty() {
        return Err(AppError::Input(format!(
            "{} does not list any clients",
            path.display()
        )));
    }
    Ok(clients)
}

fn summary_lines(report: &BatchReport) -> Vec<String> {
    let mut lines = vec![format!(
        "\nBatch {}: {} of {} lookups processed",
        if report.cancelled { "cancelled" } else { "finished" },
        report.processed,
        report.planned
    )];
    lines.push(format!(
        "  regular {} | irregular {} | skipped {} | failed {}",
        report.regular, report.irregular, report.skipped, report.failed
    ));
    let elapsed = report.finished_at - report.started_at;
    lines.push(format!("  elapsed {}s", elapsed.num_seconds()));
    lines
}
