use crate::commands::{run_batch, run_classify, run_consult, BatchArgs, ClassifyArgs, ConsultArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use fiscal_monitor::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Fiscal Monitor",
    about = "Track federal, state, and payroll-fund certificates for client companies",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Classify raw certificate text without calling the provider
    Classify(ClassifyArgs),
    /// Run one consultation for one company and print the result as JSON
    Consult(ConsultArgs),
    /// Run a rate-limited batch over the clients listed in a JSON file
    Batch(BatchArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Classify(args) => run_classify(args),
        Command::Consult(args) => run_consult(args).await,
        Command::Batch(args) => run_batch(args).await,
    }
}
