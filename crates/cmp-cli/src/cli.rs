use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cmp-ledger",
    about = "CMP append-only hash-chained audit ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger database, overriding config and environment
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the ledger database if it does not exist
    Init(InitArgs),
    /// Append an entry to the chain
    Append(AppendArgs),
    /// Show the most recent entries
    Log(LogArgs),
    /// Show one entry and any corrections to it
    Show(ShowArgs),
    /// Verify hash-chain integrity
    Verify(VerifyArgs),
    /// Record a correction to an earlier entry
    Correct(CorrectArgs),
    /// Summarize the ledger
    Stats(StatsArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct InitArgs {}

#[derive(Args)]
pub struct AppendArgs {
    #[arg(long)]
    pub actor: String,
    #[arg(long)]
    pub action: String,
    /// Payload as a JSON object
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args)]
pub struct LogArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub id: u64,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Entries read per batch
    #[arg(long, default_value_t = cmp_ledger::DEFAULT_AUDIT_BATCH)]
    pub batch: usize,
}

#[derive(Args)]
pub struct CorrectArgs {
    /// Id of the entry being corrected
    pub id: u64,
    #[arg(long)]
    pub actor: String,
    #[arg(long)]
    pub reason: String,
    /// Corrected payload as a JSON object
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Args)]
pub struct StatsArgs {}

#[derive(Args)]
pub struct ConfigArgs {}
