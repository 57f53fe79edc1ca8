use std::collections::BTreeSet;
use std::process::ExitCode;

use anyhow::{bail, Context};
use cmp_crypto::{canonicalize, EntryHasher};
use cmp_ledger::{
    corrections_for, record_correction, AuditReport, Auditor, ChainStatus, LedgerConfig,
    LedgerError, LedgerReader, LedgerRecord, LedgerWriter, SqliteLedger,
};
use cmp_types::{Actor, ActorKind, LedgerEntry, Payload};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

/// Resolve configuration: file, then environment, then `--db`.
pub fn load_config(cli: &Cli) -> anyhow::Result<LedgerConfig> {
    let config = match &cli.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    }
    .apply_env();

    Ok(match &cli.db {
        Some(db) => LedgerConfig {
            database_path: db.clone(),
            ..config
        },
        None => config,
    })
}

pub fn run_command(cli: Cli, config: LedgerConfig) -> anyhow::Result<ExitCode> {
    let format = cli.format;
    match cli.command {
        Command::Init(_) => cmd_init(&config, format)?,
        Command::Append(args) => {
            cmd_append(&config, args, format)?;
        }
        Command::Log(args) => cmd_log(&config, args, format)?,
        Command::Show(args) => cmd_show(&config, args, format)?,
        Command::Verify(args) => {
            if !cmd_verify(&config, args, format)?.is_intact() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Correct(args) => {
            cmd_correct(&config, args, format)?;
        }
        Command::Stats(_) => cmd_stats(&config, format)?,
        Command::Config(_) => cmd_config(&config, format)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn open_existing(config: &LedgerConfig) -> anyhow::Result<SqliteLedger> {
    let path = &config.database_path;
    if !path.exists() {
        bail!(
            "no ledger at {}; run `cmp-ledger init` first",
            path.display()
        );
    }
    debug!(path = %path.display(), "opening ledger");
    Ok(config.open_ledger()?)
}

fn parse_data(data: Option<&str>) -> anyhow::Result<Option<Payload>> {
    data.map(|json| Payload::parse(json).context("--data must be a JSON object"))
        .transpose()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn actor_label(actor: &str) -> colored::ColoredString {
    match Actor::from(actor).kind() {
        ActorKind::Agent => actor.cyan(),
        ActorKind::Human => actor.magenta(),
        ActorKind::Other => actor.normal(),
    }
}

fn print_entry(entry: &LedgerEntry) {
    println!(
        "{}  {}",
        format!("#{}", entry.id).yellow().bold(),
        entry.hash.dimmed()
    );
    println!("  Time:   {}", entry.timestamp);
    println!("  Actor:  {}", actor_label(&entry.actor));
    println!("  Action: {}", entry.action.bold());
    println!("  Prev:   {}", entry.prev_hash.dimmed());
    println!("  Data:   {}", canonicalize(entry.data.as_ref()));
}

fn print_oneline(entry: &LedgerEntry) {
    println!(
        "{} {} {} {}",
        format!("#{}", entry.id).yellow(),
        entry.short_hash().dimmed(),
        actor_label(&entry.actor),
        entry.action
    );
}

fn cmd_init(config: &LedgerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = config.open_ledger()?;
    let count = ledger.count()?;
    ledger.close()?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "database_path": config.database_path,
            "entries": count,
        })),
        OutputFormat::Text => {
            println!(
                "{} Ledger ready at {}",
                "✓".green().bold(),
                config.database_path.display().to_string().bold()
            );
            println!("  Entries: {count}");
            Ok(())
        }
    }
}

fn cmd_append(
    config: &LedgerConfig,
    args: AppendArgs,
    format: OutputFormat,
) -> anyhow::Result<LedgerEntry> {
    let data = parse_data(args.data.as_deref())?;
    let ledger = open_existing(config)?;
    let entry = ledger.append(&args.actor, &args.action, data)?;

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => {
            println!("{} Entry appended", "✓".green().bold());
            print_entry(&entry);
        }
    }
    Ok(entry)
}

fn cmd_log(config: &LedgerConfig, args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = open_existing(config)?;
    let records = ledger.read_recent_records(args.limit)?;

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Text if records.is_empty() => println!("Ledger is empty."),
        OutputFormat::Text => {
            for record in records.iter().rev() {
                match record {
                    LedgerRecord::Entry(entry) if args.oneline => print_oneline(entry),
                    LedgerRecord::Entry(entry) => print_entry(entry),
                    LedgerRecord::Undecodable { id, reason } => println!(
                        "{} {}",
                        format!("#{id}").yellow(),
                        format!("undecodable: {reason}").red()
                    ),
                }
            }
        }
    }
    Ok(())
}

fn cmd_show(config: &LedgerConfig, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = open_existing(config)?;
    let entry = ledger
        .get(args.id)?
        .ok_or(LedgerError::NotFound { id: args.id })?;
    let corrections = corrections_for(&ledger, args.id)?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "entry": entry,
            "corrections": corrections,
        }))?,
        OutputFormat::Text => {
            print_entry(&entry);
            for fix in &corrections {
                println!(
                    "  {} by {} in {}",
                    "corrected".yellow(),
                    actor_label(&fix.actor),
                    format!("#{}", fix.id).yellow()
                );
            }
        }
    }
    Ok(())
}

fn cmd_verify(
    config: &LedgerConfig,
    args: VerifyArgs,
    format: OutputFormat,
) -> anyhow::Result<AuditReport> {
    let ledger = open_existing(config)?;
    let report = Auditor::audit(&ledger, args.batch)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => match &report.status {
            ChainStatus::Intact { verified } => {
                println!("{} Hash chain intact", "✓".green().bold());
                println!("  Entries verified: {verified}");
                if let Some((id, hash)) = &report.verified_head {
                    println!("  Head: {} {}", format!("#{id}").yellow(), hash.dimmed());
                }
            }
            ChainStatus::Broken(brk) => {
                println!("{} Hash chain broken", "✗".red().bold());
                println!("  {}", brk.to_string().red());
                match &report.verified_head {
                    Some((id, _)) => println!("  Last intact entry: #{id}"),
                    None => println!("  No intact prefix"),
                }
            }
        },
    }
    Ok(report)
}

fn cmd_correct(
    config: &LedgerConfig,
    args: CorrectArgs,
    format: OutputFormat,
) -> anyhow::Result<LedgerEntry> {
    let data = parse_data(args.data.as_deref())?;
    let ledger = open_existing(config)?;
    let entry = record_correction(&ledger, &args.actor, args.id, &args.reason, data)?;

    match format {
        OutputFormat::Json => print_json(&entry)?,
        OutputFormat::Text => {
            println!(
                "{} Correction to {} recorded",
                "✓".green().bold(),
                format!("#{}", args.id).yellow()
            );
            print_entry(&entry);
        }
    }
    Ok(entry)
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct Stats {
    entries: u64,
    agents: usize,
    humans: usize,
    corrections: usize,
    /// Rows that no longer decode; `cmp-ledger verify` reports where.
    undecodable: usize,
    head: Option<(u64, String)>,
}

const STATS_BATCH: usize = 1_000;

fn collect_stats<R: LedgerReader>(reader: &R) -> anyhow::Result<Stats> {
    let mut stats = Stats::default();
    let mut actors = BTreeSet::new();
    let mut cursor = 0;

    loop {
        let records = reader.read_records_after(cursor, STATS_BATCH)?;
        let Some(last) = records.last() else {
            break;
        };
        cursor = last.id();

        for record in records {
            stats.entries += 1;
            let entry = match record {
                LedgerRecord::Entry(entry) => entry,
                LedgerRecord::Undecodable { .. } => {
                    stats.undecodable += 1;
                    continue;
                }
            };
            if entry.action == cmp_ledger::CORRECTION_ACTION {
                stats.corrections += 1;
            }
            stats.head = Some((entry.id, entry.hash));
            actors.insert(entry.actor);
        }
    }

    for actor in &actors {
        match Actor::from(actor.as_str()).kind() {
            ActorKind::Agent => stats.agents += 1,
            ActorKind::Human => stats.humans += 1,
            ActorKind::Other => {}
        }
    }
    Ok(stats)
}

fn cmd_stats(config: &LedgerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = open_existing(config)?;
    let stats = collect_stats(&ledger)?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Entries:     {}", stats.entries.to_string().bold());
            println!("Agents:      {}", stats.agents);
            println!("Humans:      {}", stats.humans);
            println!("Corrections: {}", stats.corrections);
            if stats.undecodable > 0 {
                println!("Undecodable: {}", stats.undecodable.to_string().red());
            }
            if let Some((id, hash)) = &stats.head {
                println!("Head:        {} {}", format!("#{id}").yellow(), hash.dimmed());
            }
        }
    }
    Ok(())
}

/// The effective configuration plus the entry hash domain it implies.
#[derive(Serialize)]
struct EffectiveConfig<'a> {
    #[serde(flatten)]
    ledger: &'a LedgerConfig,
    hash_domain: &'a str,
}

fn effective(config: &LedgerConfig) -> EffectiveConfig<'_> {
    EffectiveConfig {
        ledger: config,
        hash_domain: EntryHasher::LEDGER_V1.domain(),
    }
}

fn cmd_config(config: &LedgerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let shown = effective(config);
    match format {
        OutputFormat::Json => print_json(&shown),
        OutputFormat::Text => {
            print!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}
