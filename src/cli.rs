use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::backup::{BackupManager, AUTO_LABEL};
use crate::config::EngineConfig;
use crate::db;
use crate::diff;
use crate::error::EngineError;
use crate::monitor;
use crate::report::RunSummary;
use crate::restore::{self, RestorePlan};
use crate::schema;
use crate::snapshot::{KeyRange, SnapshotReader};
use crate::validate;

#[derive(Parser, Debug)]
#[command(
    name = "classroom-restore",
    version,
    about = "Snapshot reconciliation and restore for the classroom data store"
)]
pub struct Cli {
    /// Path to the live database; overrides the config file
    #[arg(long, global = true)]
    pub live: Option<PathBuf>,

    /// Path to backup_config.json
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit the structured summary as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show snapshot rows missing from the live table; never writes
    Diff {
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Reconcile a table against a snapshot; dry-run unless --apply is given
    Restore {
        #[command(flatten)]
        args: PipelineArgs,

        /// Actually insert the validated rows
        #[arg(long)]
        apply: bool,

        /// Exit 3 if any candidate was rejected
        #[arg(long)]
        strict: bool,
    },
    /// Backup lifecycle: snapshot creation, listing, staleness status
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Table to reconcile
    #[arg(long)]
    pub table: String,

    /// Snapshot id from `backup list`, or a path to a snapshot file
    #[arg(long)]
    pub snapshot: String,

    /// Inclusive range A..B applied to the date column
    #[arg(long)]
    pub dates: Option<String>,

    /// Column the --dates range filters on
    #[arg(long, default_value = "date")]
    pub date_column: String,

    /// Explicit unique-key columns, comma separated, for tables where no
    /// key can be discovered
    #[arg(long, value_delimiter = ',')]
    pub key: Option<Vec<String>>,
}

pub fn run(cli: Cli) -> i32 {
    let config = match EngineConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return 1;
        }
    };
    let live_path = cli.live.clone().unwrap_or_else(|| config.live_path.clone());
    let manager = BackupManager::new(config.backup_config());

    match cli.command {
        Command::Diff { ref args } => run_pipeline(&cli, args, &live_path, &manager, false, false),
        Command::Restore {
            ref args,
            apply,
            strict,
        } => run_pipeline(&cli, args, &live_path, &manager, apply, strict),
        Command::Backup { ref action } => run_backup(&cli, action, &live_path, &manager, &config),
    }
}

fn run_pipeline(
    cli: &Cli,
    args: &PipelineArgs,
    live_path: &std::path::Path,
    manager: &BackupManager,
    apply: bool,
    strict: bool,
) -> i32 {
    match pipeline(cli, args, live_path, manager, apply, strict) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn pipeline(
    cli: &Cli,
    args: &PipelineArgs,
    live_path: &std::path::Path,
    manager: &BackupManager,
    apply: bool,
    strict: bool,
) -> anyhow::Result<i32> {
    let range = match &args.dates {
        Some(spec) => Some(parse_date_range(spec, &args.date_column)?),
        None => None,
    };

    let conn = if apply {
        db::open_live(live_path)?
    } else {
        db::open_live_readonly(live_path)?
    };

    let live_schema = schema::introspect_table(&conn, &args.table, args.key.as_deref())?;

    let (snapshot_id, snapshot_path) =
        manager
            .resolve(&args.snapshot)
            .map_err(|_| EngineError::SnapshotUnreadable {
                path: PathBuf::from(&args.snapshot),
                reason: "not a known snapshot id or an existing file".to_string(),
            })?;
    let reader = SnapshotReader::open(snapshot_id.clone(), &snapshot_path)?;
    let snap_schema = reader.table_schema(&args.table, &live_schema.key_columns, range.as_ref())?;

    let live_keys = diff::live_key_set(&conn, &live_schema)?;
    let mut candidates = reader.scan(&snap_schema, range.as_ref(), |records| {
        diff::diff_candidates(&live_keys, &live_schema.key_columns, records)
    })?;

    let checks = validate::foreign_key_checks(&conn, &args.table)?;
    validate::validate(&mut candidates, &checks)?;

    let mode = if apply { "restore" } else { "diff" };
    let mut summary = RunSummary::new(mode, &args.table, &snapshot_id, &candidates);

    if apply {
        let plan = RestorePlan::from_candidates(&args.table, &candidates);
        match restore::execute(&conn, &live_schema, plan, manager, None) {
            Ok(outcome) => summary = summary.with_outcome(&outcome),
            Err(e) => {
                // The audit summary goes out even when the run fails.
                emit(cli, &summary)?;
                return Err(e.into());
            }
        }
    }

    emit(cli, &summary)?;
    if strict && summary.rejected() > 0 {
        return Ok(3);
    }
    Ok(0)
}

fn run_backup(
    cli: &Cli,
    action: &BackupAction,
    live_path: &std::path::Path,
    manager: &BackupManager,
    config: &EngineConfig,
) -> i32 {
    let result = match action {
        BackupAction::Create => backup_create(cli, live_path, manager),
        BackupAction::List => backup_list(cli, manager),
        BackupAction::Status => {
            return match monitor::check(manager, config.thresholds(), Utc::now()) {
                Ok(status) => {
                    if cli.json {
                        match serde_json::to_string_pretty(&status) {
                            Ok(text) => println!("{}", text),
                            Err(e) => {
                                eprintln!("error: {}", e);
                                return 1;
                            }
                        }
                    } else {
                        match (&status.latest_id, status.age_hours) {
                            (Some(id), Some(age)) => println!(
                                "{}: latest snapshot {} is {:.1}h old ({} total)",
                                status.health, id, age, status.snapshot_count
                            ),
                            _ => println!("{}: no snapshots found", status.health),
                        }
                    }
                    status.health.exit_code()
                }
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    1
                }
            };
        }
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for(&e)
        }
    }
}

fn backup_create(
    cli: &Cli,
    live_path: &std::path::Path,
    manager: &BackupManager,
) -> anyhow::Result<()> {
    let conn = db::open_live_readonly(live_path)?;
    let entry = manager.create_snapshot(&conn, AUTO_LABEL)?;
    // Retention is always the last step of a cycle, never interleaved with
    // creation.
    let removed = manager.apply_retention(Utc::now())?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "created": entry,
                "retentionRemoved": removed.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            }))?
        );
    } else {
        println!("created snapshot {} ({} bytes)", entry.id, entry.size);
        for gone in removed {
            println!("retention removed {}", gone.id);
        }
    }
    Ok(())
}

fn backup_list(cli: &Cli, manager: &BackupManager) -> anyhow::Result<()> {
    let entries = manager.list_snapshots()?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no snapshots");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  {} bytes  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.size,
            entry.label
        );
    }
    Ok(())
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Copy the live database into a new timestamped snapshot
    Create,
    /// List snapshots, newest first
    List,
    /// Classify backup staleness; exit 0 healthy, 1 warning, 2 inactive
    Status,
}

fn parse_date_range(spec: &str, column: &str) -> anyhow::Result<KeyRange> {
    let (lo, hi) = spec
        .split_once("..")
        .with_context(|| format!("invalid range {:?}, expected A..B", spec))?;
    if lo.is_empty() || hi.is_empty() {
        anyhow::bail!("invalid range {:?}, expected A..B", spec);
    }
    Ok(KeyRange {
        column: column.to_string(),
        lo: lo.to_string(),
        hi: hi.to_string(),
    })
}

fn emit(cli: &Cli, summary: &RunSummary) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", summary.render_text());
    }
    Ok(())
}

/// Exit-code policy: structural schema errors are 2, everything else fatal
/// is 1. Strict-mode rejections (3) are handled by the pipeline itself.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<EngineError>() {
        Some(e) if e.is_structural() => 2,
        _ => 1,
    }
}
