#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use jm_core::ids::{HolderId, LockName, RunKind};
use jm_storage::LeaseRow;
use jm_sync::clock::format_ms;
use jm_sync::shutdown::install_shutdown_handler;
use jm_sync::{
    ConfigLoader, LeaseManager, RunLedger, StoreHandle, SyncConfig, SyncCoordinator, SyncError,
    SyncOutcome, SystemClock, logging,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;
const EXIT_THROTTLED: u8 = 3;
const EXIT_BUSY: u8 = 4;

/// Bytes of child stdout kept in the run result.
const MAX_CAPTURED_STDOUT: usize = 16 * 1024;

#[derive(Parser, Debug)]
#[command(name = "jm-syncctl")]
#[command(version)]
#[command(about = "Inspect and drive lease-coordinated sync runs")]
#[command(propagate_version = true)]
struct Cli {
    /// TOML config file (optional; JM_* env vars override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of the shared database (overrides config)
    #[arg(long, global = true)]
    database_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lease inspection and manual release
    Lease {
        #[command(subcommand)]
        command: LeaseCommands,
    },

    /// Run history, throttle checks and abandoned-run sweeps
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },

    /// Run a command under the lease and throttle for <kind>
    Run(RunArgs),
}

#[derive(Subcommand, Debug)]
enum LeaseCommands {
    /// Show who holds a lock right now
    Status { lock_name: String },

    /// Lease rows, newest first
    History {
        lock_name: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Release a lease on behalf of a holder (e.g. a wedged replica)
    Release {
        lock_name: String,
        #[arg(long)]
        holder_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum RunsCommands {
    /// Run records, newest first
    History {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Ask the throttle gate whether <kind> may run now
    CanRun {
        kind: String,
        /// Defaults to minimum_interval_minutes from config
        #[arg(long)]
        interval_minutes: Option<u64>,
    },

    /// Mark stale `running` records whose lock is free as failed
    Sweep {
        /// Defaults to stale_run_after_minutes from config
        #[arg(long)]
        older_than_minutes: Option<u64>,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    kind: String,

    /// Scope entry as key=value; repeatable
    #[arg(long = "scope", value_parser = parse_scope_pair)]
    scope: Vec<(String, String)>,

    /// Skip the minimum-interval check (the lease is still taken)
    #[arg(long)]
    bypass_throttle: bool,

    #[arg(long)]
    lease_minutes: Option<u64>,

    #[arg(long)]
    interval_minutes: Option<u64>,

    /// Command to execute as the protected work
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn parse_scope_pair(raw: &str) -> Result<(String, String), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("expected key=value, got {raw:?}"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("scope key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(error = %err, "jm-syncctl failed");
            eprintln!("error: {err}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

struct Context {
    config: SyncConfig,
    leases: LeaseManager,
    ledger: RunLedger,
}

async fn run_cli(cli: Cli) -> Result<u8, SyncError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let mut config = loader.load()?;
    if let Some(dir) = cli.database_dir {
        config.database_dir = dir;
    }
    logging::init(&config.logging)?;

    let store = StoreHandle::open(&config.database_dir, config.busy_timeout())?;
    let clock = Arc::new(SystemClock);
    let ctx = Context {
        leases: LeaseManager::new(store.clone(), clock.clone()),
        ledger: RunLedger::new(store, clock),
        config,
    };

    match cli.command {
        Commands::Lease { command } => lease_command(&ctx, command).await,
        Commands::Runs { command } => runs_command(&ctx, command).await,
        Commands::Run(args) => run_command(ctx, args).await,
    }
}

async fn lease_command(ctx: &Context, command: LeaseCommands) -> Result<u8, SyncError> {
    match command {
        LeaseCommands::Status { lock_name } => {
            let lock_name = LockName::try_new(lock_name)?;
            let status = ctx.leases.is_held(&lock_name).await?;
            print_json(&status)?;
        }
        LeaseCommands::History { lock_name, limit } => {
            let lock_name = lock_name.map(LockName::try_new).transpose()?;
            let rows = ctx.leases.history(lock_name.as_ref(), limit).await?;
            let rows: Vec<Value> = rows.iter().map(lease_row_json).collect();
            print_json(&rows)?;
        }
        LeaseCommands::Release {
            lock_name,
            holder_id,
        } => {
            let lock_name = LockName::try_new(lock_name)?;
            let holder_id = HolderId::try_new(holder_id)?;
            let released = ctx.leases.release(&lock_name, &holder_id).await?;
            print_json(&json!({ "lock_name": lock_name.as_str(), "released": released }))?;
        }
    }
    Ok(EXIT_OK)
}

async fn runs_command(ctx: &Context, command: RunsCommands) -> Result<u8, SyncError> {
    match command {
        RunsCommands::History { kind, limit } => {
            let kind = kind.map(RunKind::try_new).transpose()?;
            let records = ctx.ledger.get_history(kind.as_ref(), limit).await?;
            print_json(&records)?;
            Ok(EXIT_OK)
        }
        RunsCommands::CanRun {
            kind,
            interval_minutes,
        } => {
            let kind = RunKind::try_new(kind)?;
            let minutes = interval_minutes.unwrap_or(ctx.config.minimum_interval_minutes);
            let decision = ctx
                .ledger
                .can_run(&kind, Duration::from_secs(minutes.saturating_mul(60)))
                .await?;
            print_json(&decision)?;
            Ok(if decision.allowed {
                EXIT_OK
            } else {
                EXIT_THROTTLED
            })
        }
        RunsCommands::Sweep { older_than_minutes } => {
            let older_than = match older_than_minutes {
                Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                None => ctx.config.stale_run_after(),
            };
            let report = ctx.ledger.sweep_abandoned(older_than).await?;
            print_json(&report)?;
            Ok(EXIT_OK)
        }
    }
}

async fn run_command(ctx: Context, args: RunArgs) -> Result<u8, SyncError> {
    let kind = RunKind::try_new(args.kind)?;
    let scope = if args.scope.is_empty() {
        Value::Null
    } else {
        Value::Object(
            args.scope
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect::<Map<String, Value>>(),
        )
    };

    let mut policy = ctx
        .config
        .default_policy()
        .bypass_throttle(args.bypass_throttle);
    if let Some(minutes) = args.lease_minutes {
        policy.lease_duration = minutes_to_duration(minutes)?;
    }
    if let Some(minutes) = args.interval_minutes {
        policy.minimum_interval = minutes_to_duration(minutes)?;
    }

    let shutdown = install_shutdown_handler();
    let releaser = ctx.leases.release_on_shutdown(shutdown.clone());
    let coordinator = SyncCoordinator::new(ctx.leases, ctx.ledger);

    let command = args.command;
    let work_shutdown = shutdown.clone();
    let outcome = coordinator
        .run(&kind, &scope, &policy, move || {
            execute(command, work_shutdown)
        })
        .await;
    releaser.abort();
    let outcome = outcome?;

    print_json(&outcome)?;
    Ok(match outcome {
        SyncOutcome::Completed { .. } => EXIT_OK,
        SyncOutcome::Failed { .. } => EXIT_FAILED,
        SyncOutcome::Throttled { .. } => EXIT_THROTTLED,
        SyncOutcome::Busy { .. } => EXIT_BUSY,
    })
}

/// Runs the child to completion, or kills it when `shutdown` fires.
async fn execute(command: Vec<String>, shutdown: CancellationToken) -> Result<Value, String> {
    let Some((program, rest)) = command.split_first() else {
        return Err("no command given".to_string());
    };
    let child = tokio::process::Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| format!("failed to start {program}: {err}"))?;

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|err| format!("failed to wait for {program}: {err}"))?
        }
        _ = shutdown.cancelled() => {
            return Err("interrupted by shutdown".to_string());
        }
    };

    let stdout = tail_lossy(&output.stdout, MAX_CAPTURED_STDOUT);
    if !output.status.success() {
        return Err(format!("{program} exited with {}", output.status));
    }
    Ok(json!({
        "command": command,
        "exit_code": output.status.code(),
        "stdout": stdout,
    }))
}

fn tail_lossy(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

fn minutes_to_duration(minutes: u64) -> Result<Duration, SyncError> {
    if minutes == 0 {
        return Err(SyncError::InvalidInput("minutes must be greater than 0".to_string()));
    }
    Ok(Duration::from_secs(minutes.saturating_mul(60)))
}

fn lease_row_json(row: &LeaseRow) -> Value {
    json!({
        "id": row.id,
        "lock_name": row.lock_name,
        "holder_id": row.holder_id,
        "is_active": row.is_active,
        "acquired_at": format_ms(row.acquired_at_ms),
        "expires_at": format_ms(row.expires_at_ms),
        "renewed_at": format_ms(row.renewed_at_ms),
        "released_at": row.released_at_ms.map(format_ms),
        "release_reason": row.release_reason,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), SyncError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
