// elspeth-cli/src/main.rs
// ============================================================================
// Module: Elspeth CLI
// Description: Operational entry point driving the engine against a typed
//              run profile: run, resume, runpack export, runpack verify.
// Purpose: Give an operator a small, scriptable surface for one-off runs and
//          audit bundle handling, with no YAML config layer or HTTP surface.
// Dependencies: clap, elspeth-core, elspeth-plugins, elspeth-store-sqlite,
//               tokio, tracing, tracing-subscriber
// ============================================================================

//! ## Overview
//! `elspeth` accepts a JSON run profile (see [`profile::Profile`]), compiles
//! it into an [`elspeth_core::core::graph::ExecutionGraph`] plus one plugin
//! per node, and drives it with [`elspeth_core::runtime::engine::Engine`]
//! against a `SQLite`-backed [`elspeth_store_sqlite::SqliteRunRecorder`].
//! `runpack export`/`runpack verify` operate on the signed audit bundle that
//! recorder can produce, independent of any in-flight run.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod error;
mod profile;
mod runpack;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use elspeth_core::core::identifiers::NodeId;
use elspeth_core::core::identifiers::RunId;
use elspeth_core::core::model::Run;
use elspeth_core::core::model::RunStatus;
use elspeth_core::core::payload::InMemoryPayloadStore;
use elspeth_core::core::time::Timestamp;
use elspeth_core::runtime::engine::Engine;
use elspeth_core::runtime::engine::EngineConfig;
use elspeth_store_sqlite::SqliteRunRecorder;
use elspeth_store_sqlite::SqliteStoreConfig;
use elspeth_store_sqlite::SqliteStoreMode;
use elspeth_store_sqlite::SqliteSyncMode;

use crate::error::CliError;
use crate::profile::Profile;

// ============================================================================
// SECTION: CLI Surface
// ============================================================================

/// A small operational CLI for driving Elspeth pipeline runs.
#[derive(Debug, Parser)]
#[command(name = "elspeth", about = "Run, resume, and audit Elspeth dataflow pipelines")]
struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Starts a brand-new run from a profile.
    Run {
        /// Path to a JSON run profile.
        #[arg(long)]
        profile: PathBuf,
    },
    /// Continues a run whose record already exists in the store.
    Resume {
        /// Path to a JSON run profile.
        #[arg(long)]
        profile: PathBuf,
    },
    /// Audit bundle operations.
    Runpack {
        /// The runpack action to perform.
        #[command(subcommand)]
        action: RunpackAction,
    },
}

#[derive(Debug, Subcommand)]
enum RunpackAction {
    /// Exports a completed run's audit trail to a signed bundle file.
    Export {
        /// Path to the `SQLite` audit database.
        #[arg(long)]
        store: PathBuf,
        /// Run id to export.
        #[arg(long)]
        run_id: String,
        /// Destination path for the bundle JSON file.
        #[arg(long)]
        out: PathBuf,
        /// Hex-encoded HMAC signing key. Omit to export an unsigned bundle.
        #[arg(long)]
        sign_key_hex: Option<String>,
    },
    /// Independently re-verifies a previously exported bundle file.
    Verify {
        /// Path to the bundle JSON file.
        #[arg(long)]
        bundle: PathBuf,
        /// Hex-encoded HMAC signing key the bundle was signed with.
        #[arg(long)]
        sign_key_hex: String,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    install_tracing();
    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => emit_error(&err),
    }
}

/// Logs and prints a command failure, returning the process's failure code.
fn emit_error(err: &CliError) -> ExitCode {
    tracing::error!(error = %err, "elspeth command failed");
    let _ = write_stderr_line(&format!("error: {err}"));
    ExitCode::FAILURE
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::Io(err.to_string()))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> Result<(), CliError> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}").map_err(|err| CliError::Io(err.to_string()))
}

/// Installs a `tracing-subscriber` `fmt` layer honoring `RUST_LOG`, default
/// `info`.
fn install_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Routes a parsed [`Command`] to its handler.
async fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Run { profile } => run_profile(&profile, false).await,
        Command::Resume { profile } => run_profile(&profile, true).await,
        Command::Runpack { action } => runpack_action(action),
    }
}

// ============================================================================
// SECTION: Run / Resume
// ============================================================================

/// Compiles `profile_path` and drives it through the engine. When
/// `allow_existing` is set, an already-open run under the same id is
/// continued rather than rejected.
async fn run_profile(profile_path: &PathBuf, allow_existing: bool) -> Result<(), CliError> {
    let profile = Profile::from_json_file(profile_path)?;
    let (graph, plugins) = profile.compile()?;
    let run_id = RunId::new(profile.run_id.clone());
    let source_node = NodeId::new(profile.source_node.clone());

    let store_config = SqliteStoreConfig {
        path: profile.store_path.clone(),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    let recorder = Arc::new(SqliteRunRecorder::open(&store_config)?);
    let payload_store = Arc::new(InMemoryPayloadStore::new());

    let existing_status = recorder.run_status(&run_id)?;
    tracing::info!(run_id = %run_id, ?existing_status, allow_existing, "starting elspeth run");

    let mut engine = Engine::new(run_id.clone(), graph, plugins, recorder.clone(), payload_store, EngineConfig::default());

    match existing_status {
        None => {
            let run = Run {
                run_id: run_id.clone(),
                status: RunStatus::Running,
                started_at: Timestamp::now(),
                completed_at: None,
                config_hash: String::new(),
                settings_json: serde_json::Value::Null,
                canonical_version: "elspeth-canon-v1".to_string(),
            };
            engine.open(&run)?;
        }
        Some(RunStatus::Running) if allow_existing => {
            // The run record, its nodes, and its edges already exist from a
            // prior attempt. A later engine revision that tracks per-token
            // checkpoints will skip already-completed rows here; today this
            // replays the source from the beginning under the same run id.
            tracing::warn!(
                run_id = %run_id,
                "resuming a running run replays the source; per-token checkpoint skip is not yet implemented"
            );
        }
        Some(RunStatus::Running) => {
            return Err(CliError::Recorder(elspeth_core::interfaces::RecorderError::Constraint(format!(
                "run {run_id} already exists; use `resume` to continue it"
            ))));
        }
        Some(status) => {
            return Err(CliError::Recorder(elspeth_core::interfaces::RecorderError::Constraint(format!(
                "run {run_id} is already {status:?}; nothing to resume"
            ))));
        }
    }

    let summary = engine.run_source(&source_node).await?;
    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        pending = summary.pending,
        discarded = summary.discarded,
        batched = summary.batched,
        "run finished"
    );
    write_stdout_line(&format!(
        "completed={} failed={} pending={} discarded={} batched={}",
        summary.completed, summary.failed, summary.pending, summary.discarded, summary.batched
    ))?;
    Ok(())
}

// ============================================================================
// SECTION: Runpack
// ============================================================================

/// Executes one `runpack` subcommand.
fn runpack_action(action: RunpackAction) -> Result<(), CliError> {
    match action {
        RunpackAction::Export { store, run_id, out, sign_key_hex } => {
            let store_config = SqliteStoreConfig {
                path: store,
                busy_timeout_ms: 5_000,
                journal_mode: SqliteStoreMode::Wal,
                sync_mode: SqliteSyncMode::Full,
            };
            let recorder = SqliteRunRecorder::open(&store_config)?;
            let sign_key = sign_key_hex.map(|hex| decode_hex(&hex)).transpose()?;
            let bundle = recorder.export_run(&RunId::new(run_id), sign_key.as_deref())?;
            runpack::write_bundle(&out, &bundle)?;
            write_stdout_line(&format!("exported {} records to {}", bundle.records.len(), out.display()))?;
            Ok(())
        }
        RunpackAction::Verify { bundle, sign_key_hex } => {
            let sign_key = decode_hex(&sign_key_hex)?;
            let loaded = runpack::read_bundle(&bundle)?;
            runpack::verify_bundle(&loaded, &sign_key)?;
            write_stdout_line(&format!("bundle verified: {} records, chain intact", loaded.records.len()))?;
            Ok(())
        }
    }
}

/// Decodes a lowercase- or uppercase-hex string into raw bytes.
fn decode_hex(text: &str) -> Result<Vec<u8>, CliError> {
    if text.len() % 2 != 0 || !text.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(CliError::Io(format!("not valid hex: {text}")));
    }
    (0 .. text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i .. i + 2], 16).map_err(|err| CliError::Io(err.to_string())))
        .collect()
}
