//! fundsnap - incremental funding snapshot sync
//!
//! Intended to run from a scheduler: one invocation is one sync run, and the
//! exit status is the only signal (0 success, 1 failure).

use clap::{Parser, Subcommand};
use fundsnap_common::Result;
use fundsnap_config::{resolve_config, QueryBundle, QueryKind, SyncConfig};
use fundsnap_core::exit_codes::ExitCode;
use fundsnap_core::logging::build_dispatch;
use fundsnap_core::{BigQueryAggregator, SyncEngine, SyncMode};
use fundsnap_store::SnapshotStore;
use std::path::PathBuf;
use tracing::{info, Dispatch};

#[derive(Parser)]
#[command(name = "fundsnap")]
#[command(about = "Keep a local funding snapshot in sync with the warehouse")]
#[command(version)]
struct Cli {
    /// Config file (otherwise FUNDSNAP_CONFIG, ./fundsnap.toml, user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the snapshot from the configured historical start
    Full,
    /// Append rows inserted since the snapshot's watermark
    Incremental,
}

impl Commands {
    fn mode(&self) -> SyncMode {
        match self {
            Commands::Full => SyncMode::Full,
            Commands::Incremental => SyncMode::Incremental,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() {
                ExitCode::Failure
            } else {
                ExitCode::Success
            };
            std::process::exit(code.as_i32());
        }
    };
    std::process::exit(run(cli).as_i32());
}

fn run(cli: Cli) -> ExitCode {
    let (config, source) = match resolve_config(cli.config.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("fundsnap: {e}");
            return ExitCode::Failure;
        }
    };
    let (dispatch, log_path) = match build_dispatch(&config.logging) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("fundsnap: cannot set up logging: {e}");
            return ExitCode::Failure;
        }
    };

    let mode = cli.command.mode();
    let engine = tracing::dispatcher::with_default(&dispatch, || {
        info!(
            config = %source,
            log_file = %log_path.display(),
            %mode,
            compression = %config.compression,
            "fundsnap starting"
        );
        build_engine(&config, mode, dispatch.clone()).map_err(|e| {
            tracing::error!(code = e.code(), error = %e, "run aborted before sync");
            e
        })
    });
    let Ok(engine) = engine else {
        return ExitCode::Failure;
    };

    let result = engine.run(mode);
    if let Ok(report) = &result {
        if let Ok(summary) = serde_json::to_string(report) {
            println!("{summary}");
        }
    }
    ExitCode::from(&result)
}

fn build_engine(
    config: &SyncConfig,
    mode: SyncMode,
    dispatch: Dispatch,
) -> Result<SyncEngine<BigQueryAggregator>> {
    let (kind, override_path) = match mode {
        SyncMode::Full => (QueryKind::Full, config.queries.full_path.as_deref()),
        SyncMode::Incremental => (
            QueryKind::Incremental,
            config.queries.incremental_path.as_deref(),
        ),
    };
    let bundle = QueryBundle::resolve(override_path, kind, &config.warehouse.source_dataset)?;
    info!(query = %bundle.label(), sha256 = %bundle.sql_hash, "query bundle loaded");

    let aggregator = BigQueryAggregator::from_config(&config.warehouse, bundle)?;
    let store = SnapshotStore::new(&config.snapshot_path).with_compression(config.compression);
    Ok(SyncEngine::new(
        store,
        aggregator,
        config.full_load_start,
        dispatch,
    ))
}
