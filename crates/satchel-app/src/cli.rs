//! Command-line front end: list and pull forms from a Collect directory.

use std::env;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use satchel_config::{
    ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_MAX_PARALLEL, ENV_PREFERENCES, ENV_WORKSPACE,
};
use satchel_core::{RecordId, SourceKind, TransferRecord};
use satchel_events::{Event, EventChannel};
use satchel_jobs::BatchSummary;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::bootstrap::{build_session, init_logging, load_settings};
use crate::error::AppError;
use crate::session::PullSession;

#[derive(Parser)]
#[command(
    name = "satchel",
    version,
    about = "Pull forms and submissions into a local workspace"
)]
struct Cli {
    /// Directory forms are pulled into.
    #[arg(long, global = true, env = ENV_WORKSPACE)]
    workspace: Option<PathBuf>,
    /// Preference file; defaults to `preferences.json` in the workspace.
    #[arg(long, global = true, env = ENV_PREFERENCES)]
    preferences: Option<PathBuf>,
    /// Forms pulled concurrently.
    #[arg(long, global = true, env = ENV_MAX_PARALLEL)]
    max_parallel: Option<usize>,
    #[arg(long, global = true, env = ENV_LOG_LEVEL)]
    log_level: Option<String>,
    /// `json` or `pretty`.
    #[arg(long, global = true, env = ENV_LOG_FORMAT)]
    log_format: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the forms of the source.
    Forms(SourceArgs),
    /// Pull the chosen forms into the workspace.
    Pull(PullArgs),
    /// Forget the stored source.
    Reset,
}

#[derive(Args)]
struct SourceArgs {
    /// Collect directory to read; defaults to the source of the previous run.
    #[arg(long)]
    collect_dir: Option<PathBuf>,
}

#[derive(Args)]
struct PullArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Form id to pull; repeatable.
    #[arg(long = "form", value_name = "FORM_ID")]
    forms: Vec<String>,
    /// Pull every listed form.
    #[arg(long, conflicts_with = "forms")]
    all: bool,
}

#[derive(Debug)]
enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

type CliResult<T> = Result<T, CliError>;

impl CliError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

/// Parse arguments, run the command, and return the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let settings = load_settings(|name| settings_value(&cli, name)).map_err(CliError::failure)?;
    init_logging(&settings).map_err(CliError::failure)?;
    let session = build_session(&settings, EventChannel::new()).map_err(CliError::failure)?;

    match cli.command {
        Command::Forms(args) => {
            open_source(&session, &args).await?;
            print_forms(&session.registry().records());
            Ok(())
        }
        Command::Pull(args) => handle_pull(&session, args).await,
        Command::Reset => {
            session.reset().map_err(CliError::failure)?;
            println!("stored source cleared");
            Ok(())
        }
    }
}

fn settings_value(cli: &Cli, name: &str) -> Option<String> {
    let from_cli = match name {
        ENV_WORKSPACE => cli
            .workspace
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        ENV_PREFERENCES => cli
            .preferences
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        ENV_MAX_PARALLEL => cli.max_parallel.map(|width| width.to_string()),
        ENV_LOG_LEVEL => cli.log_level.clone(),
        ENV_LOG_FORMAT => cli.log_format.clone(),
        _ => None,
    };
    from_cli.or_else(|| env::var(name).ok())
}

async fn open_source(session: &PullSession, args: &SourceArgs) -> CliResult<()> {
    if let Some(path) = &args.collect_dir {
        session
            .select_source(SourceKind::FilesystemDirectory { path: path.clone() })
            .await
            .map_err(CliError::failure)?;
        return Ok(());
    }
    if session
        .restore_selected_source()
        .await
        .map_err(CliError::failure)?
    {
        return Ok(());
    }
    Err(CliError::validation(
        "no source selected; pass --collect-dir <DIR>",
    ))
}

async fn handle_pull(session: &PullSession, args: PullArgs) -> CliResult<()> {
    open_source(session, &args.source).await?;
    let registry = session.registry();
    if args.all {
        registry.select_all();
    } else if args.forms.is_empty() {
        return Err(CliError::validation("choose forms with --form <FORM_ID> or --all"));
    } else {
        for form in &args.forms {
            registry
                .set_selected(&RecordId::from(form.as_str()), true)
                .map_err(|_| CliError::validation(format!("unknown form `{form}`")))?;
        }
    }

    let mut stream = session.events().stream();
    let batch = session.pull().map_err(CliError::failure)?;
    let printer = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => {
                    if print_event(&envelope.event) {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "progress output fell behind"),
            }
        }
    });

    let waited = tokio::select! {
        summary = batch.wait_for_completion() => summary,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!(batch_id = %batch.id(), "interrupt received; cancelling pull");
                    let _ = session.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for interrupt"),
            }
            batch.wait_for_completion().await
        }
    };
    let summary = waited.map_err(|err| CliError::failure(AppError::jobs("cli.pull", err)))?;
    if let Err(err) = printer.await {
        warn!(error = %err, "progress printer failed");
    }
    finish(&summary)
}

fn finish(summary: &BatchSummary) -> CliResult<()> {
    if summary.failed > 0 {
        return Err(CliError::failure(anyhow!(
            "{} of {} forms failed",
            summary.failed,
            summary.total()
        )));
    }
    Ok(())
}

/// Print one event; returns `true` once the batch has completed.
fn print_event(event: &Event) -> bool {
    match event {
        Event::Progress { record_id, message } | Event::Succeeded { record_id, message } => {
            println!("{:<32} {message}", record_id.as_str());
            false
        }
        Event::Failed { record_id, message } => {
            println!("{:<32} Failed: {message}", record_id.as_str());
            false
        }
        Event::BatchCompleted {
            succeeded,
            failed,
            cancelled,
            skipped,
            ..
        } => {
            println!(
                "done: {succeeded} succeeded, {failed} failed, {cancelled} cancelled, {skipped} skipped"
            );
            true
        }
    }
}

fn print_forms(records: &[TransferRecord]) {
    println!("{:<32} {:<25} NAME", "ID", "LAST PULL");
    for record in records {
        let last = record
            .last_transfer()
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string());
        println!(
            "{:<32} {:<25} {}",
            record.id().as_str(),
            last,
            record.display_name()
        );
    }
}
