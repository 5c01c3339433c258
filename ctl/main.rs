#![forbid(unsafe_code)]

//! `alertflow-ctl` — operator CLI for the `alertflow` session store.
//!
//! Opens the shared database directly and prints results as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use alertflow::config::OrphanAction;
use alertflow::models::session::{NewSession, SessionStatus};
use alertflow::orchestrator::{orphan_monitor, session_manager};
use alertflow::persistence::retention::{RetentionPolicy, Sweeper};
use alertflow::persistence::{db, Store};
use alertflow::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "alertflow-ctl",
    about = "Operator CLI for the alertflow session store",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the shared `SQLite` database file.
    #[arg(long, env = "ALERTFLOW_DATABASE")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Orphan remediation selectable from the command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum CtlOrphanAction {
    /// List orphans without changing them.
    Report,
    /// Mark orphans `timed_out`.
    Fail,
    /// Return orphans to `pending`.
    Requeue,
}

impl From<CtlOrphanAction> for OrphanAction {
    fn from(action: CtlOrphanAction) -> Self {
        match action {
            CtlOrphanAction::Report => Self::Report,
            CtlOrphanAction::Fail => Self::Fail,
            CtlOrphanAction::Requeue => Self::Requeue,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit an alert as a new pending session.
    Submit {
        /// Alert classification.
        #[arg(long)]
        alert_type: String,
        /// Target chain.
        #[arg(long = "chain")]
        chain_id: String,
        /// Opaque alert payload.
        #[arg(long, default_value = "{}")]
        data: String,
        /// Submitting user.
        #[arg(long)]
        author: Option<String>,
    },

    /// Show a session with its stages and top-level executions.
    Show {
        /// Session ID.
        id: String,
    },

    /// List sessions, newest first.
    List {
        /// Only sessions in this status (e.g. `in_progress`).
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows to return.
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Request cancellation of an in-progress session.
    Cancel {
        /// Session ID.
        id: String,
    },

    /// Detect sessions whose worker stopped heartbeating.
    Orphans {
        /// Heartbeat silence, in seconds, after which a session is orphaned.
        #[arg(long = "timeout-seconds", default_value_t = 300)]
        timeout_secs: u64,
        /// What to do with each orphan.
        #[arg(long, value_enum, default_value_t = CtlOrphanAction::Report)]
        action: CtlOrphanAction,
    },

    /// Run one retention pass now.
    Sweep {
        /// Soft-delete sessions older than this many days.
        #[arg(long, default_value_t = 365)]
        retention_days: u32,
        /// Hard-delete events older than this many seconds.
        #[arg(long = "event-ttl-seconds", default_value_t = 3_600)]
        event_ttl_secs: u64,
    },

    /// List events recorded for a session.
    Events {
        /// Session ID.
        session_id: String,
    },
}

#[derive(Serialize)]
struct StageView {
    #[serde(flatten)]
    stage: alertflow::models::stage::Stage,
    executions: Vec<alertflow::models::execution::AgentExecution>,
}

#[derive(Serialize)]
struct SessionView {
    #[serde(flatten)]
    session: alertflow::models::session::Session,
    stages: Vec<StageView>,
}

#[derive(Serialize)]
struct OrphanReport {
    action: &'static str,
    sessions: Vec<alertflow::models::session::Session>,
    scan: orphan_monitor::OrphanScan,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<String> {
    let store = Store::new(Arc::new(db::connect(&args.database).await?));

    match args.command {
        Command::Submit {
            alert_type,
            chain_id,
            data,
            author,
        } => {
            let mut new_session = NewSession::new(alert_type, chain_id, data);
            if let Some(author) = author {
                new_session = new_session.with_author(author);
            }
            to_json(&session_manager::submit_session(&store, new_session).await?)
        }
        Command::Show { id } => {
            let session = session_manager::get_session(&store, &id).await?;
            let mut stages = Vec::new();
            for stage in store.stages.list_for_session(&id).await? {
                let executions = store.executions.list_top_level(&stage.id).await?;
                stages.push(StageView { stage, executions });
            }
            to_json(&SessionView { session, stages })
        }
        Command::List { status, limit } => {
            let status = status.as_deref().map(SessionStatus::parse).transpose()?;
            to_json(&store.sessions.list(status, limit).await?)
        }
        Command::Cancel { id } => {
            session_manager::request_cancel(&store, &id).await?;
            to_json(&serde_json::json!({ "id": id, "status": "cancelling" }))
        }
        Command::Orphans {
            timeout_secs,
            action,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let sessions = session_manager::find_orphaned(&store, timeout).await?;
            let mut scan = orphan_monitor::OrphanScan {
                detected: sessions.len(),
                recovered: 0,
            };
            for session in &sessions {
                if session_manager::recover_orphan(&store, session, action.into()).await? {
                    scan.recovered += 1;
                }
            }
            let action = match action {
                CtlOrphanAction::Report => "report",
                CtlOrphanAction::Fail => "fail",
                CtlOrphanAction::Requeue => "requeue",
            };
            to_json(&OrphanReport {
                action,
                sessions,
                scan,
            })
        }
        Command::Sweep {
            retention_days,
            event_ttl_secs,
        } => {
            let policy = RetentionPolicy {
                session_retention_days: retention_days,
                event_ttl: Duration::from_secs(event_ttl_secs),
                interval: Duration::from_secs(3_600),
            };
            to_json(&Sweeper::new(&store, policy).run_once().await?)
        }
        Command::Events { session_id } => {
            to_json(&store.events.list_for_session(&session_id).await?)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Config(format!("failed to render output: {err}")))
}
