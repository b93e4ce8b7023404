use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use osce_core::generative::GenerativeBackend;
use osce_core::ids::{CaseId, SessionId, UserId};
use osce_core::message::InboundMessage;
use osce_core::stage::StageName;
use osce_engine::{EngineConfig, EngineError, GenerativeSessionCache, Orchestrator};
use osce_llm::{HttpBackend, HttpConfig, LimitedBackend, LimiterConfig, OfflineBackend, RateLimiter};
use osce_settings::OsceSettings;
use osce_store::{CaseLibrary, CaseStore, Database, InMemorySessionStore, SessionRepo, SessionStore};
use osce_telemetry::{init_telemetry, TelemetryConfig};

/// Interview a simulated patient from the terminal.
#[derive(Debug, Parser)]
#[command(name = "osce", version)]
struct Args {
    /// Directory of case files (`<case_id>.json`).
    #[arg(long, default_value = "cases")]
    cases: PathBuf,
    /// Case to run. Lists the available cases when omitted.
    #[arg(long)]
    case: Option<String>,
    /// Session database. Defaults to ~/.osce/database/sessions.db.
    #[arg(long, conflicts_with = "in_memory")]
    db: Option<PathBuf>,
    /// Keep sessions in memory only.
    #[arg(long)]
    in_memory: bool,
    /// Resume or create this session id. Defaults to the user's active
    /// session on the case, if there is one.
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    user: Option<String>,
    /// Settings file. Defaults to ~/.osce/settings.json.
    #[arg(long)]
    settings: Option<PathBuf>,
}

const HELP: &str = "commands: /stage <History|Examination|Investigations|Management>, /end, /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => osce_settings::load_settings_from_path(path),
        None => osce_settings::load_settings(),
    }
    .context("failed to load settings")?;
    let _telemetry = init_telemetry(telemetry_config(&settings));

    let cases: Arc<dyn CaseStore> = Arc::new(
        CaseLibrary::open(&args.cases)
            .with_context(|| format!("failed to open case library {}", args.cases.display()))?,
    );
    let Some(case) = args.case.as_deref() else {
        for id in cases.list()? {
            println!("{id}");
        }
        return Ok(());
    };

    let sessions: Arc<dyn SessionStore> = if args.in_memory {
        Arc::new(InMemorySessionStore::new())
    } else {
        let path = args.db.clone().unwrap_or_else(|| osce_dir().join("database").join("sessions.db"));
        Arc::new(SessionRepo::new(Database::open(&path)?))
    };

    let config = EngineConfig::from_settings(&settings);
    let cache = Arc::new(GenerativeSessionCache::new(build_backend(&settings)?, config.cache.clone()));
    let case_id = CaseId::from_raw(case);
    let user_id = args.user.map(UserId::from_raw);
    let session_id = resolve_session(sessions.as_ref(), args.session, user_id.as_ref(), &case_id)?;

    let orchestrator = Orchestrator::new(sessions, cases, cache, &config);
    let shutdown = CancellationToken::new();
    let sweepers = orchestrator.spawn_sweepers(shutdown.clone());
    info!(session_id = %session_id, case_id = %case_id, "interview started");
    println!("session {session_id}\n{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/end", _) => {
                report(orchestrator.end_session(&session_id).await.map(|()| "session ended".to_owned()));
                break;
            }
            ("/stage", name) => match StageName::from_str(name) {
                Ok(stage) => report(
                    orchestrator
                        .advance_stage(&session_id, stage)
                        .await
                        .map(|s| format!("stage: {}", s.current_stage)),
                ),
                Err(e) => println!("{e}"),
            },
            _ => {
                let mut msg = InboundMessage::new(line, session_id.clone(), case_id.clone());
                msg.user_id = user_id.clone();
                report(orchestrator.handle(&msg).await.map(|reply| {
                    if reply.is_blocked() {
                        format!("patient (blocked)> {}", reply.text)
                    } else {
                        format!("patient> {}", reply.text)
                    }
                }));
            }
        }
    }

    shutdown.cancel();
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            warn!(error = %e, "sweeper task failed");
        }
    }
    info!(session_id = %session_id, "interview closed");
    Ok(())
}

/// The explicit id, else the user's active session on `case_id`, else a
/// fresh id that the first message will create.
fn resolve_session(
    sessions: &dyn SessionStore,
    explicit: Option<String>,
    user_id: Option<&UserId>,
    case_id: &CaseId,
) -> anyhow::Result<SessionId> {
    if let Some(raw) = explicit {
        return Ok(SessionId::from_raw(raw));
    }
    let user = user_id.cloned().unwrap_or_else(UserId::anonymous);
    match sessions.find_active(&user, case_id).context("failed to look up active session")? {
        Some(session) => {
            info!(session_id = %session.id, user_id = %user, "resuming active session");
            Ok(session.id)
        }
        None => Ok(SessionId::new()),
    }
}

fn report(result: Result<String, EngineError>) {
    match result {
        Ok(text) => println!("{text}"),
        Err(e) => {
            warn!(error = %e, error_kind = e.error_kind(), "request rejected");
            println!("error: {e}");
        }
    }
}

/// The HTTP backend when a service URL is configured, otherwise a backend
/// that always fails so every answer comes from the offline tier.
fn build_backend(settings: &OsceSettings) -> anyhow::Result<Arc<dyn GenerativeBackend>> {
    let g = &settings.generative;
    let Some(base_url) = g.base_url.as_deref() else {
        info!("no generative service configured, running offline");
        return Ok(Arc::new(OfflineBackend));
    };
    if g.max_concurrent == 0 {
        bail!("generative.maxConcurrent must be at least 1");
    }

    let limiter = Arc::new(RateLimiter::new(LimiterConfig {
        max_concurrent: g.max_concurrent,
        min_spacing: g.min_spacing.get(),
        quota: g.quota_per_minute,
        ..LimiterConfig::default()
    }));
    let timeout = g.request_timeout.get();
    let mut http = HttpConfig::new(base_url, g.model.clone());
    http.temperature = g.temperature;
    if let Some(key) = &g.api_key {
        http = http.with_api_key(SecretString::from(key.clone()));
    }
    let backend = HttpBackend::new(http).context("failed to build generative client")?;
    info!(url = base_url, model = %g.model, "generative service configured");
    Ok(Arc::new(LimitedBackend::new(backend, limiter, timeout)))
}

fn telemetry_config(settings: &OsceSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    let defaults = TelemetryConfig::default();
    TelemetryConfig {
        log_level: Level::from_str(&logging.level).unwrap_or(Level::INFO),
        json: logging.json,
        audit_to_sqlite: logging.audit,
        audit_db_path: logging
            .audit_db_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or(defaults.audit_db_path.clone()),
        ..defaults
    }
}

fn osce_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".osce")
}
