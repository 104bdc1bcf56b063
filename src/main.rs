//! # Newsroom Agent
//!
//! Hosting process for the content pipeline.
//!
//! ## Usage
//!
//! ```sh
//! newsroom_agent --config newsroom.yaml daemon
//! newsroom_agent run --max-articles 2
//! newsroom_agent status
//! ```
//!
//! ## Startup
//!
//! 1. **Tracing**: `RUST_LOG`-driven, RFC 3339 UTC timestamps
//! 2. **Settings**: daemon YAML (missing file means defaults)
//! 3. **Collaborators**: LLM client, feed reader, file store, image providers
//! 4. **Command**: daemon, single run, or status

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use newsroom_agent::BoxError;
use newsroom_agent::api::{OpenAiClient, TimeoutGenerator};
use newsroom_agent::cli::{Cli, Command};
use newsroom_agent::config::{AgentConfig, AgentConfigPatch};
use newsroom_agent::control::{self, AppState};
use newsroom_agent::images::{ImageProvider, PexelsProvider, UnsplashProvider};
use newsroom_agent::models::RunStatus;
use newsroom_agent::pipeline::{Orchestrator, PipelineDeps};
use newsroom_agent::settings::{DaemonSettings, env_key, load_settings};
use newsroom_agent::sources::feed::HttpFeedReader;
use newsroom_agent::store::file::FileStore;
use newsroom_agent::store::{SettingsStore, TitleDeduplicator};
use newsroom_agent::worker::{LastRun, WORKER_LAST_RUN_KEY, Worker, WorkerOptions};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    let mut settings = load_settings(Path::new(&args.config)).await?;
    if let Some(tenant) = &args.tenant {
        settings.tenant_id = tenant.clone();
    }
    info!(tenant = %settings.tenant_id, command = ?args.command, "newsroom_agent starting up");

    let store = match FileStore::open(&settings.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                path = %settings.data_dir,
                error = %e,
                "Data directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    };
    let orchestrator = build_orchestrator(&settings, store.clone())?;

    let overrides = args.command.overrides();
    match args.command {
        Command::Daemon { listen } => {
            let listen = listen.unwrap_or_else(|| settings.listen.clone());
            run_daemon(&settings, orchestrator, &listen).await
        }
        Command::Run { .. } => run_once(&settings, orchestrator, overrides).await,
        Command::Status => print_status(&settings, &orchestrator, store.as_ref()).await,
    }
}

fn build_orchestrator(
    settings: &DaemonSettings,
    store: Arc<FileStore>,
) -> Result<Orchestrator, BoxError> {
    let llm_timeout = Duration::from_secs(settings.llm.timeout_secs);
    let api_key = env_key(&settings.llm.api_key_env);
    if api_key.is_none() {
        warn!(var = %settings.llm.api_key_env, "No LLM API key set; sending unauthenticated requests");
    }
    let client = OpenAiClient::new(&settings.llm.base_url, api_key, llm_timeout)?;
    let generator = Arc::new(TimeoutGenerator::new(client, llm_timeout));

    let feed_reader = Arc::new(HttpFeedReader::new(
        Duration::from_secs(settings.feeds.timeout_secs),
        &settings.feeds.user_agent,
    )?);

    let image_timeout = Duration::from_secs(settings.images.timeout_secs);
    let mut image_providers: Vec<Arc<dyn ImageProvider>> = Vec::new();
    if let Some(key) = env_key(&settings.images.unsplash_access_key_env) {
        image_providers.push(Arc::new(UnsplashProvider::new(key, image_timeout)?));
    }
    if let Some(key) = env_key(&settings.images.pexels_api_key_env) {
        image_providers.push(Arc::new(PexelsProvider::new(key, image_timeout)?));
    }
    info!(
        providers = image_providers.len(),
        "Image providers configured; placeholders cover the rest"
    );

    let deps = PipelineDeps {
        generator,
        feed_reader,
        settings: store.clone(),
        articles: store.clone(),
        run_logs: store.clone(),
        duplicates: Arc::new(TitleDeduplicator::new(store)),
        image_providers,
        placeholder_base_url: settings.images.placeholder_base_url.clone(),
    };
    let defaults = AgentConfig {
        cron_schedule: settings.default_schedule.clone(),
        ..AgentConfig::default()
    };
    Ok(Orchestrator::new(deps, defaults))
}

#[instrument(level = "info", skip_all, fields(%listen))]
async fn run_daemon(
    settings: &DaemonSettings,
    orchestrator: Orchestrator,
    listen: &str,
) -> Result<(), BoxError> {
    let worker = Worker::new(
        orchestrator,
        WorkerOptions {
            tenant_id: settings.tenant_id.clone(),
            reconcile_interval: settings.reconcile_interval(),
        },
    );
    worker.ensure_running().await?;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("Control server listening");
    let app = control::router(AppState {
        worker: worker.clone(),
    });
    // The worker stops before axum drains connections: an in-flight manual
    // run is cancelled at its next stage boundary, not awaited to the end.
    let stop_worker = {
        let worker = worker.clone();
        async move {
            shutdown_signal().await;
            worker.stop().await;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(stop_worker)
        .await
    {
        error!(error = %e, "Control server failed");
        worker.stop().await;
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_once(
    settings: &DaemonSettings,
    orchestrator: Orchestrator,
    overrides: Option<AgentConfigPatch>,
) -> Result<(), BoxError> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let start_time = std::time::Instant::now();
    let outcome = orchestrator
        .run(&settings.tenant_id, overrides, &cancel)
        .await;
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        published = outcome.published.len(),
        "Execution complete"
    );

    println!("{}", serde_json::to_string_pretty(&outcome.log)?);
    match outcome.log.status {
        RunStatus::Failed => Err(format!("pipeline run failed: {}", outcome.log.errors.join("; ")).into()),
        _ => Ok(()),
    }
}

async fn print_status(
    settings: &DaemonSettings,
    orchestrator: &Orchestrator,
    store: &FileStore,
) -> Result<(), BoxError> {
    let config = orchestrator.resolve_config(&settings.tenant_id, None).await?;
    let last_run: Option<LastRun> = match store.get(&settings.tenant_id, WORKER_LAST_RUN_KEY).await? {
        Some(value) => serde_json::from_value(value).ok(),
        None => None,
    };
    let status = serde_json::json!({
        "tenant": settings.tenant_id,
        "enabled": config.enabled,
        "schedule": config.cron_schedule,
        "lastRun": last_run,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received; shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
