mod cli;

use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
pub use cli::Cli;
use fleet_orchestrator::AgentDispatcher;
use fleet_orchestrator::AgentJob;
use fleet_orchestrator::OutcomeTracker;
use fleet_orchestrator::client::DailyRoomsClient;
use fleet_orchestrator::client::PipecatCloudClient;
use fleet_orchestrator::config::Credentials;
use fleet_orchestrator::config::PIPECAT_PRIVATE_API_KEY_ENV;
use fleet_orchestrator::config::RunConfig;
use fleet_orchestrator::create_rooms;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Exit status when the room batch could not be created.
const PROVISIONING_FAILED: u8 = 2;

pub async fn run_main(cli: Cli) -> anyhow::Result<ExitCode> {
    // A missing .env file is normal; the variables may already be exported.
    let _ = dotenvy::dotenv();
    let _trace_guard = init_tracing(cli.trace_log.as_deref())?;

    let config = RunConfig::load(cli.config.as_deref(), cli.config_overrides())
        .context("invalid configuration")?;
    let credentials = Credentials::from_env().context("missing credentials")?;

    let rooms_client = DailyRoomsClient::new(&config.daily_api_url, &credentials.daily_api_key);
    let agents = Arc::new(
        PipecatCloudClient::new(&config.pipecat_api_url, &credentials.pipecat_api_key)
            .with_private_key(credentials.pipecat_private_api_key.clone()),
    );

    let run_started = Instant::now();
    println!(
        "Creating {} rooms with prefix '{}'...",
        config.num_agents, config.room_prefix
    );
    let rooms = match create_rooms(
        &rooms_client,
        config.num_agents,
        &config.room_prefix,
        config.room_ttl,
    )
    .await
    {
        Ok(rooms) => rooms,
        Err(err) => {
            error!(error = %err, "room provisioning failed");
            eprintln!("Error: failed to create rooms: {err}");
            return Ok(ExitCode::from(PROVISIONING_FAILED));
        }
    };
    let provisioning = run_started.elapsed();
    println!(
        "Created {} rooms in {:.2}s",
        rooms.len(),
        provisioning.as_secs_f64()
    );

    let tracker = OutcomeTracker::with_log_file(&config.log_file)
        .with_context(|| format!("cannot open transition log {}", config.log_file.display()))?;
    let dispatcher = AgentDispatcher::new(agents.clone(), Arc::new(tracker), config.dispatch.clone())
        .context("invalid dispatch settings")?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping dispatch");
                cancel.cancel();
            }
        }
    });

    println!(
        "Starting {} agents '{}' with concurrency {}...",
        rooms.len(),
        config.dispatch.agent_name,
        config.dispatch.concurrency
    );
    let jobs = AgentJob::from_rooms(rooms);
    let outcome = dispatcher.run(jobs, cancel.clone()).await;
    interrupt.abort();
    let summary = outcome.context("dispatch aborted")?.summary;

    println!();
    println!("{summary}");
    println!("Provisioning time: {:.2}s", provisioning.as_secs_f64());
    println!("Total time: {:.2}s", run_started.elapsed().as_secs_f64());
    println!("Transition log: {}", config.log_file.display());

    if config.verify && summary.succeeded > 0 && !cancel.is_cancelled() {
        verify_sessions(&agents, &config, summary.succeeded).await;
    }

    if summary.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Reports how many started agents the control plane still lists as active.
/// Never fails the run.
async fn verify_sessions(agents: &PipecatCloudClient, config: &RunConfig, started: usize) {
    if !agents.can_verify() {
        info!("set {PIPECAT_PRIVATE_API_KEY_ENV} to verify active sessions");
        return;
    }
    println!(
        "\nWaiting {}s before checking active sessions...",
        config.verify_delay.as_secs()
    );
    tokio::time::sleep(config.verify_delay).await;
    match agents
        .verify_active_sessions(&config.dispatch.agent_name, started)
        .await
    {
        Ok(Some(report)) => println!("{report}"),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "session verification failed"),
    }
}

/// Human-readable logs go to stderr at `RUST_LOG` (default `info`); the
/// optional trace file always gets debug detail.
fn init_tracing(trace_log: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let (file_layer, guard) = match trace_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open trace log {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(guard)
}
