mod actions;
mod app;
mod async_list;
mod cli;
mod cluster;
mod config;
mod dashboard;
mod editor;
mod executor;
mod input;
mod k8s;
mod listener;
mod resources;
mod template;
mod terminal;
mod theme;
mod view;

use actions::Actions;
use anyhow::{Context, Result, anyhow};
use app::{AppLink, Application};
use clap::Parser;
use cli::CliArgs;
use config::ConfigDir;
use dashboard::Dashboard;
use executor::TaskExecutor;
use k8s::KubeConnector;
use std::fs::OpenOptions;
use std::sync::Arc;
use terminal::{CrosstermSuspend, TerminalSession};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config_dir = ConfigDir::resolve(args.config_dir.clone());
    let first_run = config_dir.prepare()?;
    let _log_guard = init_tracing(&config_dir, &args.log_filter)?;
    info!("starting with configuration from {}", config_dir.path().display());

    let settings = config_dir.load()?;
    let tick = settings.config.general.tick(args.tick_ms);
    let theme = settings.config.theme();
    let connector = Arc::new(KubeConnector::new(settings.config.general.request_timeout()));

    let mut session = TerminalSession::start()?;
    let executor = TaskExecutor::new();
    let mut app = Application::new(session.area()?, theme, executor.clone());
    app.set_suspender(Box::new(CrosstermSuspend));
    let dashboard = Dashboard::build(&mut app, settings, config_dir, connector)?;
    info!("{} cluster(s) configured", dashboard.clusters().len());
    if first_run {
        Actions::help(&mut app);
    }

    spawn_signal_listener(app.link());
    executor.start(tick);
    let run_result = app.run(session.terminal_mut()).await;
    for cluster in dashboard.clusters() {
        cluster.disconnect();
    }
    let restore_result = session.restore();

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) | (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_tracing(config_dir: &ConfigDir, level_filter: &str) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let path = config_dir.log_file();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(writer)
        .try_init();

    Ok(guard)
}

/// SIGINT and SIGTERM end the main loop like Esc does, so the terminal is
/// restored on the regular path.
fn spawn_signal_listener(link: AppLink) {
    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                return;
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("failed to listen for SIGINT: {err}");
                    return;
                }
            }
            _ = terminate.recv() => {}
        }
        info!("shutdown signal received");
        link.post(Application::quit);
    });
}
