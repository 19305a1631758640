mod mpd;
mod terminal;
mod theme;
mod widgets;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use nowclock_proto::config::Config;
use nowclock_sync::{Engine, EngineSettings};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::mpd::MpdClient;
use crate::terminal::TerminalDisplay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_path = init_logging()?;
    // stderr is hidden behind the alternate screen from here on.
    eprintln!("nowclock: logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let display = TerminalDisplay::new(&config.display)?;
    let result = run(&config, &display).await;

    if let Err(e) = display.close() {
        warn!("restoring terminal: {:#}", e);
    }
    match &result {
        Ok(()) => info!("nowclock exiting"),
        Err(e) => {
            error!("nowclock exiting: {:#}", e);
            eprintln!("nowclock: {:#}", e);
        }
    }
    result
}

fn init_logging() -> anyhow::Result<std::path::PathBuf> {
    let data_dir = nowclock_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = nowclock_proto::platform::log_path();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {:?}", log_path))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,nowclock=debug,nowclock_sync=debug")
            }),
        )
        .init();

    Ok(log_path)
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    e.downcast_ref::<nowclock_proto::Error>()
        .is_some_and(nowclock_proto::Error::is_transient)
}

/// Keep a session running until shutdown is requested.  Lost connections
/// are retried after `server.reconnect_delay_secs`; anything else ends the
/// daemon.
async fn run(config: &Config, display: &TerminalDisplay) -> anyhow::Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let delay = Duration::from_secs(config.server.reconnect_delay_secs);

    loop {
        match run_session(config, display, shutdown.as_mut()).await {
            Ok(true) => return Ok(()),
            Ok(false) => warn!("sync loop ended without an error; reconnecting"),
            Err(e) if is_transient(&e) => {
                warn!("session lost: {:#}; reconnecting in {:?}", e, delay);
                tokio::select! {
                    _ = shutdown.as_mut() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// One connected session.  Returns `Ok(true)` when it ended because
/// shutdown was requested.
async fn run_session<F>(
    config: &Config,
    display: &TerminalDisplay,
    shutdown: Pin<&mut F>,
) -> anyhow::Result<bool>
where
    F: Future<Output = ()>,
{
    let address = config.server.address();
    let timeout = Duration::from_secs(config.server.timeout_secs);

    let loop_client = MpdClient::connect("loop", &address, timeout)
        .await
        .with_context(|| format!("connecting to {}", address))?;
    let position_client = MpdClient::connect("position", &address, timeout)
        .await
        .with_context(|| format!("connecting to {}", address))?;

    let engine = Engine::start(
        loop_client,
        position_client,
        display.clone(),
        EngineSettings::from(&config.sync),
    );

    let requested = tokio::select! {
        _ = shutdown => true,
        _ = engine.finished() => false,
    };
    let outcome = engine.stop().await;
    if requested {
        info!("shutdown requested");
        if let Err(e) = outcome {
            warn!("sync loop error during shutdown: {:#}", e);
        }
        return Ok(true);
    }
    outcome.map(|()| false)
}
