use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vrelay_domain::assessor::NullAssessor;
use vrelay_domain::config::{Config, ConfigSeverity};
use vrelay_domain::events::LoggingEventSink;
use vrelay_domain::persistence::InMemoryPersistenceSink;

use vrelay_relay::auth::JwtTokenVerifier;
use vrelay_relay::cli::{self, Cli, Command, ConfigCommand};
use vrelay_relay::state::{AppState, ServerStats};
use vrelay_relay::supervisor::Supervisor;
use vrelay_relay::{api, watchdog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            cli::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vrelay_relay=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("voice relay starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let token_verifier = Arc::new(JwtTokenVerifier::new(config.auth.jwt_secret.clone()));
    let supervisor = Arc::new(Supervisor::new());

    let state = AppState {
        config: config.clone(),
        supervisor,
        token_verifier,
        persistence: InMemoryPersistenceSink::shared(),
        assessor: Arc::new(NullAssessor),
        events: Arc::new(LoggingEventSink),
        stats: Arc::new(ServerStats::default()),
        started_at: Instant::now(),
    };

    watchdog::spawn(state.clone());
    tracing::info!(
        heartbeat_ms = config.relay.heartbeat_interval_ms,
        watchdog_ms = config.relay.watchdog_interval_ms,
        "heartbeat + watchdog tasks started"
    );

    let app = api::router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "voice relay listening");

    let supervisor = state.supervisor.clone();
    let shutdown = async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("shutdown signal received, draining active sessions");
        supervisor.shutdown().await;
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await.context("axum server error")?;

    tracing::info!("voice relay stopped");
    Ok(())
}
