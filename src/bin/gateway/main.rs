//! Gateway - the signed event ingress process.
//!
//! Accepts Slack event callbacks over HTTP, verifies them, and enqueues
//! them onto the Redis work queue for the consumer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::config::Config;
use switchboard::queue::{self, Publisher};
use switchboard::server::{AppState, build_router};

/// How long in-flight requests get to finish after a shutdown signal.
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(25);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load config")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "switchboard={}",
                    config.log_level.to_string().to_lowercase()
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        env = %config.env,
        app = %config.heroku.app_name,
        dyno_id = %config.heroku.dyno_id,
        commit = %config.heroku.commit,
        slack_client_id = %config.slack.client_id,
        log_level = %config.log_level,
        "configuration values"
    );

    let redis = queue::connect(&config.redis)
        .await
        .context("failed to connect to redis")?;

    let publisher = Arc::new(Publisher::new(redis));

    let app_state = AppState::new(
        &config.slack.request_secret,
        &config.slack.request_token,
        &config.slack.app_id,
        &config.slack.team_id,
        publisher,
    );

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(addr = %addr, "binding to TCP socket");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to open HTTP socket")?;

    // signal handling / graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutting HTTP server down gracefully");
            shutdown.cancel();
        }
    });

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .into_future();

    tokio::select! {
        result = serve => result.context("server failed")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(GRACEFUL_SHUTDOWN).await;
        } => {
            warn!("graceful shutdown window elapsed; exiting with requests in flight");
        }
    }

    info!("server shut down");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
