//! Bgtasks - the background poller process.
//!
//! Keeps the channel metadata cache warm and announces new episodes from
//! the configured feed. Shares the store heartbeat with the consumer so a
//! dead Redis takes this process down for a restart too.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::cache::{ChannelCache, ChannelFiller};
use switchboard::config::Config;
use switchboard::heartbeat::{Heart, HeartbeatConfig};
use switchboard::poller::channel_cache;
use switchboard::poller::episodes::{EpisodePoller, JsonFeedFetcher, RedisBookmarks};
use switchboard::queue;
use switchboard::slack::ChatClient;

/// #podcast, where new episodes get announced.
const EPISODES_CHANNEL_ID: &str = "C02PODCST1";

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
        log_level = %config.log_level,
        "configuration values"
    );

    let slack = ChatClient::new(&config.slack.bot_access_token)
        .context("failed to build slack client")?;

    let redis = queue::connect(&config.redis)
        .await
        .context("failed to connect to redis")?;

    let shutdown = CancellationToken::new();

    let heart = Heart::new(
        redis.clone(),
        HeartbeatConfig {
            app_name: config.heroku.app_name.clone(),
            uid: config.heroku.dyno_id.clone(),
            warn: Duration::from_secs(4),
            fail: Duration::from_secs(8),
            shutdown_fn: Some(Box::new({
                let shutdown = shutdown.clone();
                move || shutdown.cancel()
            })),
        },
        shutdown.clone(),
    )
    .await
    .context("failed to start heartbeating")?;
    let _heart = heart;

    let cache = ChannelCache::new(redis.clone());
    let filler = Arc::new(ChannelFiller::new(slack.clone(), cache));

    let mut pollers = tokio::task::JoinSet::new();

    pollers.spawn(channel_cache::run(filler, shutdown.clone()));

    // the feed is deployment-specific; without one configured, the
    // announcer stays off
    match std::env::var("EPISODES_FEED_URL") {
        Ok(url) if !url.is_empty() => {
            let fetcher = Arc::new(JsonFeedFetcher::new(url).context("failed to build feed client")?);
            let bookmarks = Arc::new(RedisBookmarks::new(redis, "episodes"));
            let poller = Arc::new(EpisodePoller::new(
                fetcher,
                bookmarks,
                slack,
                EPISODES_CHANNEL_ID,
            ));

            pollers.spawn(poller.run(shutdown.clone()));
        }
        _ => {
            info!("EPISODES_FEED_URL not set; episode announcements disabled");
        }
    }

    // signal handling / graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutting down pollers gracefully");
            shutdown.cancel();
        }
    });

    info!("pollers running");

    while let Some(result) = pollers.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "poller task panicked");
        }
    }

    info!("bgtasks shut down");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
