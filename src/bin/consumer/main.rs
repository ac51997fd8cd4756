//! Consumer - the stream dispatch process.
//!
//! Consumes the event streams the gateway fills, matches messages against
//! the handler registry, and welcomes new members.

mod channel_join;
mod prefix;
mod reactions;
mod responses;
mod team_join;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::cache::ChannelCache;
use switchboard::config::Config;
use switchboard::glossary;
use switchboard::handler::{ChannelJoinActions, MessageActions, TeamJoinActions};
use switchboard::heartbeat::{Heart, HeartbeatConfig};
use switchboard::queue::{self, Consumer, ConsumerConfig};
use switchboard::slack::ChatClient;

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

    let slack = ChatClient::new(&config.slack.bot_access_token)
        .context("failed to build slack client")?;

    // test credentials and get the self reference
    let self_id = slack
        .auth_test()
        .await
        .context("slack authentication test failed")?;
    let self_user = slack
        .users_info(&self_id)
        .await
        .context("failed to fetch bot user info")?;

    let redis = queue::connect(&config.redis)
        .await
        .context("failed to connect to redis")?;

    // the root token: signals, or the heartbeat giving up, drain the
    // consumer
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

    let channels = Arc::new(ChannelCache::new(redis.clone()));

    let shadow_mode = config.shadow_mode();

    let mut ma = MessageActions::new(&self_user.id, shadow_mode)
        .context("failed to build message actions")?;

    let gloss = Arc::new(glossary::Terms::new(glossary::PREFIX));

    let mut tja = TeamJoinActions::new(shadow_mode);
    let mut cja = ChannelJoinActions::new(shadow_mode);

    // set up all the responders and reacters
    responses::inject_message_responses(&mut ma);
    responses::inject_message_response_fns(&mut ma);
    responses::inject_bare_mention_nudge(&mut ma);
    reactions::inject_message_reactions(&mut ma);
    prefix::inject_message_response_prefixes(&mut ma);

    // handle the "define "-prefixed command
    ma.handle_prefix(
        glossary::PREFIX,
        "find a definition in the glossary of common terms",
        gloss.define_handler(),
    );

    // help goes last so it can see everything else
    responses::inject_help(&mut ma);

    team_join::inject_team_join_handlers(&mut tja);
    channel_join::inject_channel_join_handlers(&mut cja);

    let mut consumer = Consumer::new(
        redis,
        ConsumerConfig::new(&config.heroku.dyno_id, &config.heroku.app_name),
        slack,
        self_user,
        channels,
    );

    consumer.register_team_join_handler(Duration::from_secs(2), Arc::new(tja));
    consumer.register_channel_join_handler(Duration::from_secs(10), Arc::new(cja));

    let ma: Arc<dyn switchboard::queue::MessageHandler> = Arc::new(ma);
    consumer.register_public_message_handler(Duration::from_secs(10), Arc::clone(&ma));
    consumer.register_private_message_handler(Duration::from_secs(10), ma);

    // signal handling / graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutting down consumer gracefully");
            shutdown.cancel();
        }
    });

    info!("waiting for events");

    consumer
        .run(shutdown)
        .await
        .context("consumer stopped with an error")?;

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
