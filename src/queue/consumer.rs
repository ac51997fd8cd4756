//! Stream consumer: worker loops, reclaim, and the ack protocol.
//!
//! Each registered stream gets two worker tasks doing blocking
//! consumer-group reads plus one reclaim task that steals deliveries whose
//! owner has exceeded the visibility timeout. A delivery is processed
//! sequentially on whichever task received it, and each delivery is acked
//! exactly once unless the handler asks for a retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::XReadResponse;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::slack::{ChatClient, MemberJoinedChannelEvent, MessageEvent, TeamJoinEvent, User};

use super::context::{ChannelService, EventMetadata, HandlerContext};
use super::{HandlerOutcome, QueueError, StreamKind, parse_gateway_message};

/// Workers per registered stream.
const WORKERS_PER_STREAM: usize = 2;

/// How long a blocking read waits before cycling.
const BLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the reclaim scan runs.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(1);

/// Entries fetched per read; deliveries are handled one at a time.
const READ_COUNT: u64 = 1;

/// Handler for message streams (public and private).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext, event: MessageEvent) -> HandlerOutcome;
}

/// Handler for the team-join stream.
#[async_trait]
pub trait TeamJoinHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext, event: TeamJoinEvent) -> HandlerOutcome;
}

/// Handler for the channel-join stream.
#[async_trait]
pub trait ChannelJoinHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext, event: MemberJoinedChannelEvent)
    -> HandlerOutcome;
}

#[derive(Clone)]
enum StreamHandler {
    Message(Arc<dyn MessageHandler>),
    TeamJoin(Arc<dyn TeamJoinHandler>),
    ChannelJoin(Arc<dyn ChannelJoinHandler>),
}

#[derive(Clone)]
struct Registration {
    timeout: Duration,
    handler: StreamHandler,
}

/// Consumer identity and delivery parameters.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// This node's unique identifier within the group (the dyno id).
    pub name: String,

    /// The consumer group, shared by all nodes of the service (the app
    /// name).
    pub group: String,

    /// How long an unacked delivery stays owned before the reclaim cycle
    /// may steal it.
    pub visibility_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        ConsumerConfig {
            name: name.into(),
            group: group.into(),
            visibility_timeout: Duration::from_secs(10),
        }
    }
}

/// The consuming half of the queue.
///
/// Register one handler per stream, then call [`Consumer::run`], which
/// blocks until the shutdown token fires and in-flight deliveries drain.
pub struct Consumer {
    client: RedisClient,
    config: ConsumerConfig,
    slack: ChatClient,
    self_user: User,
    channels: Arc<dyn ChannelService>,
    registrations: HashMap<StreamKind, Registration>,
}

impl Consumer {
    pub fn new(
        client: RedisClient,
        config: ConsumerConfig,
        slack: ChatClient,
        self_user: User,
        channels: Arc<dyn ChannelService>,
    ) -> Self {
        Consumer {
            client,
            config,
            slack,
            self_user,
            channels,
            registrations: HashMap::new(),
        }
    }

    /// Registers the handler for public channel messages.
    pub fn register_public_message_handler(
        &mut self,
        timeout: Duration,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.register(StreamKind::MessagePublic, timeout, StreamHandler::Message(handler));
    }

    /// Registers the handler for private channel, DM, group DM, and app
    /// home messages.
    pub fn register_private_message_handler(
        &mut self,
        timeout: Duration,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.register(StreamKind::MessagePrivate, timeout, StreamHandler::Message(handler));
    }

    /// Registers the handler for workspace joins.
    pub fn register_team_join_handler(
        &mut self,
        timeout: Duration,
        handler: Arc<dyn TeamJoinHandler>,
    ) {
        self.register(StreamKind::TeamJoin, timeout, StreamHandler::TeamJoin(handler));
    }

    /// Registers the handler for channel joins.
    pub fn register_channel_join_handler(
        &mut self,
        timeout: Duration,
        handler: Arc<dyn ChannelJoinHandler>,
    ) {
        self.register(StreamKind::ChannelJoin, timeout, StreamHandler::ChannelJoin(handler));
    }

    fn register(&mut self, stream: StreamKind, timeout: Duration, handler: StreamHandler) {
        if self.registrations.contains_key(&stream) {
            panic!("handler for stream {stream} already registered");
        }

        self.registrations
            .insert(stream, Registration { timeout, handler });
    }

    /// Runs the consumer until `shutdown` fires.
    ///
    /// Creates the consumer groups (idempotently), then spawns the worker
    /// and reclaim tasks for every registered stream and waits for them to
    /// drain after shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), QueueError> {
        let shared = Arc::new(Shared {
            config: self.config,
            slack: self.slack,
            self_user: self.self_user,
            channels: self.channels,
        });

        let mut tasks = JoinSet::new();

        for (stream, registration) in self.registrations {
            ensure_group(&self.client, stream, &shared.config.group).await?;

            for worker in 0..WORKERS_PER_STREAM {
                // blocking reads monopolize a connection, so every worker
                // gets its own client
                let client = self.client.clone_new();
                client.connect();
                client.wait_for_connect().await?;

                let shared = Arc::clone(&shared);
                let registration = registration.clone();
                let shutdown = shutdown.clone();

                tasks.spawn(async move {
                    worker_loop(client, stream, worker, registration, shared, shutdown).await;
                });
            }

            let client = self.client.clone_new();
            client.connect();
            client.wait_for_connect().await?;

            let shared = Arc::clone(&shared);
            let registration = registration.clone();
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                reclaim_loop(client, stream, registration, shared, shutdown).await;
            });
        }

        info!("consumer running; waiting for events");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "consumer task panicked");
            }
        }

        info!("consumer stopped");
        Ok(())
    }
}

/// Context shared by all worker and reclaim tasks.
struct Shared {
    config: ConsumerConfig,
    slack: ChatClient,
    self_user: User,
    channels: Arc<dyn ChannelService>,
}

/// Creates the consumer group at the stream tail, tolerating the group
/// already existing.
async fn ensure_group(
    client: &RedisClient,
    stream: StreamKind,
    group: &str,
) -> Result<(), QueueError> {
    match client
        .xgroup_create(stream.as_str(), group, "$", true)
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.details().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn worker_loop(
    client: RedisClient,
    stream: StreamKind,
    worker: usize,
    registration: Registration,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    debug!(stream = %stream, worker, "worker started");

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = read_new(&client, stream, &shared.config) => r,
        };

        let entries = match read {
            Ok(entries) => entries,
            Err(e) => {
                error!(stream = %stream, error = %e, "stream read failed");
                // avoid a hot loop while the store is unhappy
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for (entry_id, values) in entries {
            process_delivery(&client, stream, &entry_id, values, &registration, &shared, &shutdown)
                .await;
        }
    }

    debug!(stream = %stream, worker, "worker stopped");
}

/// One blocking consumer-group read for new deliveries.
async fn read_new(
    client: &RedisClient,
    stream: StreamKind,
    config: &ConsumerConfig,
) -> Result<Vec<(String, HashMap<String, String>)>, QueueError> {
    let response: XReadResponse<String, String, String, String> = client
        .xreadgroup_map(
            config.group.as_str(),
            config.name.as_str(),
            Some(READ_COUNT),
            Some(BLOCK_TIMEOUT.as_millis() as u64),
            false,
            stream.as_str(),
            ">",
        )
        .await?;

    Ok(response.into_values().flatten().collect())
}

async fn reclaim_loop(
    client: RedisClient,
    stream: StreamKind,
    registration: Registration,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(RECLAIM_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        let claimed: Result<(String, Vec<(String, HashMap<String, String>)>), RedisError> =
            client
                .xautoclaim_values(
                    stream.as_str(),
                    shared.config.group.as_str(),
                    shared.config.name.as_str(),
                    shared.config.visibility_timeout.as_millis() as u64,
                    "0-0",
                    Some(READ_COUNT),
                    false,
                )
                .await;

        match claimed {
            Ok((_cursor, entries)) => {
                for (entry_id, values) in entries {
                    debug!(stream = %stream, entry = %entry_id, "reclaimed delivery");
                    process_delivery(
                        &client,
                        stream,
                        &entry_id,
                        values,
                        &registration,
                        &shared,
                        &shutdown,
                    )
                    .await;
                }
            }
            Err(e) => {
                error!(stream = %stream, error = %e, "reclaim scan failed");
            }
        }
    }
}

/// Runs one delivery through its handler and applies the ack protocol.
///
/// Malformed deliveries (bad metadata, bad JSON) are acked and dropped so
/// they can't poison the stream.
async fn process_delivery(
    client: &RedisClient,
    stream: StreamKind,
    entry_id: &str,
    values: HashMap<String, String>,
    registration: &Registration,
    shared: &Shared,
    shutdown: &CancellationToken,
) {
    let started = std::time::Instant::now();

    let message = match parse_gateway_message(&values) {
        Ok(m) => m,
        Err(e) => {
            error!(
                stream = %stream,
                entry = %entry_id,
                error = %e,
                "failed to parse message from gateway"
            );
            ack(client, stream, entry_id, &shared.config.group).await;
            return;
        }
    };

    let meta = EventMetadata {
        id: message.event_id.clone(),
        time: message.event_time,
        ingest_time: message.ingest_time,
        stream_entry: entry_id.to_string(),
        request_id: message.request_id.clone(),
    };

    let cancel = shutdown.child_token();
    let ctx = HandlerContext::new(
        meta,
        shared.slack.clone(),
        shared.self_user.clone(),
        Arc::clone(&shared.channels),
        cancel.clone(),
    );

    let outcome = invoke(registration, ctx, &message.json).await;
    cancel.cancel();

    let elapsed = started.elapsed();

    match &outcome {
        HandlerOutcome::Success => {
            info!(
                stream = %stream,
                entry = %entry_id,
                event_id = %message.event_id,
                request_id = %message.request_id,
                duration_ms = elapsed.as_millis() as u64,
                "complete"
            );
        }
        HandlerOutcome::HandledWithError(e) => {
            error!(
                stream = %stream,
                entry = %entry_id,
                event_id = %message.event_id,
                request_id = %message.request_id,
                error = %e,
                no_ack = false,
                "handler failed"
            );
        }
        HandlerOutcome::Retry(e) => {
            error!(
                stream = %stream,
                entry = %entry_id,
                event_id = %message.event_id,
                request_id = %message.request_id,
                error = %e,
                no_ack = true,
                "handler failed"
            );
        }
        HandlerOutcome::Discard { reason, error } => {
            if let Some(reason) = reason {
                warn!(
                    stream = %stream,
                    entry = %entry_id,
                    event_id = %message.event_id,
                    request_id = %message.request_id,
                    reason = %reason,
                    error = %error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                    "discarding message"
                );
            }
        }
    }

    if outcome.acks() {
        ack(client, stream, entry_id, &shared.config.group).await;
    }
}

/// Deserializes the payload for the stream's handler and invokes it under
/// its timeout.
async fn invoke(registration: &Registration, ctx: HandlerContext, json: &str) -> HandlerOutcome {
    macro_rules! run {
        ($handler:expr, $event_ty:ty) => {{
            let event: $event_ty = match serde_json::from_str(json) {
                Ok(e) => e,
                Err(e) => {
                    return HandlerOutcome::discard_with(
                        "failed to parse message JSON",
                        Box::new(e),
                    );
                }
            };

            let cancel = ctx.cancel_token().clone();
            tokio::select! {
                outcome = $handler.handle(ctx, event) => outcome,
                _ = tokio::time::sleep(registration.timeout) => {
                    cancel.cancel();
                    HandlerOutcome::HandledWithError("handler timed out".into())
                }
            }
        }};
    }

    match &registration.handler {
        StreamHandler::Message(h) => run!(h, MessageEvent),
        StreamHandler::TeamJoin(h) => run!(h, TeamJoinEvent),
        StreamHandler::ChannelJoin(h) => run!(h, MemberJoinedChannelEvent),
    }
}

async fn ack(client: &RedisClient, stream: StreamKind, entry_id: &str, group: &str) {
    let result: Result<u64, RedisError> = client.xack(stream.as_str(), group, entry_id).await;

    if let Err(e) = result {
        error!(stream = %stream, entry = %entry_id, error = %e, "failed to ack delivery");
    }
}
