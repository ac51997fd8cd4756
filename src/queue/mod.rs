//! Durable work queue over Redis streams.
//!
//! The gateway publishes verified Slack events onto one of a closed set of
//! streams; consumers read them through a consumer group, which gives
//! per-stream FIFO ordering, at-least-once delivery, and automatic reclaim
//! of messages whose owner died mid-processing.
//!
//! # Message format
//!
//! Every stream entry carries five fields: `request_id` (trace
//! correlator), `gateway_ts` (ingress wall clock, milliseconds),
//! `event_ts` (Slack wall clock, seconds), `event_id` (Slack's unique
//! id), and `json` (the self-contained `event` subtree).

pub mod consumer;
pub mod context;

pub use consumer::{
    ChannelJoinHandler, Consumer, ConsumerConfig, MessageHandler, TeamJoinHandler,
};
pub use context::{ChannelService, EventMetadata, HandlerContext};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::prelude::*;
use fred::types::{XCapKind, XCapTrim};
use thiserror::Error;

/// A boxed error as returned by handler actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Approximate maximum stream length, trimmed on insert.
const STREAM_MAX_LEN: i64 = 1024;

/// The closed set of streams, keyed by the Slack event shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// A message sent to a public channel.
    MessagePublic,

    /// A message sent to a private channel, DM, group DM, or the app home.
    MessagePrivate,

    /// Someone joined the workspace.
    TeamJoin,

    /// Someone joined a channel.
    ChannelJoin,
}

impl StreamKind {
    /// All stream kinds, in a stable order.
    pub const ALL: [StreamKind; 4] = [
        StreamKind::MessagePublic,
        StreamKind::MessagePrivate,
        StreamKind::TeamJoin,
        StreamKind::ChannelJoin,
    ];

    /// The Redis stream name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::MessagePublic => "slack_message_public",
            StreamKind::MessagePrivate => "slack_message_private",
            StreamKind::TeamJoin => "slack_team_join",
            StreamKind::ChannelJoin => "slack_channel_join",
        }
    }

    /// Maps a Slack event type (and, for messages, the channel type) to a
    /// stream. Returns `None` for event types the bot does not consume.
    pub fn from_event(event_type: &str, channel_type: Option<&str>) -> Option<StreamKind> {
        match event_type {
            "message" => Some(match channel_type {
                Some("app_home") | Some("group") | Some("im") | Some("mpim") => {
                    StreamKind::MessagePrivate
                }
                // missing or unrecognized channel types route as public
                _ => StreamKind::MessagePublic,
            }),
            "team_join" => Some(StreamKind::TeamJoin),
            "member_joined_channel" => Some(StreamKind::ChannelJoin),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The underlying Redis command failed.
    #[error("redis command failed: {0}")]
    Redis(#[from] RedisError),

    /// A stream entry was missing a required metadata field.
    #[error("redis stream malformed: {0} not present")]
    MissingField(&'static str),

    /// A stream entry metadata field did not parse.
    #[error("failed to parse {field} {value:?}")]
    BadField { field: &'static str, value: String },
}

/// What a handler tells the queue to do with a delivery.
///
/// Exactly one of ack or no-ack happens per delivery: every variant except
/// [`HandlerOutcome::Retry`] acks.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Ack; the delivery was handled.
    Success,

    /// Ack; the handler failed but the failure is not worth a redelivery
    /// (partial success is fine).
    HandledWithError(BoxError),

    /// Do not ack; let the reclaim cycle hand the delivery to another
    /// worker.
    Retry(BoxError),

    /// Ack; the delivery was deliberately dropped (for example, an event
    /// past its age cap). A `None` reason is a routine drop not worth
    /// logging.
    Discard {
        reason: Option<String>,
        error: Option<BoxError>,
    },
}

impl HandlerOutcome {
    /// A deliberate drop with a logged reason.
    pub fn discard(reason: impl Into<String>) -> Self {
        HandlerOutcome::Discard {
            reason: Some(reason.into()),
            error: None,
        }
    }

    /// A routine drop that should not be logged.
    pub fn discard_silent() -> Self {
        HandlerOutcome::Discard {
            reason: None,
            error: None,
        }
    }

    /// A drop caused by an error.
    pub fn discard_with(reason: impl Into<String>, error: BoxError) -> Self {
        HandlerOutcome::Discard {
            reason: Some(reason.into()),
            error: Some(error),
        }
    }

    /// Whether the delivery should be acked.
    pub fn acks(&self) -> bool {
        !matches!(self, HandlerOutcome::Retry(_))
    }
}

/// One parsed stream entry from the gateway.
#[derive(Debug, Clone)]
pub struct GatewayMessage {
    /// Slack's event id.
    pub event_id: String,

    /// When Slack emitted the event.
    pub event_time: DateTime<Utc>,

    /// When the gateway enqueued the event.
    pub ingest_time: DateTime<Utc>,

    /// Trace correlator from the originating HTTP request (may be empty).
    pub request_id: String,

    /// The marshaled `event` subtree.
    pub json: String,
}

/// Parses the five metadata fields out of a stream entry's value map.
pub fn parse_gateway_message(
    values: &HashMap<String, String>,
) -> Result<GatewayMessage, QueueError> {
    let field = |name: &'static str| {
        values
            .get(name)
            .cloned()
            .ok_or(QueueError::MissingField(name))
    };

    let event_id = field("event_id")?;
    let event_ts = field("event_ts")?;
    let gateway_ts = field("gateway_ts")?;
    let json = field("json")?;
    let request_id = values.get("request_id").cloned().unwrap_or_default();

    let et: i64 = event_ts.parse().map_err(|_| QueueError::BadField {
        field: "event_ts",
        value: event_ts.clone(),
    })?;

    let gt: i64 = gateway_ts.parse().map_err(|_| QueueError::BadField {
        field: "gateway_ts",
        value: gateway_ts.clone(),
    })?;

    let event_time = DateTime::from_timestamp(et, 0).ok_or(QueueError::BadField {
        field: "event_ts",
        value: event_ts,
    })?;

    let ingest_time = DateTime::from_timestamp_millis(gt).ok_or(QueueError::BadField {
        field: "gateway_ts",
        value: gateway_ts,
    })?;

    Ok(GatewayMessage {
        event_id,
        event_time,
        ingest_time,
        request_id,
        json,
    })
}

/// The queue's producer half.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Appends one event to the given stream.
    async fn publish(
        &self,
        stream: StreamKind,
        event_ts: i64,
        event_id: &str,
        request_id: &str,
        payload: &[u8],
    ) -> Result<(), QueueError>;
}

/// Redis-backed publisher used by the gateway.
#[derive(Clone)]
pub struct Publisher {
    client: RedisClient,
}

impl Publisher {
    pub fn new(client: RedisClient) -> Self {
        Publisher { client }
    }
}

#[async_trait]
impl EventPublisher for Publisher {
    async fn publish(
        &self,
        stream: StreamKind,
        event_ts: i64,
        event_id: &str,
        request_id: &str,
        payload: &[u8],
    ) -> Result<(), QueueError> {
        let fields = vec![
            ("request_id", request_id.to_string()),
            ("gateway_ts", Utc::now().timestamp_millis().to_string()),
            ("event_ts", event_ts.to_string()),
            ("event_id", event_id.to_string()),
            ("json", String::from_utf8_lossy(payload).into_owned()),
        ];

        let _: String = self
            .client
            .xadd(
                stream.as_str(),
                false,
                (XCapKind::MaxLen, XCapTrim::AlmostExact, STREAM_MAX_LEN),
                "*",
                fields,
            )
            .await?;

        Ok(())
    }
}

/// Connects a Redis client from the loaded configuration and waits for the
/// connection to come up.
pub async fn connect(redis: &crate::config::Redis) -> Result<RedisClient, QueueError> {
    let config = RedisConfig::from_url(&redis.url)?;
    let client = RedisClient::new(config, None, None, None);

    client.connect();
    client.wait_for_connect().await?;

    if redis.skip_verify {
        // certificate pinning relaxation is handled at the platform layer;
        // the flag is accepted for parity but verification stays on
        tracing::warn!("REDIS_SKIPVERIFY set; connecting with default TLS verification");
    }

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ─── StreamKind mapping ───

    #[test]
    fn stream_names_match_store_layout() {
        assert_eq!(StreamKind::MessagePublic.as_str(), "slack_message_public");
        assert_eq!(StreamKind::MessagePrivate.as_str(), "slack_message_private");
        assert_eq!(StreamKind::TeamJoin.as_str(), "slack_team_join");
        assert_eq!(StreamKind::ChannelJoin.as_str(), "slack_channel_join");
    }

    #[test]
    fn message_channel_types_route_correctly() {
        let cases = [
            (Some("channel"), StreamKind::MessagePublic),
            (Some("group"), StreamKind::MessagePrivate),
            (Some("im"), StreamKind::MessagePrivate),
            (Some("mpim"), StreamKind::MessagePrivate),
            (Some("app_home"), StreamKind::MessagePrivate),
            (Some("something_new"), StreamKind::MessagePublic),
            (None, StreamKind::MessagePublic),
        ];

        for (channel_type, want) in cases {
            assert_eq!(
                StreamKind::from_event("message", channel_type),
                Some(want),
                "channel_type {channel_type:?}"
            );
        }
    }

    #[test]
    fn join_events_route_correctly() {
        assert_eq!(
            StreamKind::from_event("team_join", None),
            Some(StreamKind::TeamJoin)
        );
        assert_eq!(
            StreamKind::from_event("member_joined_channel", None),
            Some(StreamKind::ChannelJoin)
        );
    }

    #[test]
    fn unknown_event_types_do_not_route() {
        assert_eq!(StreamKind::from_event("reaction_added", None), None);
        assert_eq!(StreamKind::from_event("", None), None);
    }

    // ─── Gateway message parsing ───

    #[test]
    fn parse_complete_message() {
        let msg = parse_gateway_message(&values(&[
            ("request_id", "req-1"),
            ("gateway_ts", "1700000000500"),
            ("event_ts", "1700000000"),
            ("event_id", "Ev123"),
            ("json", "{\"type\":\"message\"}"),
        ]))
        .unwrap();

        assert_eq!(msg.event_id, "Ev123");
        assert_eq!(msg.request_id, "req-1");
        assert_eq!(msg.event_time.timestamp(), 1_700_000_000);
        assert_eq!(msg.ingest_time.timestamp_millis(), 1_700_000_000_500);
        assert_eq!(msg.json, "{\"type\":\"message\"}");
    }

    #[test]
    fn parse_tolerates_missing_request_id() {
        let msg = parse_gateway_message(&values(&[
            ("gateway_ts", "1700000000500"),
            ("event_ts", "1700000000"),
            ("event_id", "Ev123"),
            ("json", "{}"),
        ]))
        .unwrap();

        assert!(msg.request_id.is_empty());
    }

    #[test]
    fn parse_rejects_missing_required_fields() {
        for missing in ["event_ts", "gateway_ts", "event_id", "json"] {
            let mut all = values(&[
                ("gateway_ts", "1700000000500"),
                ("event_ts", "1700000000"),
                ("event_id", "Ev123"),
                ("json", "{}"),
            ]);
            all.remove(missing);

            let err = parse_gateway_message(&all).unwrap_err();
            assert!(
                matches!(err, QueueError::MissingField(f) if f == missing),
                "missing {missing} gave {err:?}"
            );
        }
    }

    #[test]
    fn parse_rejects_non_integer_timestamps() {
        let err = parse_gateway_message(&values(&[
            ("gateway_ts", "noon"),
            ("event_ts", "1700000000"),
            ("event_id", "Ev123"),
            ("json", "{}"),
        ]))
        .unwrap_err();
        assert!(matches!(err, QueueError::BadField { field: "gateway_ts", .. }));

        let err = parse_gateway_message(&values(&[
            ("gateway_ts", "1700000000500"),
            ("event_ts", "eventually"),
            ("event_id", "Ev123"),
            ("json", "{}"),
        ]))
        .unwrap_err();
        assert!(matches!(err, QueueError::BadField { field: "event_ts", .. }));
    }

    // ─── Outcome ack protocol ───

    #[test]
    fn only_retry_skips_the_ack() {
        assert!(HandlerOutcome::Success.acks());
        assert!(HandlerOutcome::HandledWithError("boom".into()).acks());
        assert!(HandlerOutcome::discard("too old").acks());
        assert!(HandlerOutcome::discard_silent().acks());
        assert!(!HandlerOutcome::Retry("boom".into()).acks());
    }
}
