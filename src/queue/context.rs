//! The capability object handed to queue handlers.
//!
//! Handlers get everything they need through [`HandlerContext`] rather
//! than globals: event metadata, a cancellation signal tied to the
//! handler's deadline, the Slack client, the bot's own user record, and
//! the channel metadata cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheError;
use crate::slack::{ChatClient, Channel, User};

/// Metadata about the event a handler is processing.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    /// Slack's event id.
    pub id: String,

    /// When Slack emitted the event.
    pub time: DateTime<Utc>,

    /// When the gateway ingested the event.
    pub ingest_time: DateTime<Utc>,

    /// The Redis stream entry id carrying the event.
    pub stream_entry: String,

    /// Trace correlator from the originating HTTP request (may be empty).
    pub request_id: String,
}

/// Lookup access to the channel metadata cache.
#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Finds a channel by name (without the `#`). `Ok(None)` means the
    /// channel is not in the cache.
    async fn lookup(&self, name: &str) -> Result<Option<Channel>, CacheError>;
}

struct ContextInner {
    meta: EventMetadata,
    slack: ChatClient,
    self_user: User,
    channels: Arc<dyn ChannelService>,
    cancel: CancellationToken,
}

/// Per-delivery handler context.
///
/// Cheap to clone; all clones share the same cancellation signal, which
/// fires when the handler's deadline passes or the process shuts down.
#[derive(Clone)]
pub struct HandlerContext {
    inner: Arc<ContextInner>,
}

impl HandlerContext {
    pub fn new(
        meta: EventMetadata,
        slack: ChatClient,
        self_user: User,
        channels: Arc<dyn ChannelService>,
        cancel: CancellationToken,
    ) -> Self {
        HandlerContext {
            inner: Arc::new(ContextInner {
                meta,
                slack,
                self_user,
                channels,
                cancel,
            }),
        }
    }

    /// Metadata about the event being handled.
    pub fn meta(&self) -> &EventMetadata {
        &self.inner.meta
    }

    /// The Slack client.
    pub fn slack(&self) -> &ChatClient {
        &self.inner.slack
    }

    /// The bot's own user record.
    pub fn self_user(&self) -> &User {
        &self.inner.self_user
    }

    /// The channel metadata cache.
    pub fn channels(&self) -> &dyn ChannelService {
        self.inner.channels.as_ref()
    }

    /// The cancellation token tied to this handler's deadline.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// True once the deadline has passed or shutdown started.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context construction helpers shared by handler tests.

    use super::*;
    use std::collections::HashMap;

    /// A channel service backed by a fixed map.
    #[derive(Default)]
    pub struct StaticChannels {
        channels: HashMap<String, Channel>,
    }

    impl StaticChannels {
        pub fn with(channels: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(StaticChannels {
                channels: channels
                    .iter()
                    .map(|(name, id)| {
                        (
                            name.to_string(),
                            Channel {
                                id: id.to_string(),
                                name: name.to_string(),
                                ..Channel::default()
                            },
                        )
                    })
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl ChannelService for StaticChannels {
        async fn lookup(&self, name: &str) -> Result<Option<Channel>, CacheError> {
            Ok(self.channels.get(name).cloned())
        }
    }

    /// A context for a synthetic event, suitable for driving handlers in
    /// tests. `age` controls how old the event appears to be.
    pub fn context(self_id: &str, age: chrono::Duration) -> HandlerContext {
        let now = Utc::now();
        HandlerContext::new(
            EventMetadata {
                id: "Ev-test".to_string(),
                time: now - age,
                ingest_time: now - age,
                stream_entry: "0-1".to_string(),
                request_id: "req-test".to_string(),
            },
            ChatClient::with_api_base("xoxb-test", "http://localhost:1/api").unwrap(),
            User {
                id: self_id.to_string(),
                name: "switchboard".to_string(),
                ..User::default()
            },
            StaticChannels::with(&[]),
            CancellationToken::new(),
        )
    }
}
