//! Episode feed poller.
//!
//! Watches a JSON feed for newly published episodes and announces them to
//! a channel. The id of the last announced episode is bookmarked in the
//! store so restarts and redeployments don't re-announce the backlog.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::queue::BoxError;
use crate::slack::{ChatClient, MessageOptions};

use super::Poller;

const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);
const POLL_JITTER: Duration = Duration::from_secs(30);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Bookmarks live long enough to survive extended downtime.
const BOOKMARK_TTL: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// One feed item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Episode {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: String,
}

/// Fetches the feed, newest first.
#[async_trait]
pub trait EpisodeFetcher: Send + Sync {
    async fn latest(&self) -> Result<Vec<Episode>, BoxError>;
}

/// A fetcher reading a JSON array endpoint.
pub struct JsonFeedFetcher {
    http: reqwest::Client,
    url: String,
}

impl JsonFeedFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(JsonFeedFetcher {
            http: reqwest::Client::builder()
                .user_agent("switchboard")
                .timeout(Duration::from_secs(10))
                .build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EpisodeFetcher for JsonFeedFetcher {
    async fn latest(&self) -> Result<Vec<Episode>, BoxError> {
        let episodes = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(episodes)
    }
}

/// Remembers the last announced episode per poller.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn last_id(&self) -> Result<Option<String>, BoxError>;
    async fn set_last_id(&self, id: &str) -> Result<(), BoxError>;
}

/// Store-backed bookmarks under `poller:<name>:last_id`.
pub struct RedisBookmarks {
    client: RedisClient,
    key: String,
}

impl RedisBookmarks {
    pub fn new(client: RedisClient, poller_name: &str) -> Self {
        RedisBookmarks {
            client,
            key: format!("poller:{poller_name}:last_id"),
        }
    }
}

#[async_trait]
impl BookmarkStore for RedisBookmarks {
    async fn last_id(&self) -> Result<Option<String>, BoxError> {
        let id: Option<String> = self.client.get(&self.key).await?;
        Ok(id)
    }

    async fn set_last_id(&self, id: &str) -> Result<(), BoxError> {
        let _: () = self
            .client
            .set(
                &self.key,
                id,
                Some(fred::types::Expiration::EX(BOOKMARK_TTL.as_secs() as i64)),
                None,
                false,
            )
            .await?;

        Ok(())
    }
}

/// In-memory bookmarks for tests.
#[derive(Default)]
pub struct InMemoryBookmarks {
    last: Mutex<Option<String>>,
}

#[async_trait]
impl BookmarkStore for InMemoryBookmarks {
    async fn last_id(&self) -> Result<Option<String>, BoxError> {
        Ok(self.last.lock().expect("bookmark lock poisoned").clone())
    }

    async fn set_last_id(&self, id: &str) -> Result<(), BoxError> {
        *self.last.lock().expect("bookmark lock poisoned") = Some(id.to_string());
        Ok(())
    }
}

/// The announcing poller.
pub struct EpisodePoller {
    fetcher: Arc<dyn EpisodeFetcher>,
    bookmarks: Arc<dyn BookmarkStore>,
    slack: ChatClient,
    channel_id: String,
}

impl EpisodePoller {
    pub fn new(
        fetcher: Arc<dyn EpisodeFetcher>,
        bookmarks: Arc<dyn BookmarkStore>,
        slack: ChatClient,
        channel_id: impl Into<String>,
    ) -> Self {
        EpisodePoller {
            fetcher,
            bookmarks,
            slack,
            channel_id: channel_id.into(),
        }
    }

    /// One poll: announce everything newer than the bookmark, oldest
    /// first, bookmarking after each send so a crash never re-announces.
    pub async fn tick(&self) -> Result<(), BoxError> {
        let episodes = self.fetcher.latest().await?;
        if episodes.is_empty() {
            return Ok(());
        }

        let last = self.bookmarks.last_id().await?;

        let Some(last) = last else {
            // first run: bookmark the newest without announcing the
            // backlog
            let newest = &episodes[0];
            info!(episode = %newest.id, "no bookmark; starting from the newest episode");
            return self.bookmarks.set_last_id(&newest.id).await;
        };

        let fresh: Vec<&Episode> = episodes
            .iter()
            .take_while(|e| e.id != last)
            .collect();

        if fresh.is_empty() {
            debug!("no new episodes");
            return Ok(());
        }

        for episode in fresh.iter().rev() {
            let msg = format!(
                ":studio_microphone: {} is out! {}",
                episode.title, episode.url
            );

            self.slack
                .post_message(
                    &self.channel_id,
                    &msg,
                    &MessageOptions {
                        unfurl: true,
                        ..MessageOptions::default()
                    },
                )
                .await?;

            self.bookmarks.set_last_id(&episode.id).await?;
        }

        Ok(())
    }

    /// Runs the poller until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let poller = Poller::new("episodes", POLL_INTERVAL, POLL_JITTER, POLL_TIMEOUT, move || {
            let this = Arc::clone(&self);
            async move { this.tick().await }
        });

        poller.run(shutdown).await;
    }
}
