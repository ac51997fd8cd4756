//! Channel metadata cache.
//!
//! Handlers need to resolve channel names ("join #general") without
//! hitting Slack on every message, so a background poller mirrors the
//! workspace channel list into the store under `cache:channel:by_id:<id>`
//! and `cache:channel:by_name:<name>`. Entries carry a content hash so an
//! unchanged channel is only rewritten when its TTL is close to expiry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::queue::ChannelService;
use crate::slack::{Channel, ChatClient, SlackError};

const BY_ID_PREFIX: &str = "cache:channel:by_id:";
const BY_NAME_PREFIX: &str = "cache:channel:by_name:";

/// How long cache entries live.
const CACHE_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Unchanged entries are rewritten once expiry is this close.
const REFRESH_WINDOW: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis command failed: {0}")]
    Redis(#[from] RedisError),

    #[error("failed to decode cached channel: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to list channels: {0}")]
    Slack(#[from] SlackError),
}

/// The store-backed channel cache.
#[derive(Clone)]
pub struct ChannelCache {
    client: RedisClient,
}

impl ChannelCache {
    pub fn new(client: RedisClient) -> Self {
        ChannelCache { client }
    }

    /// Finds a channel by id. `Ok(None)` means not cached.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Channel>, CacheError> {
        let data: Option<String> = self.client.get(format!("{BY_ID_PREFIX}{id}")).await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Finds a channel by name, without the `#`. `Ok(None)` means not
    /// cached.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Channel>, CacheError> {
        let id: Option<String> = self.client.get(format!("{BY_NAME_PREFIX}{name}")).await?;

        match id {
            Some(id) => self.get_by_id(&id).await,
            None => Ok(None),
        }
    }

    async fn stored_hash(&self, id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.client.get(format!("{BY_ID_PREFIX}{id}:hash")).await?)
    }

    /// Remaining TTL of an entry; `None` when the entry is missing or has
    /// no expiry.
    async fn remaining_ttl(&self, id: &str) -> Result<Option<Duration>, CacheError> {
        let secs: i64 = self.client.ttl(format!("{BY_ID_PREFIX}{id}")).await?;

        if secs < 0 {
            return Ok(None);
        }

        Ok(Some(Duration::from_secs(secs as u64)))
    }

    async fn put(&self, id: &str, name: &str, data: &str, hash: &str) -> Result<(), CacheError> {
        let expire = Some(fred::types::Expiration::EX(CACHE_TTL.as_secs() as i64));

        let _: () = self
            .client
            .set(format!("{BY_ID_PREFIX}{id}"), data, expire.clone(), None, false)
            .await?;

        let _: () = self
            .client
            .set(format!("{BY_NAME_PREFIX}{name}"), id, expire.clone(), None, false)
            .await?;

        let _: () = self
            .client
            .set(format!("{BY_ID_PREFIX}{id}:hash"), hash, expire, None, false)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ChannelService for ChannelCache {
    async fn lookup(&self, name: &str) -> Result<Option<Channel>, CacheError> {
        self.get_by_name(name).await
    }
}

/// Lower-hex SHA-256 of a serialized channel entry.
fn hash_entry(json: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json);
    hex::encode(hasher.finalize())
}

/// Decides whether an entry needs rewriting given its stored hash and
/// remaining TTL.
fn needs_refresh(
    new_hash: &str,
    stored_hash: Option<&str>,
    remaining: Option<Duration>,
) -> bool {
    match (stored_hash, remaining) {
        // fresh enough and unchanged: leave it alone
        (Some(stored), Some(remaining)) => stored != new_hash || remaining <= REFRESH_WINDOW,
        _ => true,
    }
}

/// Fills the store-backed cache from the Slack channel list.
pub struct ChannelFiller {
    slack: ChatClient,
    cache: ChannelCache,
}

impl ChannelFiller {
    pub fn new(slack: ChatClient, cache: ChannelCache) -> Self {
        ChannelFiller { slack, cache }
    }

    /// Loads the full channel list and upserts changed or expiring
    /// entries.
    pub async fn fill(&self) -> Result<(), CacheError> {
        let channels = self.slack.conversations_list().await?;

        let mut written = 0usize;

        for channel in &channels {
            let json = serde_json::to_string(channel)?;
            let hash = hash_entry(json.as_bytes());

            let stored = self.cache.stored_hash(&channel.id).await?;
            let remaining = self.cache.remaining_ttl(&channel.id).await?;

            if !needs_refresh(&hash, stored.as_deref(), remaining) {
                continue;
            }

            self.cache
                .put(&channel.id, &channel.name, &json, &hash)
                .await?;
            written += 1;
        }

        debug!(
            processed_count = channels.len(),
            written_count = written,
            "processed channels"
        );

        Ok(())
    }
}

/// An in-memory channel cache guarded by a reader-writer lock.
///
/// Used by tests and anywhere a store round-trip isn't warranted.
#[derive(Default)]
pub struct InMemoryChannelCache {
    inner: RwLock<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    by_id: HashMap<String, Channel>,
    by_name: HashMap<String, String>,
}

impl InMemoryChannelCache {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryChannelCache::default())
    }

    /// Replaces the cache contents.
    pub fn replace(&self, channels: Vec<Channel>) {
        let mut inner = self.inner.write().expect("channel cache lock poisoned");

        inner.by_id.clear();
        inner.by_name.clear();

        for channel in channels {
            inner
                .by_name
                .insert(channel.name.clone(), channel.id.clone());
            inner.by_id.insert(channel.id.clone(), channel);
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<Channel> {
        self.inner
            .read()
            .expect("channel cache lock poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Channel> {
        let inner = self.inner.read().expect("channel cache lock poisoned");
        let id = inner.by_name.get(name)?;
        inner.by_id.get(id).cloned()
    }
}

#[async_trait]
impl ChannelService for InMemoryChannelCache {
    async fn lookup(&self, name: &str) -> Result<Option<Channel>, CacheError> {
        Ok(self.get_by_name(name))
    }
}
