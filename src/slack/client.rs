//! Slack Web API client.
//!
//! Bearer-token JSON client over `https://slack.com/api`. Slack wraps every
//! response in an `{"ok": bool, "error": "..."}` envelope, including for
//! HTTP 200 responses, so each call checks both the status and the `ok`
//! flag.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::error::SlackError;
use super::types::{Attachment, Channel, User};

const DEFAULT_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for an outgoing message.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Parent message ts; set when replying in a thread.
    pub thread_ts: Option<String>,

    /// Also send the threaded reply to the channel.
    pub broadcast: bool,

    /// Ask Slack to render link and media previews.
    pub unfurl: bool,

    /// Legacy attachments.
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,

    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersInfoResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

/// The Slack Web API client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl ChatClient {
    /// Creates a client using the bot access token.
    pub fn new(token: impl Into<String>) -> Result<Self, SlackError> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Creates a client against a non-default API base (used by tests).
    pub fn with_api_base(
        token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, SlackError> {
        let http = reqwest::Client::builder()
            .user_agent("switchboard")
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(ChatClient {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Checks the token and returns the bot's own user id.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let resp: AuthTestResponse = self.call("auth.test", &json!({})).await?;

        if !resp.ok {
            return Err(SlackError::Api {
                method: "auth.test",
                error: resp.error,
            });
        }

        resp.user_id.ok_or(SlackError::MissingField {
            method: "auth.test",
            field: "user_id",
        })
    }

    /// Fetches a user's full record.
    pub async fn users_info(&self, user_id: &str) -> Result<User, SlackError> {
        let resp: UsersInfoResponse = self
            .call("users.info", &json!({ "user": user_id }))
            .await?;

        if !resp.ok {
            return Err(SlackError::Api {
                method: "users.info",
                error: resp.error,
            });
        }

        resp.user.ok_or(SlackError::MissingField {
            method: "users.info",
            field: "user",
        })
    }

    /// Lists all non-archived channels the bot can see, following
    /// pagination cursors to the end.
    pub async fn conversations_list(&self) -> Result<Vec<Channel>, SlackError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut payload = json!({
                "exclude_archived": true,
                "limit": 200,
                "types": "public_channel,private_channel",
            });
            if !cursor.is_empty() {
                payload["cursor"] = Value::String(cursor.clone());
            }

            let resp: ConversationsListResponse =
                self.call("conversations.list", &payload).await?;

            if !resp.ok {
                return Err(SlackError::Api {
                    method: "conversations.list",
                    error: resp.error,
                });
            }

            channels.extend(resp.channels);

            cursor = resp.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(channels);
            }
        }
    }

    /// Posts a message to a channel (or a user id, which opens a DM).
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<(), SlackError> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": opts.unfurl,
            "unfurl_media": opts.unfurl,
        });

        if let Some(thread_ts) = &opts.thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.clone());
        }

        if opts.broadcast {
            payload["reply_broadcast"] = Value::Bool(true);
        }

        if !opts.attachments.is_empty() {
            payload["attachments"] = serde_json::to_value(&opts.attachments)
                .unwrap_or(Value::Array(Vec::new()));
        }

        let resp: ApiEnvelope = self.call("chat.postMessage", &payload).await?;

        if !resp.ok {
            return Err(SlackError::Api {
                method: "chat.postMessage",
                error: resp.error,
            });
        }

        Ok(())
    }

    /// Posts a message only the given user will see.
    pub async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<(), SlackError> {
        let mut payload = json!({
            "channel": channel,
            "user": user,
            "text": text,
        });

        if let Some(thread_ts) = &opts.thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.clone());
        }

        if !opts.attachments.is_empty() {
            payload["attachments"] = serde_json::to_value(&opts.attachments)
                .unwrap_or(Value::Array(Vec::new()));
        }

        let resp: ApiEnvelope = self.call("chat.postEphemeral", &payload).await?;

        if !resp.ok {
            return Err(SlackError::Api {
                method: "chat.postEphemeral",
                error: resp.error,
            });
        }

        Ok(())
    }

    /// Adds an emoji reaction to a message.
    pub async fn add_reaction(
        &self,
        emoji: &str,
        channel: &str,
        timestamp: &str,
    ) -> Result<(), SlackError> {
        let resp: ApiEnvelope = self
            .call(
                "reactions.add",
                &json!({
                    "name": emoji,
                    "channel": channel,
                    "timestamp": timestamp,
                }),
            )
            .await?;

        // already_reacted happens on redelivery and is fine
        if !resp.ok && resp.error != "already_reacted" {
            return Err(SlackError::Api {
                method: "reactions.add",
                error: resp.error,
            });
        }

        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        payload: &Value,
    ) -> Result<T, SlackError> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Status { method, status });
        }

        Ok(response.json().await?)
    }
}
