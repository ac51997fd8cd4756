//! Serde types for Slack API objects and event payloads.
//!
//! Fields default aggressively: Slack adds and omits fields freely, and a
//! missing optional field must never fail deserialization of an otherwise
//! valid event.

use serde::{Deserialize, Serialize};

/// A Slack user profile (the subset the bot reads).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub real_name: String,
}

/// A Slack user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub is_bot: bool,

    #[serde(default)]
    pub profile: UserProfile,
}

/// A Slack conversation (public or private channel).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Channel {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub is_private: bool,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(default)]
    pub num_members: i64,
}

/// A file attached to a message event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct File {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub filetype: String,

    #[serde(default)]
    pub url_private: String,
}

/// A legacy message attachment. The `text` form is all the bot sends.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback: String,
}

impl Attachment {
    /// A plain text attachment.
    pub fn text(text: impl Into<String>) -> Self {
        Attachment {
            text: text.into(),
            fallback: String::new(),
        }
    }
}

/// The `event` subtree of a `message` event callback.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub subtype: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default)]
    pub channel_type: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub ts: String,

    #[serde(default)]
    pub thread_ts: String,

    #[serde(default)]
    pub files: Vec<File>,
}

/// The `event` subtree of a `team_join` event callback.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TeamJoinEvent {
    pub user: User,
}

/// The `event` subtree of a `member_joined_channel` event callback.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemberJoinedChannelEvent {
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub channel: String,

    #[serde(default)]
    pub channel_type: String,

    #[serde(default)]
    pub inviter: String,
}
