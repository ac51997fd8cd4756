//! Narrow Slack Web API surface used by the bot.
//!
//! This module exposes the handful of REST calls the bot actually needs
//! (identity lookup, channel listing, posting, reacting) plus the serde
//! types for the event payloads that arrive through the queue. The rest of
//! Slack's API is deliberately out of scope.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ChatClient, MessageOptions};
pub use error::SlackError;
pub use types::{
    Attachment, Channel, File, MemberJoinedChannelEvent, MessageEvent, TeamJoinEvent, User,
    UserProfile,
};
