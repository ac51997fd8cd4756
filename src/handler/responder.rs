//! The responder capability handed to handler actions.
//!
//! A responder captures the outbound half of the chat client for one
//! message: reacting, replying in channel or thread, replying with
//! mentions, ephemeral replies, and DMs. Handlers talk to this trait
//! rather than the raw client so they stay testable.

use async_trait::async_trait;

use crate::mparser::{self, Mention, MentionKind};
use crate::queue::{BoxError, HandlerContext};
use crate::slack::{Attachment, MessageOptions};

use super::Message;

/// Outbound message capability for a single incoming message.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Adds an emoji reaction to the message.
    async fn react(&self, ctx: &HandlerContext, emoji: &str) -> Result<(), BoxError>;

    /// Responds in the channel or thread.
    async fn respond(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;

    /// Same as respond, but prefixes the message with an at-mention of the
    /// user who triggered the action. Helpful when responding with an
    /// error message.
    async fn respond_to(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;

    /// Same as respond, except Slack is asked to render URL previews.
    async fn respond_unfurled(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;

    /// Responds with a text attachment (helpful for long content).
    async fn respond_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError>;

    /// Responds and mentions any users who were mentioned in the original
    /// message.
    async fn respond_mentions(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;

    /// [`Responder::respond_mentions`] with URL previews enabled.
    async fn respond_mentions_unfurled(
        &self,
        ctx: &HandlerContext,
        msg: &str,
    ) -> Result<(), BoxError>;

    /// [`Responder::respond_mentions`] with an additional text attachment.
    async fn respond_mentions_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError>;

    /// Responds with a message only the sender will see.
    async fn respond_ephemeral(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;

    /// [`Responder::respond_ephemeral`] with an additional text
    /// attachment.
    async fn respond_ephemeral_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError>;

    /// Sends a DM to the user instead of responding in the channel.
    async fn respond_dm(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError>;
}

/// The Slack-backed responder.
#[derive(Clone)]
pub struct SlackResponder {
    message: Message,
}

impl SlackResponder {
    pub fn new(message: Message) -> Self {
        SlackResponder { message }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        ctx: &HandlerContext,
        mention_user: bool,
        use_mentions: bool,
        ephemeral: bool,
        unfurled: bool,
        target: &str,
        msg: &str,
        attachment: Option<&str>,
    ) -> Result<(), BoxError> {
        if use_mentions && ephemeral {
            return Err("cannot use mentions for ephemeral messages".into());
        }

        let mut msg = msg.to_string();

        if use_mentions && !self.message.user_mentions.is_empty() {
            msg = format!("{}{}", mparser::join(&self.message.user_mentions, " "), msg);
        }

        // after the above, so the original user is first in the message
        if mention_user {
            let user = Mention {
                kind: MentionKind::User,
                id: self.message.user_id.clone(),
                label: None,
            };
            msg = format!("{user} {msg}");
        }

        let opts = MessageOptions {
            thread_ts: (!self.message.thread_ts.is_empty())
                .then(|| self.message.thread_ts.clone()),
            // a command triggered in a shared thread reply shares our
            // reply with the channel too
            broadcast: self.message.subtype == "thread_broadcast",
            unfurl: unfurled,
            attachments: attachment.map(Attachment::text).into_iter().collect(),
        };

        if ephemeral {
            ctx.slack()
                .post_ephemeral(target, &self.message.user_id, &msg, &opts)
                .await
                .map_err(|e| format!("failed to post ephemeral message: {e}"))?;
        } else {
            ctx.slack()
                .post_message(target, &msg, &opts)
                .await
                .map_err(|e| format!("failed to post message: {e}"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Responder for SlackResponder {
    async fn react(&self, ctx: &HandlerContext, emoji: &str) -> Result<(), BoxError> {
        ctx.slack()
            .add_reaction(emoji, &self.message.channel_id, &self.message.message_ts)
            .await
            .map_err(|e| format!("failed to add reaction: {e}"))?;

        Ok(())
    }

    async fn respond(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, false, false, false, false, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_to(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, true, false, false, false, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_unfurled(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, false, false, false, true, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError> {
        self.send(
            ctx,
            false,
            false,
            false,
            false,
            &self.message.channel_id,
            msg,
            Some(attachment),
        )
        .await
    }

    async fn respond_mentions(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, false, true, false, false, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_mentions_unfurled(
        &self,
        ctx: &HandlerContext,
        msg: &str,
    ) -> Result<(), BoxError> {
        self.send(ctx, false, true, false, true, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_mentions_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError> {
        self.send(
            ctx,
            false,
            true,
            false,
            false,
            &self.message.channel_id,
            msg,
            Some(attachment),
        )
        .await
    }

    async fn respond_ephemeral(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, true, false, true, false, &self.message.channel_id, msg, None)
            .await
    }

    async fn respond_ephemeral_text_attachment(
        &self,
        ctx: &HandlerContext,
        msg: &str,
        attachment: &str,
    ) -> Result<(), BoxError> {
        self.send(
            ctx,
            true,
            false,
            true,
            false,
            &self.message.channel_id,
            msg,
            Some(attachment),
        )
        .await
    }

    async fn respond_dm(&self, ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
        self.send(ctx, false, false, false, false, &self.message.user_id, msg, None)
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A responder that records calls instead of hitting Slack.

    use std::sync::Mutex;

    use super::*;

    /// One recorded responder call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Reaction(String),
        Message(String),
        Ephemeral(String),
        Dm(String),
    }

    #[derive(Default)]
    pub struct RecordingResponder {
        pub sent: Mutex<Vec<Sent>>,
        pub fail: bool,
    }

    impl RecordingResponder {
        pub fn failing() -> Self {
            RecordingResponder {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn calls(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, call: Sent) -> Result<(), BoxError> {
            if self.fail {
                return Err("responder failed".into());
            }

            self.sent.lock().unwrap().push(call);
            Ok(())
        }
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn react(&self, _ctx: &HandlerContext, emoji: &str) -> Result<(), BoxError> {
            self.record(Sent::Reaction(emoji.to_string()))
        }

        async fn respond(&self, _ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
            self.record(Sent::Message(msg.to_string()))
        }

        async fn respond_to(&self, _ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
            self.record(Sent::Message(msg.to_string()))
        }

        async fn respond_unfurled(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Message(msg.to_string()))
        }

        async fn respond_text_attachment(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
            attachment: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Message(format!("{msg}\n{attachment}")))
        }

        async fn respond_mentions(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Message(msg.to_string()))
        }

        async fn respond_mentions_unfurled(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Message(msg.to_string()))
        }

        async fn respond_mentions_text_attachment(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
            attachment: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Message(format!("{msg}\n{attachment}")))
        }

        async fn respond_ephemeral(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Ephemeral(msg.to_string()))
        }

        async fn respond_ephemeral_text_attachment(
            &self,
            _ctx: &HandlerContext,
            msg: &str,
            attachment: &str,
        ) -> Result<(), BoxError> {
            self.record(Sent::Ephemeral(format!("{msg}\n{attachment}")))
        }

        async fn respond_dm(&self, _ctx: &HandlerContext, msg: &str) -> Result<(), BoxError> {
            self.record(Sent::Dm(msg.to_string()))
        }
    }
}
