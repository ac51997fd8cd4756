//! Actions taken when someone joins a specific channel.
//!
//! Unlike workspace joins, registrations here are keyed by channel id:
//! most channels have no welcome at all, and a join event for one of those
//! is silently dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::mparser::Mention;
use crate::queue::{BoxError, HandlerContext, HandlerOutcome};
use crate::slack::MemberJoinedChannelEvent;

use super::responder::{Responder, SlackResponder};
use super::Message;

/// A channel join, as seen by join actions.
#[derive(Debug, Clone)]
pub struct ChannelJoiner {
    pub channel_id: String,
    pub user_id: String,
}

/// The future returned by a channel-join action.
pub type ChannelJoinActionFuture =
    std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// An action taken when a user joins a channel.
pub type ChannelJoinActionFn = Arc<
    dyn Fn(HandlerContext, ChannelJoiner, Arc<dyn Responder>) -> ChannelJoinActionFuture
        + Send
        + Sync,
>;

struct ChannelJoinAction {
    name: String,
    action: ChannelJoinActionFn,
}

/// Registry of per-channel welcome actions.
pub struct ChannelJoinActions {
    shadow: bool,
    actions: HashMap<String, Vec<ChannelJoinAction>>,
}

impl ChannelJoinActions {
    pub fn new(shadow_mode: bool) -> Self {
        ChannelJoinActions {
            shadow: shadow_mode,
            actions: HashMap::new(),
        }
    }

    /// Registers an action for joins of the given channel, after any
    /// already registered for it.
    pub fn handle<F>(&mut self, name: &str, channel_id: &str, action: F)
    where
        F: Fn(HandlerContext, ChannelJoiner, Arc<dyn Responder>) -> ChannelJoinActionFuture
            + Send
            + Sync
            + 'static,
    {
        self.actions
            .entry(channel_id.to_string())
            .or_default()
            .push(ChannelJoinAction {
                name: name.to_string(),
                action: Arc::new(action),
            });
    }

    /// Registers an action that sends the joining user an ephemeral
    /// message built from `content` joined by newlines.
    pub fn handle_static(&mut self, name: &str, channel_id: &str, content: &[&str]) {
        let msg = content.join("\n");

        self.handle(name, channel_id, move |ctx, _joiner, r| {
            let msg = msg.clone();
            Box::pin(async move { r.respond_ephemeral(&ctx, &msg).await })
        });
    }

    fn joiner_message(joiner: &ChannelJoiner, channel_type: &str) -> Message {
        let mention = Mention::user(&joiner.user_id);

        let mut msg = Message::new(
            &joiner.channel_id,
            channel_type,
            &joiner.user_id,
            "",
            "",
            "",
            "",
            Vec::new(),
        );
        msg.all_mentions = vec![mention.clone()];
        msg.user_mentions = vec![mention];
        msg
    }
}

#[async_trait]
impl crate::queue::ChannelJoinHandler for ChannelJoinActions {
    async fn handle(
        &self,
        ctx: HandlerContext,
        event: MemberJoinedChannelEvent,
    ) -> HandlerOutcome {
        let joiner = ChannelJoiner {
            channel_id: event.channel.clone(),
            user_id: event.user.clone(),
        };

        let Some(actions) = self.actions.get(&joiner.channel_id) else {
            // nothing registered for this channel; routine, not loggable
            return HandlerOutcome::discard_silent();
        };

        let responder: Arc<dyn Responder> = Arc::new(SlackResponder::new(
            Self::joiner_message(&joiner, &event.channel_type),
        ));

        let mut some_worked = false;

        for a in actions {
            if self.shadow {
                info!(
                    channel_id = %joiner.channel_id,
                    user_id = %joiner.user_id,
                    shadow_mode = true,
                    "would welcome user"
                );
                continue;
            }

            match (a.action)(ctx.clone(), joiner.clone(), Arc::clone(&responder)).await {
                Ok(()) => some_worked = true,
                Err(e) => {
                    if some_worked {
                        error!(
                            error = %e,
                            channel_id = %joiner.channel_id,
                            user_id = %joiner.user_id,
                            join_action = %a.name,
                            "failed to take action"
                        );

                        return HandlerOutcome::Success;
                    }

                    return HandlerOutcome::Retry(
                        format!("failed to take join action: {e}").into(),
                    );
                }
            }
        }

        HandlerOutcome::Success
    }
}
