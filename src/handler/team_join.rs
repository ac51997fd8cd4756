//! Actions taken when someone joins the workspace.
//!
//! Welcome actions run in registration order. The retry policy is
//! deliberate: if the very first action fails we ask for a redelivery (the
//! new member got nothing), but once any action has succeeded, later
//! failures are only logged so the member isn't welcomed twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use crate::mparser::Mention;
use crate::queue::{BoxError, HandlerContext, HandlerOutcome};
use crate::slack::{TeamJoinEvent, User};

use super::responder::{Responder, SlackResponder};
use super::Message;

/// Retry is abandoned for events older than this.
const MAX_JOIN_AGE_SECS: i64 = 600;

/// The future returned by a team-join action.
pub type TeamJoinActionFuture =
    std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// An action taken when a user joins the workspace.
pub type TeamJoinActionFn =
    Arc<dyn Fn(HandlerContext, User, Arc<dyn Responder>) -> TeamJoinActionFuture + Send + Sync>;

struct TeamJoinAction {
    name: String,
    action: TeamJoinActionFn,
}

/// Registry of workspace-join welcome actions.
pub struct TeamJoinActions {
    shadow: bool,
    actions: Vec<TeamJoinAction>,
}

impl TeamJoinActions {
    pub fn new(shadow_mode: bool) -> Self {
        TeamJoinActions {
            shadow: shadow_mode,
            actions: Vec::new(),
        }
    }

    /// Registers an action to run for new members, after those already
    /// registered.
    pub fn handle<F>(&mut self, name: &str, action: F)
    where
        F: Fn(HandlerContext, User, Arc<dyn Responder>) -> TeamJoinActionFuture
            + Send
            + Sync
            + 'static,
    {
        self.actions.push(TeamJoinAction {
            name: name.to_string(),
            action: Arc::new(action),
        });
    }

    /// Builds the synthetic message a welcome responder operates on: a DM
    /// to the joiner, with the joiner as the sole mention.
    fn joiner_message(user_id: &str) -> Message {
        let mention = Mention::user(user_id);

        let mut msg = Message::new(user_id, "im", user_id, "", "", "", "", Vec::new());
        msg.all_mentions = vec![mention.clone()];
        msg.user_mentions = vec![mention];
        msg
    }
}

#[async_trait]
impl crate::queue::TeamJoinHandler for TeamJoinActions {
    async fn handle(&self, ctx: HandlerContext, event: TeamJoinEvent) -> HandlerOutcome {
        let user = event.user;
        let responder: Arc<dyn Responder> =
            Arc::new(SlackResponder::new(Self::joiner_message(&user.id)));

        let mut some_worked = false;

        for a in &self.actions {
            if self.shadow {
                info!(user_id = %user.id, shadow_mode = true, "would welcome user");
                continue;
            }

            match (a.action)(ctx.clone(), user.clone(), Arc::clone(&responder)).await {
                Ok(()) => some_worked = true,
                Err(e) => {
                    if some_worked {
                        error!(
                            error = %e,
                            join_action = %a.name,
                            "failed to take action"
                        );

                        return HandlerOutcome::Success;
                    }

                    // too old to keep retrying
                    let age = Utc::now().signed_duration_since(ctx.meta().time);
                    if age.num_seconds() >= MAX_JOIN_AGE_SECS {
                        return HandlerOutcome::discard_with(
                            "discarding failed join action due to age",
                            e,
                        );
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
