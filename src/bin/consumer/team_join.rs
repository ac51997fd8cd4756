//! Welcome actions for new workspace members.

use std::fmt::Write as _;

use switchboard::handler::{Responder as _, TeamJoinActions};
use switchboard::queue::{ChannelService, HandlerContext};

use crate::responses::RECOMMENDED_CHANNELS;

pub fn inject_team_join_handlers(tja: &mut TeamJoinActions) {
    tja.handle("welcome dm", |ctx, user, r| {
        Box::pin(async move {
            let msg = welcome_message(&ctx, ctx.channels()).await
                .map_err(|e| format!("failed to generate welcome message: {e}"))?;

            tracing::debug!(
                user_id = %user.id,
                joined_time = %ctx.meta().time,
                msg_len = msg.len(),
                "welcoming user"
            );

            r.respond_dm(&ctx, &msg).await
        })
    });
}

/// Builds the welcome DM, listing the welcome-flagged recommended
/// channels that resolve in the cache.
async fn welcome_message(
    ctx: &HandlerContext,
    channels: &dyn ChannelService,
) -> Result<String, switchboard::queue::BoxError> {
    let mut listing = String::new();
    let mut admin_help_id = String::new();

    for c in RECOMMENDED_CHANNELS {
        if !c.welcome {
            continue;
        }

        let found = channels.lookup(c.name).await?;

        let Some(found) = found else {
            continue; // weird, the cache should know it
        };

        if c.name == "admin-help" {
            admin_help_id = found.id.clone();
        }

        let _ = writeln!(listing, "- <#{}> -> {}", found.id, c.desc);
    }

    let self_id = &ctx.self_user().id;

    let mut msg = String::new();
    let _ = writeln!(
        msg,
        "Welcome to the workspace! I'm <@{self_id}>, the community bot.\n"
    );
    let _ = writeln!(msg, "Here are some channels to get you started:\n{listing}");
    let _ = writeln!(
        msg,
        "You can ask me for all the commands I support by sending: <@{self_id}> help"
    );

    if !admin_help_id.is_empty() {
        let _ = writeln!(
            msg,
            "\nIf you need a moderator, <#{admin_help_id}> is the fastest way to reach one."
        );
    }

    Ok(msg)
}
