//! Welcome actions for specific channel joins.

use switchboard::handler::{ChannelJoinActions, Responder as _};

/// #introductions
const INTRODUCTIONS_CHANNEL_ID: &str = "C02INTRO1";

pub fn inject_channel_join_handlers(cja: &mut ChannelJoinActions) {
    cja.handle(
        "introductions welcome",
        INTRODUCTIONS_CHANNEL_ID,
        |ctx, joiner, r| {
            Box::pin(async move {
                tracing::debug!(
                    channel_id = %joiner.channel_id,
                    user_id = %joiner.user_id,
                    joined_time = %ctx.meta().time,
                    "welcoming user to introductions"
                );

                let msg = introductions_welcome(&ctx.self_user().id);
                r.respond_ephemeral(&ctx, &msg).await
            })
        },
    );
}

fn introductions_welcome(self_id: &str) -> String {
    format!(
        "welcome to <#{INTRODUCTIONS_CHANNEL_ID}>: the channel for saying hi to the community.\n\n\
         Please consider introducing yourself, maybe sharing where you're from, what you work on, \
         and what brought you here.\n\n\
         I am the community chat bot and have a few tricks up my sleeve. You can see all of them \
         by typing: <@{self_id}> help\n\n\
         We hope you enjoy it here! :wave:"
    )
}
