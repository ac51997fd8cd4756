//! Canned and functional exact-trigger responses.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::Rng;

use switchboard::handler::{Message, MessageActions, Responder as _};
use switchboard::mparser::{Mention, MentionKind};
use switchboard::queue::ChannelService as _;

/// A channel we point people at, with a short description.
pub struct RecommendedChannel {
    pub name: &'static str,
    pub desc: &'static str,
    pub welcome: bool,
}

/// Channels surfaced by `recommended channels` and the welcome message.
pub const RECOMMENDED_CHANNELS: &[RecommendedChannel] = &[
    RecommendedChannel {
        name: "general",
        desc: "for general questions or help",
        welcome: true,
    },
    RecommendedChannel {
        name: "introductions",
        desc: "to introduce yourself to the community",
        welcome: true,
    },
    RecommendedChannel {
        name: "help",
        desc: "when you are stuck and need a human",
        welcome: true,
    },
    RecommendedChannel {
        name: "jobs",
        desc: "for job postings and job hunting",
        welcome: true,
    },
    RecommendedChannel {
        name: "showandtell",
        desc: "for telling the world about the thing you are working on",
        welcome: false,
    },
    RecommendedChannel {
        name: "reviews",
        desc: "for code reviews",
        welcome: true,
    },
    RecommendedChannel {
        name: "admin-help",
        desc: "for engaging with the moderators of this workspace",
        welcome: true,
    },
];

/// Static content responses.
pub fn inject_message_responses(ma: &mut MessageActions) {
    ma.handle_static(
        "source code",
        "a link to my source code",
        &["source", "github"],
        &["My source code lives at <https://github.com/switchboard-bot/switchboard>."],
    );

    ma.handle_static(
        "coc",
        "a link to the code of conduct",
        &["code of conduct"],
        &[
            "Be kind to each other.",
            "The full code of conduct for this workspace: <https://example.com/code-of-conduct>",
        ],
    );
}

/// Responses that need to compute something.
pub fn inject_message_response_fns(ma: &mut MessageActions) {
    ma.handle(
        "flip a coin",
        "flips a coin, returning heads or tails",
        &["flip coin", "coin flip"],
        |ctx, _m, r| {
            Box::pin(async move {
                let msg = if rand::thread_rng().gen_range(0..2) == 0 {
                    "heads"
                } else {
                    "tails"
                };

                r.respond(&ctx, msg).await
            })
        },
    );

    ma.handle(
        "recommended channels",
        "channels we recommend folks join",
        &["channels"],
        |ctx, _m, r| {
            Box::pin(async move {
                let mut list = String::new();

                for channel in RECOMMENDED_CHANNELS {
                    let found = ctx
                        .channels()
                        .lookup(channel.name)
                        .await
                        .map_err(|e| format!("failed to look up channel: {e}"))?;

                    let Some(found) = found else {
                        continue; // weird, but not worth failing the reply
                    };

                    let mention = Mention {
                        kind: MentionKind::ChannelRef,
                        id: found.id,
                        label: None,
                    };

                    let _ = writeln!(list, "- {mention} -> {}", channel.desc);
                }

                r.respond_mentions_text_attachment(
                    &ctx,
                    "Here is a list of recommended channels",
                    &list,
                )
                .await
            })
        },
    );
}

/// A mention with nothing else in it deserves a nudge rather than
/// silence.
pub fn inject_bare_mention_nudge(ma: &mut MessageActions) {
    ma.handle_dynamic(
        |m: &Message| m.bot_mentioned && m.text.is_empty(),
        |ctx, _m, r| {
            Box::pin(async move {
                r.respond_to(&ctx, "Hi! Ask me for `help` to see what I can do.")
                    .await
            })
        },
    );
}

/// The `help` handler. Registered last so the snapshot of registered
/// handlers includes everything else.
pub fn inject_help(ma: &mut MessageActions) {
    let mut handlers = ma.registered();
    handlers.push(switchboard::handler::RegisteredHandler {
        trigger: "help".to_string(),
        prefix: false,
        description: "show the commands I support".to_string(),
        aliases: vec!["commands".to_string()],
    });
    handlers.sort_by(|a, b| {
        a.trigger
            .cmp(&b.trigger)
            .then_with(|| a.description.cmp(&b.description))
    });

    let mut listing = String::new();
    for h in &handlers {
        let _ = write!(listing, "- `{}`", h.trigger);

        if h.prefix {
            let _ = write!(listing, " (prefix)");
        }

        if !h.aliases.is_empty() {
            let quoted: Vec<String> =
                h.aliases.iter().map(|a| format!("`{a}`")).collect();
            let _ = write!(listing, " (aliases: {})", quoted.join(", "));
        }

        if !h.description.is_empty() {
            let _ = write!(listing, " -> {}", h.description);
        }

        listing.push('\n');
    }

    let listing = Arc::new(listing);

    ma.handle(
        "help",
        "show the commands I support",
        &["commands"],
        move |ctx, _m, r| {
            let listing = Arc::clone(&listing);
            Box::pin(async move {
                r.respond_mentions_text_attachment(
                    &ctx,
                    "Here is what I can do for you",
                    &listing,
                )
                .await
            })
        },
    );
}
