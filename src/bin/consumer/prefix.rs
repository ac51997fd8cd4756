//! Prefix-triggered handlers.

use switchboard::handler::{MessageActions, Responder as _};

/// Well-known comics people usually want by name.
fn xkcd_alias(name: &str) -> Option<u64> {
    match name {
        "standards" => Some(927),
        "compiling" => Some(303),
        "optimization" => Some(1691),
        _ => None,
    }
}

pub fn inject_message_response_prefixes(ma: &mut MessageActions) {
    ma.handle_prefix(
        "xkcd:",
        "helpfully give you the XKCD link you want",
        |ctx, m, r| {
            Box::pin(async move {
                let rest = m.text.split_once(':').map(|(_, rest)| rest).unwrap_or("");

                // the comic id runs until the first whitespace
                let id_str = rest
                    .split_whitespace()
                    .next()
                    .unwrap_or("");

                let comic_id = match xkcd_alias(id_str) {
                    Some(id) => id,
                    None => match id_str.parse::<u64>() {
                        Ok(id) => id,
                        Err(_) => {
                            return r
                                .respond_mentions(
                                    &ctx,
                                    "That was almost right. Proper format is `xkcd:1234`",
                                )
                                .await;
                        }
                    },
                };

                r.respond_mentions_unfurled(&ctx, &format!("https://xkcd.com/{comic_id}"))
                    .await
            })
        },
    );

    ma.handle_prefix(
        "docs/",
        "generate a docs.rs link for a crate",
        |ctx, m, r| {
            Box::pin(async move {
                let rest = m.text.strip_prefix("docs/").unwrap_or("");
                let krate = rest.split_whitespace().next().unwrap_or("");

                if krate.is_empty() {
                    return r
                        .respond_mentions(&ctx, "Which crate? Format is `docs/serde`")
                        .await;
                }

                r.respond_mentions_unfurled(&ctx, &format!("https://docs.rs/{krate}"))
                    .await
            })
        },
    );
}
