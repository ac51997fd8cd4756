//! Emoji reactions and contains-triggered responses.

use switchboard::handler::MessageActions;

pub fn inject_message_reactions(ma: &mut MessageActions) {
    ma.handle_reaction("ship it", &["shipit", "rocket"]);
    ma.handle_reaction("bbq", &["fire"]);
    ma.handle_reaction("friday", &["tada"]);

    ma.handle_mentioned_reaction("thank", &["heart"]);
    ma.handle_mentioned_reaction("hello", &["wave"]);
    ma.handle_mentioned_reaction("cheers", &["clinking_glasses"]);

    ma.handle_reaction_rand("vim", &["emacs"]);
    ma.handle_reaction_rand("emacs", &["vim"]);

    // someone flipped a table; put it back
    ma.handle_static_contains("︵", &["┬─┬ノ( º _ ºノ)"]);
    ma.handle_static_contains("彡", &["┬─┬ノ( º _ ºノ)"]);
}
