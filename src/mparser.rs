//! Parser for mention tokens inside Slack message text.
//!
//! Slack encodes mentions as bracketed tokens: `<@U12345>` for users,
//! `<!subteam^S123>` for workspace groups, `<#C123|general>` for channel
//! references, and `<!here>` / `<!channel>` / `<!everyone>` for the
//! broadcast specials. This module identifies those tokens and supports
//! stripping them from the message, which makes command matching much
//! simpler for handlers.
//!
//! The parser is a hand-rolled state machine over the raw text. Garbage
//! input never fails: malformed or unterminated tokens are simply left in
//! place.

use std::fmt;

/// The kind of thing a mention refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    /// A user mention (`<@U…>` or `<@W…>`).
    User,

    /// A workspace group mention (`<!subteam^…>`).
    Group,

    /// An `@here` mention; the mention id is the channel's id.
    Here,

    /// An `@channel` mention; the mention id is the channel's id.
    Channel,

    /// An `@everyone` mention; the mention id is the channel's id.
    Everyone,

    /// A reference to another channel in the message, like "join #general".
    ChannelRef,
}

impl fmt::Display for MentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MentionKind::User => "user",
            MentionKind::Group => "group",
            MentionKind::Here => "here",
            MentionKind::Channel => "channel",
            MentionKind::Everyone => "everyone",
            MentionKind::ChannelRef => "channelref",
        };
        f.write_str(s)
    }
}

/// A single parsed mention.
///
/// For `User` and `Group` the id is the mentioned user or group. For
/// `Here`, `Channel`, and `Everyone` the id is the channel the message was
/// sent in. For `ChannelRef` the id is the referenced channel, and the
/// label (the part after `|`, if any) may carry its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub kind: MentionKind,
    pub id: String,
    pub label: Option<String>,
}

impl Mention {
    /// Builds a user mention for an id.
    pub fn user(id: impl Into<String>) -> Self {
        Mention {
            kind: MentionKind::User,
            id: id.into(),
            label: None,
        }
    }
}

impl fmt::Display for Mention {
    /// Renders the mention back into Slack token syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MentionKind::Here => f.write_str("<!here>"),
            MentionKind::Channel => f.write_str("<!channel>"),
            MentionKind::Everyone => f.write_str("<!everyone>"),
            MentionKind::User => write!(f, "<@{}>", self.id),
            MentionKind::ChannelRef => write!(f, "<#{}>", self.id),
            MentionKind::Group => write!(f, "<!subteam^{}>", self.id),
        }
    }
}

/// Joins mentions into a single string, appending `sep` after each one.
pub fn join(mentions: &[Mention], sep: &str) -> String {
    let mut buf = String::new();
    for m in mentions {
        buf.push_str(&m.to_string());
        buf.push_str(sep);
    }
    buf
}

/// Inclusive byte span `[start, end]` of a token in the raw input.
pub type Span = (usize, usize);

const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Scanning for `<`.
    Init,
    /// Just saw `<`, waiting for the branch selector.
    Open,
    /// Saw `<@`, waiting for a `U`/`W` id start.
    At,
    /// Inside `<!…>`: buffering a special name or `subteam`.
    Ex,
    /// Inside `<#…>`: buffering a channel id.
    Hash,
    /// Inside `<#id|…>`: buffering a channel label.
    Pipe,
    /// Inside `<@U…>`: buffering a user id.
    User,
    /// Inside `<!subteam^…>`: buffering a group id.
    Group,
}

/// Parses the mentions in a message, given the id of the channel the
/// message was sent in. Returns the mentions in input order along with the
/// inclusive byte span of each token, so callers can locate or remove them.
///
/// For `@here`, `@channel`, and `@everyone` the mention id is set to
/// `channel_id`.
pub fn parse(message: &str, channel_id: &str) -> (Vec<Mention>, Vec<Span>) {
    if !message.contains('<') {
        return (Vec::new(), Vec::new());
    }

    let mut mentions = Vec::new();
    let mut locations = Vec::new();

    let mut mode = Mode::Init;
    let mut start = 0usize;
    let mut buffer = String::new();
    let mut kept_id = String::new();

    for (i, c) in message.char_indices() {
        match c {
            '<' => {
                if mode == Mode::Init {
                    mode = Mode::Open;
                    start = i;
                    continue;
                }

                // not what we expected mid-token: drop it and start over
                buffer.clear();
                mode = Mode::Init;
            }

            '>' => {
                match mode {
                    Mode::Init => continue,

                    Mode::User => {
                        if buffer.len() >= 2 {
                            mentions.push(Mention {
                                kind: MentionKind::User,
                                id: std::mem::take(&mut buffer),
                                label: None,
                            });
                            locations.push((start, i));
                        }
                    }

                    Mode::Group => {
                        if !buffer.is_empty() {
                            mentions.push(Mention {
                                kind: MentionKind::Group,
                                id: std::mem::take(&mut buffer),
                                label: None,
                            });
                            locations.push((start, i));
                        }
                    }

                    Mode::Hash => {
                        if buffer.len() >= 2 {
                            mentions.push(Mention {
                                kind: MentionKind::ChannelRef,
                                id: std::mem::take(&mut buffer),
                                label: None,
                            });
                            locations.push((start, i));
                        }
                    }

                    Mode::Pipe => {
                        if kept_id.len() >= 2 {
                            mentions.push(Mention {
                                kind: MentionKind::ChannelRef,
                                id: std::mem::take(&mut kept_id),
                                label: Some(std::mem::take(&mut buffer)),
                            });
                            locations.push((start, i));
                        }
                    }

                    Mode::Ex => {
                        let kind = match buffer.as_str() {
                            "here" => Some(MentionKind::Here),
                            "channel" => Some(MentionKind::Channel),
                            "everyone" => Some(MentionKind::Everyone),
                            _ => None,
                        };
                        if let Some(kind) = kind {
                            mentions.push(Mention {
                                kind,
                                id: channel_id.to_string(),
                                label: None,
                            });
                            locations.push((start, i));
                        }
                    }

                    Mode::Open | Mode::At => {}
                }

                kept_id.clear();
                buffer.clear();
                mode = Mode::Init;
            }

            '@' => {
                if mode == Mode::Open {
                    mode = Mode::At;
                    continue;
                }

                if mode != Mode::Init {
                    buffer.clear();
                    mode = Mode::Init;
                }
            }

            '!' => {
                if mode == Mode::Open {
                    mode = Mode::Ex;
                    continue;
                }

                if mode != Mode::Init {
                    buffer.clear();
                    mode = Mode::Init;
                }
            }

            '#' => {
                if mode == Mode::Open {
                    mode = Mode::Hash;
                }
            }

            'U' | 'W' => {
                // user ids must start with U or W; elsewhere they're just
                // ordinary id characters
                match mode {
                    Mode::At => mode = Mode::User,
                    Mode::User | Mode::Group | Mode::Ex | Mode::Hash | Mode::Pipe => {}
                    _ => continue,
                }

                if buffer.len() >= MAX_ID_LEN {
                    // FAILSAFE: buffer shouldn't be this long
                    buffer.clear();
                    mode = Mode::Init;
                    continue;
                }

                buffer.push(c);
            }

            '^' => {
                if mode == Mode::Ex {
                    if buffer == "subteam" {
                        mode = Mode::Group;
                        buffer.clear();
                        continue;
                    }

                    buffer.clear();
                    mode = Mode::Init;
                    continue;
                }

                if mode != Mode::Init {
                    buffer.clear();
                    mode = Mode::Init;
                }
            }

            '|' => {
                if mode == Mode::Hash {
                    // a channel id should have at least two characters;
                    // anything shorter is garbage, so re-init
                    if buffer.len() < 2 {
                        buffer.clear();
                        mode = Mode::Init;
                        continue;
                    }

                    kept_id = std::mem::take(&mut buffer);
                    mode = Mode::Pipe;
                    continue;
                }

                if mode != Mode::Init {
                    buffer.clear();
                    mode = Mode::Init;
                }
            }

            _ => {
                match mode {
                    Mode::Init => continue,

                    // `<x` or `<@x` with a non-id start: not a token
                    Mode::Open | Mode::At => {
                        buffer.clear();
                        mode = Mode::Init;
                    }

                    Mode::Ex | Mode::User | Mode::Group | Mode::Hash | Mode::Pipe => {
                        if buffer.len() >= MAX_ID_LEN {
                            // FAILSAFE: buffer shouldn't be this long
                            buffer.clear();
                            mode = Mode::Init;
                            continue;
                        }

                        buffer.push(c);
                    }
                }
            }
        }
    }

    (mentions, locations)
}

/// Calls [`parse`] and removes every matched token from the message,
/// returning the remaining text and the mentions. No whitespace coalescing
/// is done around the removed tokens.
pub fn parse_and_splice(message: &str, channel_id: &str) -> (String, Vec<Mention>) {
    let (mentions, locations) = parse(message, channel_id);
    if mentions.is_empty() {
        return (message.to_string(), mentions);
    }

    let bytes = message.as_bytes();
    let mut out = String::with_capacity(message.len());
    let mut from = 0usize;

    for (start, end) in locations {
        out.push_str(std::str::from_utf8(&bytes[from..start]).unwrap_or(""));
        from = end + 1;
    }

    out.push_str(std::str::from_utf8(&bytes[from..]).unwrap_or(""));

    (out, mentions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mention(kind: MentionKind, id: &str) -> Mention {
        Mention {
            kind,
            id: id.to_string(),
            label: None,
        }
    }

    // ─── parse ───

    #[test]
    fn parse_no_brackets_is_empty() {
        let (mentions, spans) = parse("hello there", "CCHAN");
        assert!(mentions.is_empty());
        assert!(spans.is_empty());
    }

    #[test]
    fn parse_user_mention() {
        let (mentions, spans) = parse("hey <@UA1234> hi", "CCHAN");
        assert_eq!(mentions, vec![mention(MentionKind::User, "UA1234")]);
        assert_eq!(spans, vec![(4, 12)]);
    }

    #[test]
    fn parse_w_user_mention() {
        let (mentions, _) = parse("<@WZ7890>", "CCHAN");
        assert_eq!(mentions, vec![mention(MentionKind::User, "WZ7890")]);
    }

    #[test]
    fn parse_rejects_user_id_not_starting_with_u_or_w() {
        let (mentions, _) = parse("<@XA1234>", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_rejects_one_char_user_id() {
        let (mentions, _) = parse("<@U>", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_group_mention() {
        let (mentions, _) = parse("ping <!subteam^SABC123>", "CCHAN");
        assert_eq!(mentions, vec![mention(MentionKind::Group, "SABC123")]);
    }

    #[test]
    fn parse_rejects_empty_group_id() {
        let (mentions, _) = parse("<!subteam^>", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_specials_substitute_channel_id() {
        let (mentions, _) = parse("<!here> <!channel> <!everyone>", "CCHAN");
        assert_eq!(
            mentions,
            vec![
                mention(MentionKind::Here, "CCHAN"),
                mention(MentionKind::Channel, "CCHAN"),
                mention(MentionKind::Everyone, "CCHAN"),
            ]
        );
    }

    #[test]
    fn parse_unknown_special_ignored() {
        let (mentions, _) = parse("<!broadcast>", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_channel_ref() {
        let (mentions, _) = parse("join <#CGEN123>", "CCHAN");
        assert_eq!(mentions, vec![mention(MentionKind::ChannelRef, "CGEN123")]);
    }

    #[test]
    fn parse_channel_ref_with_label() {
        let (mentions, _) = parse("join <#CGEN123|general>", "CCHAN");
        assert_eq!(
            mentions,
            vec![Mention {
                kind: MentionKind::ChannelRef,
                id: "CGEN123".to_string(),
                label: Some("general".to_string()),
            }]
        );
    }

    #[test]
    fn parse_other_angle_tokens_ignored() {
        // links and bare comparisons are left alone
        let (mentions, _) = parse("see <https://example.com|docs> for 1 < 2", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_unterminated_token_ignored() {
        let (mentions, _) = parse("hey <@UA1234", "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_overlong_id_dropped() {
        let input = format!("<@U{}>", "A".repeat(100));
        let (mentions, _) = parse(&input, "CCHAN");
        assert!(mentions.is_empty());
    }

    #[test]
    fn parse_multiple_mentions_in_order() {
        let (mentions, spans) =
            parse("<@UAAA11> then <!subteam^S22> then <#CBBB33>", "CCHAN");
        assert_eq!(
            mentions,
            vec![
                mention(MentionKind::User, "UAAA11"),
                mention(MentionKind::Group, "S22"),
                mention(MentionKind::ChannelRef, "CBBB33"),
            ]
        );

        // spans are non-overlapping and strictly increasing
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].0);
        }
    }

    // ─── parse_and_splice ───

    #[test]
    fn splice_removes_tokens() {
        let (text, mentions) = parse_and_splice("hey <@UA1234> hi", "CCHAN");
        assert_eq!(text, "hey  hi");
        assert_eq!(mentions.len(), 1);
    }

    #[test]
    fn splice_mixed_mention_kinds() {
        let (text, mentions) = parse_and_splice(
            "Hey <@UA1234>, <@WZ7890> <!subteam^ABC1234> <!everyone> <#CTST123|general>",
            "TESTCHAN",
        );

        assert_eq!(text, "Hey ,    ");
        assert_eq!(
            mentions,
            vec![
                mention(MentionKind::User, "UA1234"),
                mention(MentionKind::User, "WZ7890"),
                mention(MentionKind::Group, "ABC1234"),
                mention(MentionKind::Everyone, "TESTCHAN"),
                Mention {
                    kind: MentionKind::ChannelRef,
                    id: "CTST123".to_string(),
                    label: Some("general".to_string()),
                },
            ]
        );
    }

    #[test]
    fn splice_without_mentions_returns_input() {
        let (text, mentions) = parse_and_splice("plain text, no tokens", "CCHAN");
        assert_eq!(text, "plain text, no tokens");
        assert!(mentions.is_empty());
    }

    #[test]
    fn splice_keeps_unterminated_tokens() {
        let (text, mentions) = parse_and_splice("dangling <@UA12", "CCHAN");
        assert_eq!(text, "dangling <@UA12");
        assert!(mentions.is_empty());
    }

    // ─── rendering ───

    #[test]
    fn mention_display_roundtrips_token_syntax() {
        assert_eq!(mention(MentionKind::User, "U123").to_string(), "<@U123>");
        assert_eq!(
            mention(MentionKind::Group, "S123").to_string(),
            "<!subteam^S123>"
        );
        assert_eq!(
            mention(MentionKind::ChannelRef, "C123").to_string(),
            "<#C123>"
        );
        assert_eq!(mention(MentionKind::Here, "C1").to_string(), "<!here>");
        assert_eq!(
            mention(MentionKind::Everyone, "C1").to_string(),
            "<!everyone>"
        );
    }

    #[test]
    fn join_appends_separator_after_each() {
        let ms = vec![mention(MentionKind::User, "U111A"), mention(MentionKind::User, "U222B")];
        assert_eq!(join(&ms, " "), "<@U111A> <@U222B> ");
        assert_eq!(join(&[], " "), "");
    }

    // ─── properties ───

    /// A message fragment: either plain text or a well-formed token.
    fn arb_fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9 ,.]{0,12}",
            "[UW][A-Z0-9]{1,8}".prop_map(|id| format!("<@{id}>")),
            "[A-Z0-9]{1,8}".prop_map(|id| format!("<!subteam^{id}>")),
            "C[A-Z0-9]{1,8}".prop_map(|id| format!("<#{id}>")),
            ("C[A-Z0-9]{1,8}", "[a-z-]{1,8}")
                .prop_map(|(id, label)| format!("<#{id}|{label}>")),
            Just("<!here>".to_string()),
            Just("<!channel>".to_string()),
            Just("<!everyone>".to_string()),
        ]
    }

    proptest! {
        /// Once tokens are spliced out, re-splicing is a no-op.
        #[test]
        fn prop_splice_idempotent(
            fragments in prop::collection::vec(arb_fragment(), 0..8),
            channel in "[A-Z0-9]{1,10}",
        ) {
            let message = fragments.concat();
            let (cleaned, _) = parse_and_splice(&message, &channel);
            let (cleaned_again, mentions) = parse_and_splice(&cleaned, &channel);
            prop_assert_eq!(&cleaned, &cleaned_again);
            prop_assert!(mentions.is_empty());
        }

        /// Input without `<` passes through untouched with no mentions.
        #[test]
        fn prop_bracket_free_passthrough(message in "[^<]*", channel in "[A-Z0-9]{1,10}") {
            let (cleaned, mentions) = parse_and_splice(&message, &channel);
            prop_assert_eq!(cleaned, message);
            prop_assert!(mentions.is_empty());
        }

        /// Spans are in-bounds, non-overlapping, and strictly increasing,
        /// and parsing never panics on arbitrary input.
        #[test]
        fn prop_spans_ordered(message in "\\PC*", channel in "[A-Z0-9]{1,10}") {
            let (mentions, spans) = parse(&message, &channel);
            prop_assert_eq!(mentions.len(), spans.len());

            for (start, end) in &spans {
                prop_assert!(start < end);
                prop_assert!(*end < message.len());
            }

            for pair in spans.windows(2) {
                prop_assert!(pair[0].1 < pair[1].0);
            }
        }
    }
}
