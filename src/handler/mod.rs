//! Handler registry and dispatch for incoming Slack events.
//!
//! Message handlers are registered against triggers in four tables that
//! differ only in how they match: `exact` (full cleaned text, mention
//! required outside DMs), `prefix`, `contains`, and `dynamic` (arbitrary
//! predicate). Team joins and channel joins have their own, simpler
//! registries in the sibling modules.

pub mod channel_join;
pub mod responder;
pub mod team_join;

pub use channel_join::ChannelJoinActions;
pub use responder::{Responder, SlackResponder};
pub use team_join::TeamJoinActions;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::mparser::{self, Mention, MentionKind};
use crate::queue::{BoxError, HandlerContext, HandlerOutcome};
use crate::slack::{File, MessageEvent};

/// Where a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelType {
    /// The channel type wasn't provided or isn't recognized.
    #[default]
    Unknown,

    /// A public channel.
    Public,

    /// A private channel (a "group" in the Slack API).
    Private,

    /// A direct message (an "im").
    Dm,

    /// A group direct message (an "mpim").
    GroupDm,

    /// The bot's app home.
    AppHome,
}

impl ChannelType {
    /// Maps the Slack `channel_type` field.
    pub fn from_slack(s: &str) -> Self {
        match s {
            "channel" => ChannelType::Public,
            "group" => ChannelType::Private,
            "im" => ChannelType::Dm,
            "mpim" => ChannelType::GroupDm,
            "app_home" => ChannelType::AppHome,
            _ => ChannelType::Unknown,
        }
    }

    /// Whether the conversation is direct (DM, group DM, or app home).
    pub fn is_dm(&self) -> bool {
        matches!(
            self,
            ChannelType::Dm | ChannelType::GroupDm | ChannelType::AppHome
        )
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelType::Public => "public",
            ChannelType::Private => "private",
            ChannelType::Dm => "dm",
            ChannelType::GroupDm => "group_dm",
            ChannelType::AppHome => "app_home",
            ChannelType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A message in its processed form.
///
/// `text` is the raw text with mention tokens spliced out and outer
/// whitespace trimmed; `all_mentions` keeps input order; `user_mentions`
/// keeps only user mentions excluding the bot itself.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub user_id: String,
    pub thread_ts: String,
    pub message_ts: String,
    pub subtype: String,
    pub raw_text: String,
    pub text: String,
    pub all_mentions: Vec<Mention>,
    pub user_mentions: Vec<Mention>,
    pub bot_mentioned: bool,
    pub files: Vec<File>,
}

impl Message {
    /// Builds the unprocessed form from an incoming event's fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: impl Into<String>,
        channel_type: &str,
        user_id: impl Into<String>,
        thread_ts: impl Into<String>,
        message_ts: impl Into<String>,
        subtype: impl Into<String>,
        raw_text: impl Into<String>,
        files: Vec<File>,
    ) -> Self {
        Message {
            channel_id: channel_id.into(),
            channel_type: ChannelType::from_slack(channel_type),
            user_id: user_id.into(),
            thread_ts: thread_ts.into(),
            message_ts: message_ts.into(),
            subtype: subtype.into(),
            raw_text: raw_text.into(),
            ..Message::default()
        }
    }

    /// Parses mentions, cleans the text, and computes the user-mention
    /// views relative to the bot's own id.
    fn process(&mut self, self_id: &str) {
        let (text, mentions) = mparser::parse_and_splice(&self.raw_text, &self.channel_id);
        self.text = text.trim().to_string();
        self.all_mentions = mentions;

        let (user_mentions, bot_mentioned) =
            only_other_user_mentions(self_id, &self.all_mentions);
        self.user_mentions = user_mentions;
        self.bot_mentioned = bot_mentioned;
    }
}

/// Filters mentions down to user mentions of someone other than the bot,
/// and reports whether the bot itself was mentioned.
pub fn only_other_user_mentions(self_id: &str, mentions: &[Mention]) -> (Vec<Mention>, bool) {
    let mut bot_mentioned = false;
    let mut filtered = Vec::new();

    for m in mentions {
        if m.kind != MentionKind::User {
            continue;
        }

        if m.id == self_id {
            bot_mentioned = true;
            continue;
        }

        filtered.push(m.clone());
    }

    (filtered, bot_mentioned)
}

/// The future returned by a handler action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// An action to run when a trigger matches.
pub type MessageActionFn =
    Arc<dyn Fn(HandlerContext, Message, Arc<dyn Responder>) -> ActionFuture + Send + Sync>;

/// A caller-supplied match predicate for dynamic handlers.
pub type MessageMatchFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

struct ReactiveAction {
    description: String,
    only_when_mentioned: bool,
    aliases: Vec<String>,
    action: MessageActionFn,
    match_fn: Option<MessageMatchFn>,
}

/// A matched handler, ready to run against a specific message.
#[derive(Clone)]
pub struct MatchedAction {
    /// The trigger that matched (empty for dynamic handlers).
    pub trigger: String,

    /// The registered description.
    pub description: String,

    action: MessageActionFn,
}

impl MatchedAction {
    /// Runs the action.
    pub async fn run(
        &self,
        ctx: HandlerContext,
        message: Message,
        responder: Arc<dyn Responder>,
    ) -> Result<(), BoxError> {
        (self.action)(ctx, message, responder).await
    }
}

/// A registered handler, as reported by [`MessageActions::registered`].
/// Useful for building help output.
#[derive(Debug, Clone)]
pub struct RegisteredHandler {
    pub trigger: String,
    pub prefix: bool,
    pub description: String,
    pub aliases: Vec<String>,
}

/// Errors from registry construction.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("self id must be set")]
    EmptySelfId,
}

/// The message handler registry.
///
/// Built once during startup and read-only afterwards. Registration
/// methods panic on duplicate triggers: a duplicate is a programming
/// error in the wiring, caught on the first boot.
pub struct MessageActions {
    responses: HashMap<String, ReactiveAction>,
    prefix_responses: HashMap<String, ReactiveAction>,
    reactions: HashMap<String, ReactiveAction>,
    dynamic: Vec<ReactiveAction>,

    aliases: HashMap<String, String>,

    self_id: String,
    shadow_mode: bool,
}

impl MessageActions {
    /// Creates an empty registry for the bot user `self_id`.
    pub fn new(self_id: impl Into<String>, shadow_mode: bool) -> Result<Self, RegistryError> {
        let self_id = self_id.into();
        if self_id.is_empty() {
            return Err(RegistryError::EmptySelfId);
        }

        Ok(MessageActions {
            responses: HashMap::new(),
            prefix_responses: HashMap::new(),
            reactions: HashMap::new(),
            dynamic: Vec::new(),
            aliases: HashMap::new(),
            self_id,
            shadow_mode,
        })
    }

    /// Lists registered exact and prefix handlers.
    pub fn registered(&self) -> Vec<RegisteredHandler> {
        let mut out = Vec::with_capacity(self.responses.len() + self.prefix_responses.len());

        for (trigger, action) in &self.responses {
            out.push(RegisteredHandler {
                trigger: trigger.clone(),
                prefix: false,
                description: action.description.clone(),
                aliases: action.aliases.clone(),
            });
        }

        for (trigger, action) in &self.prefix_responses {
            out.push(RegisteredHandler {
                trigger: trigger.clone(),
                prefix: true,
                description: action.description.clone(),
                aliases: Vec::new(),
            });
        }

        out
    }

    // ─── Registration ───

    /// Registers an exact-trigger handler with a custom action. The bot
    /// must be mentioned (or the message be a DM) for exact triggers to
    /// match. Aliases are alternative spellings of the trigger; an alias
    /// that already exists is skipped with a warning.
    pub fn handle<F>(&mut self, trigger: &str, description: &str, aliases: &[&str], action: F)
    where
        F: Fn(HandlerContext, Message, Arc<dyn Responder>) -> ActionFuture
            + Send
            + Sync
            + 'static,
    {
        assert!(!trigger.is_empty(), "trigger cannot be empty");
        assert!(
            !self.responses.contains_key(trigger),
            "trigger {trigger:?} already exists"
        );

        let mut kept = Vec::new();
        for alias in aliases {
            if self.aliases.contains_key(*alias) {
                warn!(trigger, alias = *alias, "trigger alias already exists, skipping");
                continue;
            }

            self.aliases.insert(alias.to_string(), trigger.to_string());
            kept.push(alias.to_string());
        }

        self.responses.insert(
            trigger.to_string(),
            ReactiveAction {
                description: description.to_string(),
                only_when_mentioned: false,
                aliases: kept,
                action: Arc::new(action),
                match_fn: None,
            },
        );
    }

    /// Registers an exact-trigger handler that responds with fixed
    /// content, mentioning back anyone the original message mentioned.
    pub fn handle_static(
        &mut self,
        trigger: &str,
        description: &str,
        aliases: &[&str],
        content: &[&str],
    ) {
        let msg = content.join("\n");

        self.handle(trigger, description, aliases, move |ctx, _m, r| {
            let msg = msg.clone();
            Box::pin(async move { r.respond_mentions(&ctx, &msg).await })
        });
    }

    /// Registers a prefix handler. Prefix handlers match regardless of
    /// mentions.
    pub fn handle_prefix<F>(&mut self, prefix: &str, description: &str, action: F)
    where
        F: Fn(HandlerContext, Message, Arc<dyn Responder>) -> ActionFuture
            + Send
            + Sync
            + 'static,
    {
        assert!(!prefix.is_empty(), "prefix cannot be empty");
        assert!(
            !self.prefix_responses.contains_key(prefix),
            "prefix {prefix:?} already exists"
        );

        self.prefix_responses.insert(
            prefix.to_string(),
            ReactiveAction {
                description: description.to_string(),
                only_when_mentioned: false,
                aliases: Vec::new(),
                action: Arc::new(action),
                match_fn: None,
            },
        );
    }

    /// Registers a contains handler that responds with fixed content
    /// whenever the trigger appears anywhere in the message.
    pub fn handle_static_contains(&mut self, contains: &str, content: &[&str]) {
        assert!(!contains.is_empty(), "contains cannot be empty");
        assert!(!content.is_empty(), "content cannot be empty");

        let msg = content.join("\n");

        self.insert_reaction(
            contains,
            false,
            Arc::new(move |ctx, _m, r| {
                let msg = msg.clone();
                Box::pin(async move { r.respond(&ctx, &msg).await })
            }),
        );
    }

    /// Registers emoji reactions for messages containing the trigger.
    pub fn handle_reaction(&mut self, trigger: &str, reactions: &[&str]) {
        assert!(!trigger.is_empty(), "trigger cannot be empty");
        assert!(!reactions.is_empty(), "reactions cannot be empty");

        self.insert_reaction(trigger, false, reaction_action(false, reactions));
    }

    /// Like [`MessageActions::handle_reaction`], but only when the bot is
    /// mentioned.
    pub fn handle_mentioned_reaction(&mut self, trigger: &str, reactions: &[&str]) {
        assert!(!trigger.is_empty(), "trigger cannot be empty");
        assert!(!reactions.is_empty(), "reactions cannot be empty");

        self.insert_reaction(trigger, true, reaction_action(false, reactions));
    }

    /// Like [`MessageActions::handle_reaction`], but only firing on a
    /// roughly 1-in-150 dice roll.
    pub fn handle_reaction_rand(&mut self, trigger: &str, reactions: &[&str]) {
        assert!(!trigger.is_empty(), "trigger cannot be empty");
        assert!(!reactions.is_empty(), "reactions cannot be empty");

        self.insert_reaction(trigger, false, reaction_action(true, reactions));
    }

    fn insert_reaction(&mut self, trigger: &str, only_when_mentioned: bool, action: MessageActionFn) {
        assert!(
            !self.reactions.contains_key(trigger),
            "trigger {trigger:?} already exists"
        );

        self.reactions.insert(
            trigger.to_string(),
            ReactiveAction {
                description: String::new(),
                only_when_mentioned,
                aliases: Vec::new(),
                action,
                match_fn: None,
            },
        );
    }

    /// Registers a dynamic handler with a caller-supplied predicate.
    /// Dynamic handlers are consulted for every message, in registration
    /// order.
    pub fn handle_dynamic<M, F>(&mut self, match_fn: M, action: F)
    where
        M: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(HandlerContext, Message, Arc<dyn Responder>) -> ActionFuture
            + Send
            + Sync
            + 'static,
    {
        self.dynamic.push(ReactiveAction {
            description: String::new(),
            only_when_mentioned: false,
            aliases: Vec::new(),
            action: Arc::new(action),
            match_fn: Some(Arc::new(match_fn)),
        });
    }

    // ─── Matching ───

    /// Processes a message (mention parse + trim) and collects the actions
    /// whose triggers match it. All matches fire; there is no ordering
    /// guarantee across tables.
    pub fn match_message(&self, mut message: Message) -> (Message, Vec<MatchedAction>) {
        message.process(&self.self_id);

        let mut t = message.text.clone();
        let mut lt = t.to_lowercase();

        // if this is an alias, do the swap
        if let Some(canonical) = self.aliases.get(&lt) {
            t = canonical.clone();
            lt = canonical.clone();
        }

        let mut matched = Vec::new();
        let dm = message.channel_type.is_dm();

        if dm || !self.shadow_mode {
            for (trigger, action) in &self.reactions {
                if lt.contains(trigger.as_str())
                    && (!action.only_when_mentioned || message.bot_mentioned)
                {
                    matched.push(MatchedAction {
                        trigger: trigger.clone(),
                        description: action.description.clone(),
                        action: Arc::clone(&action.action),
                    });
                }
            }

            for (prefix, action) in &self.prefix_responses {
                if lt.starts_with(prefix.as_str()) {
                    matched.push(MatchedAction {
                        trigger: prefix.clone(),
                        description: action.description.clone(),
                        action: Arc::clone(&action.action),
                    });
                }
            }
        }

        if dm || message.bot_mentioned {
            for (trigger, action) in &self.responses {
                if trigger.eq_ignore_ascii_case(&t) {
                    matched.push(MatchedAction {
                        trigger: trigger.clone(),
                        description: action.description.clone(),
                        action: Arc::clone(&action.action),
                    });
                }
            }
        }

        for action in &self.dynamic {
            if let Some(match_fn) = &action.match_fn {
                if match_fn(&message) {
                    matched.push(MatchedAction {
                        trigger: String::new(),
                        description: action.description.clone(),
                        action: Arc::clone(&action.action),
                    });
                }
            }
        }

        (message, matched)
    }
}

/// Builds a reaction action. When `random` is set, the action only fires
/// on a 1-in-150 roll.
fn reaction_action(random: bool, reactions: &[&str]) -> MessageActionFn {
    let reactions: Vec<String> = reactions.iter().map(|r| r.to_string()).collect();

    Arc::new(move |ctx, _m, r| {
        let reactions = reactions.clone();
        Box::pin(async move {
            if random && rand::thread_rng().gen_range(0..150) != 0x2A {
                // not this time, maybe next time!
                return Ok(());
            }

            for reaction in &reactions {
                r.react(&ctx, reaction)
                    .await
                    .map_err(|e| format!("failed to react with {reaction}: {e}"))?;
            }

            Ok(())
        })
    })
}

/// Maximum age of a message before it's dropped instead of handled.
const MAX_MESSAGE_AGE_SECS: i64 = 30;

/// Checks whether a message event should be dropped before dispatch.
fn should_discard(event: &MessageEvent, now: i64) -> Option<&'static str> {
    if !event.subtype.is_empty() {
        return Some("message has subtype");
    }

    // message timestamps look like "1700000000.000100"
    let epoch: i64 = match event.ts.split('.').next().unwrap_or("").parse() {
        Ok(e) => e,
        Err(_) => return Some("timestamp malformed"),
    };

    if now - epoch > MAX_MESSAGE_AGE_SECS {
        return Some("message older than 30 seconds");
    }

    None
}

#[async_trait]
impl crate::queue::MessageHandler for MessageActions {
    async fn handle(&self, ctx: HandlerContext, event: MessageEvent) -> HandlerOutcome {
        if event.user == ctx.self_user().id {
            debug!("ignoring message from self");
            return HandlerOutcome::Success;
        }

        if let Some(reason) = should_discard(&event, chrono::Utc::now().timestamp()) {
            return HandlerOutcome::discard(reason);
        }

        let message = Message::new(
            &event.channel,
            &event.channel_type,
            &event.user,
            &event.thread_ts,
            &event.ts,
            &event.subtype,
            &event.text,
            event.files.clone(),
        );

        let (message, actions) = self.match_message(message);

        for action in &actions {
            debug!(action = %action.trigger, "taking action");

            let responder: Arc<dyn Responder> =
                Arc::new(SlackResponder::new(message.clone()));

            if let Err(e) = action
                .run(ctx.clone(), message.clone(), responder)
                .await
            {
                error!(
                    error = %e,
                    action = %action.trigger,
                    action_description = %action.description,
                    "failed to take action"
                );
            }
        }

        debug!(
            text = %event.text,
            actions = actions.len(),
            "message handled"
        );

        // messages are never redelivered
        HandlerOutcome::Success
    }
}
