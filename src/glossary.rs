//! A glossary of terms the bot can define on request.
//!
//! Wired up as a `define ` prefix handler. The term table is authored in
//! code, so duplicate terms or aliases are construction-time panics
//! rather than runtime surprises.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::{ActionFuture, Message, Responder};
use crate::queue::HandlerContext;

/// The prefix the define handler is registered under.
pub const PREFIX: &str = "define ";

/// The glossary term table.
pub struct Terms {
    entries: HashMap<String, Vec<String>>,
    aliases: HashMap<String, String>,
    prefix: String,
}

impl Terms {
    /// Builds the glossary with the built-in term table.
    pub fn new(prefix: &str) -> Self {
        let mut terms = Terms {
            entries: HashMap::new(),
            aliases: HashMap::new(),
            prefix: prefix.to_string(),
        };

        builtin_terms(&mut terms);
        terms
    }

    /// Adds a term with aliases. Panics on duplicates; the table is
    /// authored in code and a collision is a bug.
    fn define(&mut self, term: &str, aliases: &[&str], content: &[&str]) {
        if self.entries.contains_key(term) {
            panic!("term {term} already defined");
        }

        for alias in aliases {
            if let Some(existing) = self.aliases.get(*alias) {
                panic!("alias {alias} already exists to {existing}");
            }

            self.aliases.insert(alias.to_string(), term.to_string());
        }

        self.entries.insert(
            term.to_string(),
            content.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Resolves a term (through aliases) to its definition lines.
    fn resolve(&self, term: &str) -> (String, Option<&Vec<String>>) {
        let lower = term.to_lowercase();
        let canonical = self.aliases.get(&lower).cloned().unwrap_or(lower);
        let entry = self.entries.get(&canonical);
        (canonical, entry)
    }

    /// Builds the reply for a `define <term>` request.
    fn answer(&self, text: &str) -> Reply {
        let term = text.get(self.prefix.len()..).unwrap_or_default().trim();
        if term.is_empty() {
            return Reply::NoTerm;
        }

        let lower = term.to_lowercase();
        let (canonical, entry) = self.resolve(term);

        let entry = match entry {
            Some(e) => e,
            None => return Reply::Unknown,
        };

        let definition = entry.join("\n");

        if canonical != lower {
            // an alias was used
            Reply::Definition(format!("`{canonical}`, or `{lower}`, is {definition}"))
        } else {
            Reply::Definition(format!("`{canonical}` is {definition}"))
        }
    }

    /// The action for the `define ` prefix registration.
    pub fn define_handler(
        self: &Arc<Self>,
    ) -> impl Fn(HandlerContext, Message, Arc<dyn Responder>) -> ActionFuture + Send + Sync + 'static
    {
        let terms = Arc::clone(self);

        move |ctx, m, r| {
            let terms = Arc::clone(&terms);
            Box::pin(async move {
                if !m.bot_mentioned {
                    return Ok(());
                }

                match terms.answer(&m.text) {
                    Reply::Definition(reply) => r.respond_mentions(&ctx, &reply).await,
                    Reply::Unknown => {
                        r.respond_to(&ctx, "I'm sorry, I don't have a definition for that.")
                            .await
                    }
                    Reply::NoTerm => {
                        r.respond_to(&ctx, "You need to specify a term to define")
                            .await
                    }
                }
            })
        }
    }
}

/// Outcome of a definition request.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Definition(String),
    Unknown,
    NoTerm,
}

/// The built-in term table.
///
/// The bot responds with: `<TERM>`, or `<ALIAS>`, is <DEFINITION>. When
/// adding items, keep them ordered alphabetically by term.
fn builtin_terms(t: &mut Terms) {
    t.define(
        "dependency injection",
        &["di"],
        &[
            "a technique in which a type or function receives the things it depends on, such as a database handle or logger, instead of constructing them itself",
        ],
    );

    t.define(
        "domain-driven design",
        &["ddd", "domain driven design"],
        &[
            "a concept around structuring your source code around business domain(s).",
            "See <https://en.wikipedia.org/wiki/Domain-driven_design> for more info.",
        ],
    );

    t.define(
        "idempotent",
        &[],
        &[
            "an operation that can be applied multiple times without changing the result beyond the initial application. Handy when retrying work that may have partially completed.",
        ],
    );

    t.define(
        "visibility timeout",
        &[],
        &[
            "the period after which an unacknowledged queue message becomes eligible for another worker to pick up.",
        ],
    );
}
