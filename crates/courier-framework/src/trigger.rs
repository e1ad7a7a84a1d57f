//! Canonical triggers produced by event sources.

use serde_json::{Map, Value};

use courier_core::Destination;

/// One canonical event derived from a source payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Canonical trigger name (`pr_opened`, `push`, ...).
    pub name: String,
    /// Who the trigger is addressed to.
    pub destination: Destination,
    /// Inbound identity of whoever caused the event, if known.
    pub actor: Option<String>,
    /// Flattened template context.
    pub context: Map<String, Value>,
}

impl Trigger {
    /// An anonymous trigger: every qualifying rule matches.
    pub fn anonymous(name: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            destination: Destination::Anonymous,
            actor: None,
            context,
        }
    }

    /// A trigger addressed to the given identities. Blank entries are dropped.
    pub fn addressed<I, S>(name: impl Into<String>, users: I, context: Map<String, Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users = users
            .into_iter()
            .map(Into::into)
            .filter(|u: &String| !u.trim().is_empty())
            .collect();
        Self {
            name: name.into(),
            destination: Destination::Users(users),
            actor: None,
            context,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        self.actor = (!actor.is_empty()).then_some(actor);
        self
    }
}
