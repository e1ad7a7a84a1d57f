//! Inbound event sources.
//!
//! Each source turns one webhook payload into zero or more canonical
//! [`Trigger`]s. Sources are pure: authentication, logging and rule
//! matching happen in [`IncomingProcessor`](crate::IncomingProcessor).
//!
//! | Source | Event type from | Triggers |
//! |--------|-----------------|----------|
//! | [`GithubSource`] | `X-GitHub-Event`, else payload shape | `pr_*`, `issue_*`, `push` |
//! | [`GitlabSource`] | `object_kind` | `mr_*`, `pipeline_*`, `push`, `tag_push` |
//! | [`DockerhubSource`] | `push_data` | `push` |
//! | [`GenericSource`] | `event` field | the field's value |

mod dockerhub;
mod generic;
mod github;
mod gitlab;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

pub use dockerhub::DockerhubSource;
pub use generic::GenericSource;
pub use github::GithubSource;
pub use gitlab::GitlabSource;

use crate::trigger::Trigger;

/// A payload shape the source does not map to any trigger.
///
/// This is a normal outcome reported back to the sender, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported event: {0}")]
pub struct UnsupportedEvent(pub String);

impl UnsupportedEvent {
    /// `<kind>.<action>` for a known event type with an unmapped action.
    pub fn action(kind: &str, action: &str) -> Self {
        Self(format!("{kind}.{action}"))
    }
}

/// Result of classifying a payload.
pub type Classification = Result<Vec<Trigger>, UnsupportedEvent>;

/// One inbound webhook source.
pub trait EventSource: Send + Sync {
    /// Service type string this source serves (e.g. `"github"`).
    fn kind(&self) -> &'static str;

    /// Maps a payload to triggers. `hint` is the event-type header, if the
    /// sender supplied one.
    fn classify(&self, payload: &Value, hint: Option<&str>) -> Classification;
}

/// All bundled sources.
pub fn builtin_sources() -> Vec<Arc<dyn EventSource>> {
    vec![
        Arc::new(GithubSource),
        Arc::new(GitlabSource),
        Arc::new(DockerhubSource),
        Arc::new(GenericSource),
    ]
}

/// Small builder for template contexts. Empty strings are still inserted so
/// templates can reference every documented key.
#[derive(Default)]
pub(crate) struct ContextBuilder(Map<String, Value>);

impl ContextBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub(crate) fn set_value(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub(crate) fn build(self) -> Map<String, Value> {
        self.0
    }
}

/// Strips a git ref prefix (`refs/heads/main` → `main`).
pub(crate) fn short_ref(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
        .to_string()
}
