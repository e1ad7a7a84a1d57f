//! Persisted entities.
//!
//! These rows are owned by the persistence collaborator. The pipeline only
//! reads services, rules, templates and per-user settings; it creates queue
//! items and incoming logs, and it patches queue status and rule counters.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Service
// =============================================================================

/// Well-known service type strings.
pub mod service_type {
    pub const GITHUB: &str = "github";
    pub const GITLAB: &str = "gitlab";
    pub const DOCKERHUB: &str = "dockerhub";
    pub const GENERIC: &str = "generic";
    pub const SLACK: &str = "slack";
    pub const XMPP: &str = "xmpp";
    pub const GOOGLE_CHAT: &str = "google_chat";
    pub const PUSHOVER: &str = "pushover";
    pub const NTFY: &str = "ntfy";

    /// Outbound types whose changes require the connection directory to be rebuilt.
    pub const OUTBOUND: &[&str] = &[SLACK, XMPP, GOOGLE_CHAT, PUSHOVER, NTFY];

    /// Returns true for outbound channel types.
    pub fn is_outbound(kind: &str) -> bool {
        OUTBOUND.contains(&kind)
    }
}

/// One configured inbound or outbound channel instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    /// Opaque per-type configuration, including credentials and the
    /// validation key for inbound services.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub deleted: bool,
}

impl Service {
    /// The validation key carried in `data.validation_key`, if any.
    pub fn validation_key(&self) -> Option<&str> {
        self.data.get("validation_key").and_then(Value::as_str)
    }

    /// Returns true when this service is an outbound channel.
    pub fn is_outbound(&self) -> bool {
        service_type::is_outbound(&self.kind)
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A user's mapping from (inbound service, trigger) to (outbound service,
/// template, filters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub user_id: String,
    pub in_service_id: String,
    pub trigger: String,
    /// Key to filter value. Values may be comma-separated alternatives.
    #[serde(default)]
    pub extra_conditions: BTreeMap<String, String>,
    pub out_service_id: String,
    pub out_template_id: String,
    #[serde(default)]
    pub out_template_options: Map<String, Value>,
    #[serde(default)]
    pub priority_order: i64,
    #[serde(default)]
    pub fired_count: u64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Template
// =============================================================================

/// Template engine used to render a template's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderEngine {
    /// `tera` template syntax.
    #[default]
    Tera,
    /// Content is delivered verbatim.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub default_options: Map<String, Value>,
    #[serde(default)]
    pub example_data: Value,
    #[serde(default)]
    pub render_engine: RenderEngine,
    #[serde(default)]
    pub deleted: bool,
}

// =============================================================================
// Notification Queue
// =============================================================================

/// Delivery status of a queue item.
///
/// Transitions only move forward: `ready -> processing -> completed | error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Ready,
    Processing,
    Completed,
    Error,
}

impl QueueStatus {
    /// Returns true when moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
        )
    }

    /// Returns true for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered message awaiting or having completed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub user_id: String,
    pub rule_id: String,
    pub service_id: String,
    pub content: String,
    pub status: QueueStatus,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// Insert payload for a queue item. New items always start `ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    pub user_id: String,
    pub rule_id: String,
    pub service_id: String,
    pub content: String,
}

// =============================================================================
// Incoming Logs and Settings
// =============================================================================

/// A raw inbound payload, kept per source for two days by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingLog {
    pub id: String,
    pub source: String,
    pub service_id: String,
    pub payload: Value,
    pub created_on: DateTime<Utc>,
}

/// A user's identity on one service.
///
/// For inbound services this is the account name the source reports (a
/// GitHub login, a GitLab username). For outbound services it is the
/// delivery target (a Slack member id, a JID, a Pushover user key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserServiceSetting {
    pub user_id: String,
    pub service_id: String,
    #[serde(default)]
    pub identity: String,
}

impl UserServiceSetting {
    /// The identity, or `None` when it is blank.
    pub fn usable_identity(&self) -> Option<&str> {
        let identity = self.identity.trim();
        (!identity.is_empty()).then_some(identity)
    }
}
