//! Slack Web API response shapes.

use serde::Deserialize;
use serde_json::Value;

use courier_core::{DeliveryError, DeliveryResult, UserRecord};

/// Accounts Slack lists as members that are never notification targets.
const SYSTEM_USERS: &[&str] = &["USLACKBOT"];

/// Rejects `ok: false` envelopes.
pub(crate) fn check_ok(resp: Value) -> DeliveryResult<Value> {
    if resp.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(resp);
    }
    let error = resp
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    Err(DeliveryError::Rejected(format!("slack: {error}")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersPage {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

impl UsersPage {
    pub fn next_cursor(&self) -> Option<&str> {
        self.response_metadata
            .as_ref()
            .map(|m| m.next_cursor.as_str())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: Profile,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Profile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub image_72: Option<String>,
}

impl Member {
    pub fn is_person(&self) -> bool {
        !self.is_bot && !self.deleted && !SYSTEM_USERS.contains(&self.id.as_str())
    }

    pub fn into_record(self) -> UserRecord {
        let display = if self.profile.display_name.is_empty() {
            self.profile.real_name
        } else {
            self.profile.display_name
        };
        UserRecord::new(self.id, self.name)
            .with_display_name(display)
            .with_avatar(self.profile.image_72)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_check_ok() {
        assert!(check_ok(json!({"ok": true, "ts": "1"})).is_ok());
        match check_ok(json!({"ok": false, "error": "channel_not_found"})) {
            Err(DeliveryError::Rejected(msg)) => assert_eq!(msg, "slack: channel_not_found"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_ok(json!("<html>")).is_err());
    }

    #[test]
    fn test_members_filtering() {
        let page: UsersPage = serde_json::from_value(json!({
            "ok": true,
            "members": [
                {"id": "U1", "name": "alice", "profile": {"display_name": "", "real_name": "Alice A", "image_72": "http://img/a"}},
                {"id": "U2", "name": "bot", "is_bot": true},
                {"id": "U3", "name": "gone", "deleted": true},
                {"id": "USLACKBOT", "name": "slackbot"}
            ],
            "response_metadata": {"next_cursor": ""}
        }))
        .unwrap();
        assert_eq!(page.next_cursor(), None);

        let people: Vec<_> = page
            .members
            .into_iter()
            .filter(Member::is_person)
            .map(Member::into_record)
            .collect();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].display_name, "Alice A");
        assert_eq!(people[0].avatar.as_deref(), Some("http://img/a"));
    }
}
