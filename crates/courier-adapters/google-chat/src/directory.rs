//! Spaces and memberships known to the bot.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use courier_core::{UserRecord, sort_users};

/// One page of a Chat API listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new", alias = "spaces", alias = "memberships")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    /// `spaces/…`
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub space_type: Option<String>,
    /// Older API field, `DM` for direct messages.
    #[serde(default, rename = "type")]
    pub legacy_type: Option<String>,
}

impl Space {
    pub fn is_direct(&self) -> bool {
        self.space_type.as_deref() == Some("DIRECT_MESSAGE") || self.legacy_type.as_deref() == Some("DM")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    #[serde(default)]
    pub member: Option<Member>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// `users/…`
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Member {
    fn is_human(&self) -> bool {
        self.kind.as_deref().is_none_or(|k| k == "HUMAN")
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    spaces: Vec<Space>,
    users: BTreeMap<String, Member>,
    /// `users/…` → the direct-message space shared with that user.
    direct: HashMap<String, String>,
}

impl Directory {
    pub fn build(listing: Vec<(Space, Vec<Membership>)>) -> Self {
        let mut directory = Directory::default();
        for (space, memberships) in listing {
            for member in memberships.into_iter().filter_map(|m| m.member) {
                if !member.is_human() {
                    continue;
                }
                if space.is_direct() {
                    directory
                        .direct
                        .insert(member.name.clone(), space.name.clone());
                }
                // prefer an entry that carries a display name
                let known = directory
                    .users
                    .get(&member.name)
                    .is_some_and(|m| m.display_name.is_some());
                if !known {
                    directory.users.insert(member.name.clone(), member);
                }
            }
            directory.spaces.push(space);
        }
        directory
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Maps an identity to the space a message must be posted to.
    pub fn resolve(&self, identity: &str) -> Option<String> {
        if identity.starts_with("spaces/") {
            return Some(identity.to_string());
        }
        if identity.starts_with("users/") {
            return self.direct.get(identity).cloned();
        }
        None
    }

    pub fn users(&self) -> Vec<UserRecord> {
        let mut users: Vec<_> = self
            .users
            .values()
            .map(|m| {
                let name = m
                    .display_name
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| m.name.clone());
                UserRecord::new(m.name.clone(), name)
            })
            .collect();
        sort_users(&mut users);
        users
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn listing() -> Vec<(Space, Vec<Membership>)> {
        let spaces: Page<Space> = serde_json::from_value(json!({
            "spaces": [
                {"name": "spaces/ops", "displayName": "Ops", "spaceType": "SPACE"},
                {"name": "spaces/dm1", "spaceType": "DIRECT_MESSAGE"},
                {"name": "spaces/dm2", "type": "DM"}
            ],
            "nextPageToken": ""
        }))
        .unwrap();
        let members = |v: serde_json::Value| -> Vec<Membership> {
            serde_json::from_value::<Page<Membership>>(v).unwrap().items
        };
        let mut it = spaces.items.into_iter();
        vec![
            (it.next().unwrap(), members(json!({"memberships": [
                {"member": {"name": "users/1", "displayName": "Zed", "type": "HUMAN"}},
                {"member": {"name": "users/2", "type": "HUMAN"}},
                {"member": {"name": "users/bot", "displayName": "Courier", "type": "BOT"}}
            ]}))),
            (it.next().unwrap(), members(json!({"memberships": [
                {"member": {"name": "users/2", "displayName": "Amy", "type": "HUMAN"}}
            ]}))),
            (it.next().unwrap(), members(json!({"memberships": [
                {"member": {"name": "users/1", "type": "HUMAN"}}
            ]}))),
        ]
    }

    #[test]
    fn test_resolve_identities() {
        let directory = Directory::build(listing());
        assert_eq!(directory.space_count(), 3);
        assert_eq!(directory.resolve("spaces/ops").as_deref(), Some("spaces/ops"));
        assert_eq!(directory.resolve("users/2").as_deref(), Some("spaces/dm1"));
        assert_eq!(directory.resolve("users/1").as_deref(), Some("spaces/dm2"));
        assert_eq!(directory.resolve("users/404"), None);
        assert_eq!(directory.resolve("alice@example.com"), None);
    }

    #[test]
    fn test_users_are_humans_sorted_by_display_name() {
        let users = Directory::build(listing()).users();
        let names: Vec<_> = users.iter().map(|u| (u.id.as_str(), u.display_name.as_str())).collect();
        assert_eq!(names, vec![("users/2", "Amy"), ("users/1", "Zed")]);
    }
}
