//! In-memory [`Store`] backed by `parking_lot` tables.
//!
//! Used by the bundled binary and by tests. Tables can be seeded from a JSON
//! document:
//!
//! ```json
//! {
//!   "services":  [{"id": "gh", "type": "github", "data": {"validation_key": "k"}}],
//!   "rules":     [{"id": "r1", "user_id": "u1", "in_service_id": "gh", "trigger": "push",
//!                  "out_service_id": "slack", "out_template_id": "t1"}],
//!   "templates": [{"id": "t1", "content": "{{ project }} was pushed"}],
//!   "settings":  [{"user_id": "u1", "service_id": "gh", "identity": "alice"}]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    IncomingLog, NewQueueItem, QueueItem, QueueStatus, Rule, Service, Template,
    UserServiceSetting,
};
use crate::store::{Destination, MatchedRule, PendingDelivery, RuleQuery, Store};

/// Seed document for [`MemoryStore`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub services: Vec<Service>,
    pub rules: Vec<Rule>,
    pub templates: Vec<Template>,
    pub settings: Vec<UserServiceSetting>,
}

#[derive(Default)]
struct Tables {
    services: HashMap<String, Service>,
    rules: HashMap<String, Rule>,
    templates: HashMap<String, Template>,
    settings: Vec<UserServiceSetting>,
    queue: Vec<QueueItem>,
    logs: Vec<IncomingLog>,
}

impl Tables {
    fn live_service(&self, id: &str) -> Option<&Service> {
        self.services.get(id).filter(|s| !s.deleted)
    }

    fn setting(&self, user_id: &str, service_id: &str) -> Option<&UserServiceSetting> {
        self.settings
            .iter()
            .find(|s| s.user_id == user_id && s.service_id == service_id)
    }
}

/// A [`Store`] that keeps every table in process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated from seed data.
    pub fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        store.apply_seed(seed);
        store
    }

    /// Reads and applies a JSON seed file.
    pub fn load_seed_file(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))?;
        let seed: SeedData = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))?;
        self.apply_seed(seed);
        Ok(())
    }

    pub fn apply_seed(&self, seed: SeedData) {
        let mut tables = self.tables.write();
        for service in seed.services {
            tables.services.insert(service.id.clone(), service);
        }
        for rule in seed.rules {
            tables.rules.insert(rule.id.clone(), rule);
        }
        for template in seed.templates {
            tables.templates.insert(template.id.clone(), template);
        }
        tables.settings.extend(seed.settings);
    }

    /// Inserts or replaces a service.
    pub fn upsert_service(&self, service: Service) {
        self.tables
            .write()
            .services
            .insert(service.id.clone(), service);
    }

    /// Soft-deletes a service. Returns false when it does not exist.
    pub fn delete_service(&self, id: &str) -> bool {
        match self.tables.write().services.get_mut(id) {
            Some(service) => {
                service.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn upsert_rule(&self, rule: Rule) {
        self.tables.write().rules.insert(rule.id.clone(), rule);
    }

    pub fn upsert_template(&self, template: Template) {
        self.tables
            .write()
            .templates
            .insert(template.id.clone(), template);
    }

    /// Inserts or replaces the setting for `(user_id, service_id)`.
    pub fn upsert_setting(&self, setting: UserServiceSetting) {
        let mut tables = self.tables.write();
        tables
            .settings
            .retain(|s| !(s.user_id == setting.user_id && s.service_id == setting.service_id));
        tables.settings.push(setting);
    }

    /// Returns a rule regardless of its deleted flag.
    pub fn rule(&self, id: &str) -> Option<Rule> {
        self.tables.read().rules.get(id).cloned()
    }

    /// Snapshot of the whole queue table in insertion order.
    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.tables.read().queue.clone()
    }

    /// Snapshot of one source's incoming logs.
    pub fn incoming_logs(&self, source: &str) -> Vec<IncomingLog> {
        self.tables
            .read()
            .logs
            .iter()
            .filter(|l| l.source == source)
            .cloned()
            .collect()
    }

    /// Inserts a log row with an explicit timestamp.
    pub fn insert_log_at(
        &self,
        source: &str,
        service_id: &str,
        payload: Value,
        created_on: DateTime<Utc>,
    ) -> IncomingLog {
        let log = IncomingLog {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            service_id: service_id.to_string(),
            payload,
            created_on,
        };
        self.tables.write().logs.push(log.clone());
        log
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_service(&self, id: &str) -> StoreResult<Option<Service>> {
        Ok(self.tables.read().live_service(id).cloned())
    }

    async fn list_services(&self) -> StoreResult<Vec<Service>> {
        let tables = self.tables.read();
        let mut services: Vec<Service> = tables
            .services
            .values()
            .filter(|s| !s.deleted)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn find_rules(&self, query: &RuleQuery) -> StoreResult<Vec<MatchedRule>> {
        let tables = self.tables.read();
        let mut matched: Vec<MatchedRule> = tables
            .rules
            .values()
            .filter(|r| r.active && !r.deleted)
            .filter(|r| r.in_service_id == query.in_service_id && r.trigger == query.trigger)
            .filter(|r| tables.live_service(&r.out_service_id).is_some())
            .filter(|r| !query.exclude_users.contains(&r.user_id))
            .filter_map(|r| {
                let identity = tables
                    .setting(&r.user_id, &query.in_service_id)?
                    .usable_identity()?
                    .to_string();
                let addressed = match &query.destination {
                    Destination::Anonymous => true,
                    Destination::Users(users) => {
                        users.iter().any(|u| u.eq_ignore_ascii_case(&identity))
                    }
                };
                addressed.then(|| MatchedRule {
                    rule: r.clone(),
                    identity,
                })
            })
            .collect();

        matched.sort_by(|a, b| {
            a.rule
                .priority_order
                .cmp(&b.rule.priority_order)
                .then_with(|| a.rule.id.cmp(&b.rule.id))
        });
        Ok(matched)
    }

    async fn get_template(&self, id: &str) -> StoreResult<Option<Template>> {
        Ok(self
            .tables
            .read()
            .templates
            .get(id)
            .filter(|t| !t.deleted)
            .cloned())
    }

    async fn increment_fired_count(&self, rule_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let rule = tables
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| StoreError::Missing {
                entity: "rule",
                id: rule_id.to_string(),
            })?;
        rule.fired_count += 1;
        Ok(())
    }

    async fn insert_queue_item(&self, item: NewQueueItem) -> StoreResult<QueueItem> {
        let now = Utc::now();
        let row = QueueItem {
            id: Uuid::new_v4().to_string(),
            user_id: item.user_id,
            rule_id: item.rule_id,
            service_id: item.service_id,
            content: item.content,
            status: QueueStatus::Ready,
            created_on: now,
            updated_on: now,
        };
        self.tables.write().queue.push(row.clone());
        Ok(row)
    }

    async fn ready_deliveries(&self) -> StoreResult<Vec<PendingDelivery>> {
        let tables = self.tables.read();
        Ok(tables
            .queue
            .iter()
            .filter(|item| item.status == QueueStatus::Ready)
            .map(|item| PendingDelivery {
                item: item.clone(),
                service: tables.live_service(&item.service_id).cloned(),
                setting: tables.setting(&item.user_id, &item.service_id).cloned(),
            })
            .collect())
    }

    async fn update_queue_status(&self, id: &str, status: QueueStatus) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let item = tables
            .queue
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::Missing {
                entity: "queue item",
                id: id.to_string(),
            })?;

        if !item.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: item.status.to_string(),
                to: status.to_string(),
            });
        }
        item.status = status;
        item.updated_on = Utc::now();
        Ok(())
    }

    async fn insert_incoming_log(
        &self,
        source: &str,
        service_id: &str,
        payload: &Value,
    ) -> StoreResult<IncomingLog> {
        Ok(self.insert_log_at(source, service_id, payload.clone(), Utc::now()))
    }

    async fn prune_incoming_logs(
        &self,
        source: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let len = tables.logs.len();
        tables
            .logs
            .retain(|l| l.source != source || l.created_on >= before);
        Ok(len - tables.logs.len())
    }

    async fn user_setting(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> StoreResult<Option<UserServiceSetting>> {
        Ok(self.tables.read().setting(user_id, service_id).cloned())
    }
}
