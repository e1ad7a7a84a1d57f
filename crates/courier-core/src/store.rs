//! Persistence collaborator contract.
//!
//! The pipeline talks to storage only through [`Store`]. Implementations
//! must hide soft-deleted rows from every query and must make
//! [`Store::insert_queue_item`] and [`Store::increment_fired_count`] atomic
//! with respect to concurrent webhook deliveries.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreResult;
use crate::model::{
    IncomingLog, NewQueueItem, QueueItem, QueueStatus, Rule, Service, Template,
    UserServiceSetting,
};

/// Who a trigger is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// No destination constraint: every qualifying rule matches.
    Anonymous,
    /// Only rules whose owner's inbound identity is in this list match.
    Users(Vec<String>),
}

impl Destination {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// Parameters of an active-rule lookup.
#[derive(Debug, Clone)]
pub struct RuleQuery {
    pub in_service_id: String,
    pub trigger: String,
    pub destination: Destination,
    /// Rule owners already notified in this delivery.
    pub exclude_users: HashSet<String>,
}

/// An active rule joined to its owner's non-empty inbound identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    pub rule: Rule,
    pub identity: String,
}

/// A ready queue item expanded with what the dispatcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelivery {
    pub item: QueueItem,
    /// The destination service, `None` when it was deleted.
    pub service: Option<Service>,
    /// The owner's setting for the destination service.
    pub setting: Option<UserServiceSetting>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Loads a non-deleted service.
    async fn get_service(&self, id: &str) -> StoreResult<Option<Service>>;

    /// Lists every non-deleted service.
    async fn list_services(&self) -> StoreResult<Vec<Service>>;

    /// Finds active rules for a trigger, ordered by `priority_order` ascending.
    ///
    /// A rule qualifies when it and its outbound service are live, its owner
    /// has a non-empty identity on the inbound service, that identity is in
    /// the destination (case-insensitively) unless the destination is
    /// anonymous, and its owner is not in `exclude_users`.
    async fn find_rules(&self, query: &RuleQuery) -> StoreResult<Vec<MatchedRule>>;

    async fn get_template(&self, id: &str) -> StoreResult<Option<Template>>;

    async fn increment_fired_count(&self, rule_id: &str) -> StoreResult<()>;

    /// Inserts a new queue item in the `ready` state.
    async fn insert_queue_item(&self, item: NewQueueItem) -> StoreResult<QueueItem>;

    /// Returns every `ready` item, oldest first.
    async fn ready_deliveries(&self) -> StoreResult<Vec<PendingDelivery>>;

    /// Moves a queue item forward. Backward moves are rejected.
    async fn update_queue_status(&self, id: &str, status: QueueStatus) -> StoreResult<()>;

    async fn insert_incoming_log(
        &self,
        source: &str,
        service_id: &str,
        payload: &Value,
    ) -> StoreResult<IncomingLog>;

    /// Deletes a source's logs created strictly before `before`. Returns how
    /// many rows went away.
    async fn prune_incoming_logs(&self, source: &str, before: DateTime<Utc>)
    -> StoreResult<usize>;

    async fn user_setting(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> StoreResult<Option<UserServiceSetting>>;
}
