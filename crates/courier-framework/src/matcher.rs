//! Rule matching and notification production.
//!
//! For one trigger the [`RuleMatcher`]:
//!
//! 1. resolves the destination, dropping the actor's own identity;
//! 2. asks the [`Store`] for active rules ordered by priority, excluding
//!    owners already notified in this delivery;
//! 3. walks the matched rules strictly one at a time, filtering on extra
//!    conditions, rendering, enqueuing and counting.
//!
//! Because each rule's effects land before the next rule is looked at, a
//! user is never notified twice within a delivery, without any locking.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use courier_core::{
    CourierError, CourierResult, Destination, MatchedRule, NewQueueItem, RuleQuery, Store,
    TemplateRenderer,
};

use crate::conditions::conditions_match;
use crate::trigger::Trigger;

/// Key under which pipeline metadata is exposed to templates.
pub const META_KEY: &str = "courier";

/// Resolves rules for triggers and enqueues rendered notifications.
#[derive(Clone)]
pub struct RuleMatcher {
    store: Arc<dyn Store>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl RuleMatcher {
    pub fn new(store: Arc<dyn Store>, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { store, renderer }
    }

    /// Processes one trigger from `in_service_id`.
    ///
    /// `notified` holds the users already served by earlier triggers of the
    /// same delivery. Returns the users newly notified by this trigger.
    /// Failures of individual rules are logged and count as zero
    /// notifications; only a failing rule lookup is returned as an error.
    pub async fn process_rules(
        &self,
        in_service_id: &str,
        trigger: &Trigger,
        raw_event: &Value,
        notified: &HashSet<String>,
    ) -> CourierResult<HashSet<String>> {
        let Some(destination) = resolve_destination(trigger) else {
            debug!(trigger = %trigger.name, "Trigger has no destination, skipping");
            return Ok(HashSet::new());
        };

        let query = RuleQuery {
            in_service_id: in_service_id.to_string(),
            trigger: trigger.name.clone(),
            destination,
            exclude_users: notified.clone(),
        };
        let matched = self.store.find_rules(&query).await?;
        debug!(
            trigger = %trigger.name,
            service_id = %in_service_id,
            count = matched.len(),
            "Matched rules"
        );

        let mut newly = HashSet::new();
        for candidate in matched {
            let user_id = candidate.rule.user_id.clone();
            if notified.contains(&user_id) || newly.contains(&user_id) {
                continue;
            }
            match self.fire(&candidate, trigger, raw_event).await {
                Ok(true) => {
                    newly.insert(user_id);
                }
                Ok(false) => {}
                Err(e) => warn!(
                    rule_id = %candidate.rule.id,
                    trigger = %trigger.name,
                    error = %e,
                    "Rule failed, skipping"
                ),
            }
        }
        Ok(newly)
    }

    /// Fires one rule. Returns false when its conditions filtered it out.
    async fn fire(
        &self,
        candidate: &MatchedRule,
        trigger: &Trigger,
        raw_event: &Value,
    ) -> CourierResult<bool> {
        let rule = &candidate.rule;
        if !conditions_match(&rule.extra_conditions, &trigger.context) {
            debug!(rule_id = %rule.id, "Extra conditions did not match");
            return Ok(false);
        }

        let template = self
            .store
            .get_template(&rule.out_template_id)
            .await?
            .ok_or_else(|| CourierError::not_found("template", rule.out_template_id.clone()))?;

        let meta = serde_json::json!({
            "trigger": trigger.name,
            "rule_id": rule.id,
            "user_id": rule.user_id,
            "identity": candidate.identity,
            "in_service_id": rule.in_service_id,
            "out_service_id": rule.out_service_id,
        });
        let data = merge_data(
            &template.default_options,
            &rule.out_template_options,
            raw_event,
            &trigger.context,
            meta,
        );
        let content = self
            .renderer
            .render(&template.content, &data, template.render_engine)
            .await?;

        self.store
            .insert_queue_item(NewQueueItem {
                user_id: rule.user_id.clone(),
                rule_id: rule.id.clone(),
                service_id: rule.out_service_id.clone(),
                content,
            })
            .await?;
        // the item is queued, so a counting failure must not undo the dedup
        if let Err(e) = self.store.increment_fired_count(&rule.id).await {
            warn!(rule_id = %rule.id, error = %e, "Failed to count fired rule");
        }

        debug!(rule_id = %rule.id, user_id = %rule.user_id, "Notification queued");
        Ok(true)
    }
}

/// Applies self-suppression to a trigger's destination.
///
/// Returns `None` when an addressed trigger ends up with nobody to notify.
/// Anonymous triggers are passed through untouched.
pub fn resolve_destination(trigger: &Trigger) -> Option<Destination> {
    match &trigger.destination {
        Destination::Anonymous => Some(Destination::Anonymous),
        Destination::Users(users) => {
            let mut seen = HashSet::new();
            let remaining: Vec<String> = users
                .iter()
                .filter(|u| match &trigger.actor {
                    Some(actor) => !u.eq_ignore_ascii_case(actor),
                    None => true,
                })
                .filter(|u| seen.insert(u.to_lowercase()))
                .cloned()
                .collect();
            (!remaining.is_empty()).then_some(Destination::Users(remaining))
        }
    }
}

/// Merges render data, later layers winning:
/// template defaults < rule options < the raw payload (as `payload`) <
/// event context < pipeline metadata (as `courier`).
pub fn merge_data(
    defaults: &Map<String, Value>,
    options: &Map<String, Value>,
    raw_event: &Value,
    context: &Map<String, Value>,
    meta: Value,
) -> Map<String, Value> {
    let mut data = defaults.clone();
    data.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
    data.insert("payload".to_string(), raw_event.clone());
    data.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
    data.insert(META_KEY.to_string(), meta);
    data
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_actor_removed_from_destination() {
        let trigger = Trigger::addressed("pr_merged", ["Alice", "bob"], Map::new()).with_actor("alice");
        assert_eq!(
            resolve_destination(&trigger),
            Some(Destination::Users(vec!["bob".into()]))
        );
    }

    #[test]
    fn test_self_action_short_circuits() {
        let trigger = Trigger::addressed("pr_merged", ["alice"], Map::new()).with_actor("alice");
        assert_eq!(resolve_destination(&trigger), None);

        let nobody = Trigger::addressed("pr_review_requested", Vec::<String>::new(), Map::new());
        assert_eq!(resolve_destination(&nobody), None);
    }

    #[test]
    fn test_anonymous_ignores_actor() {
        let trigger = Trigger::anonymous("push", Map::new()).with_actor("alice");
        assert_eq!(resolve_destination(&trigger), Some(Destination::Anonymous));
    }

    #[test]
    fn test_merge_precedence() {
        let data = merge_data(
            &obj(json!({"a": "default", "b": "default", "c": "default", "courier": "x"})),
            &obj(json!({"b": "option", "c": "option"})),
            &json!({"raw": true}),
            &obj(json!({"c": "context"})),
            json!({"trigger": "push"}),
        );
        assert_eq!(data["a"], "default");
        assert_eq!(data["b"], "option");
        assert_eq!(data["c"], "context");
        assert_eq!(data["payload"]["raw"], true);
        assert_eq!(data["courier"]["trigger"], "push");
    }
}
