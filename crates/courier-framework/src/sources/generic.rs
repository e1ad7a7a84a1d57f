use serde_json::Value;

use super::{Classification, EventSource, UnsupportedEvent};
use crate::context::{flatten, get_str};
use crate::trigger::Trigger;

/// Any tool that can POST `{"event": "<trigger>", ...}`.
///
/// An optional `user` addresses a single identity, an optional `actor`
/// names who caused the event. The whole payload, flattened, is the
/// template context.
pub struct GenericSource;

impl EventSource for GenericSource {
    fn kind(&self) -> &'static str {
        "generic"
    }

    fn classify(&self, payload: &Value, _hint: Option<&str>) -> Classification {
        let event = get_str(payload, "event");
        if event.trim().is_empty() {
            return Err(UnsupportedEvent("unknown".into()));
        }

        let ctx = flatten(payload);
        let user = get_str(payload, "user");
        let trigger = if user.is_empty() {
            Trigger::anonymous(event.trim(), ctx)
        } else {
            Trigger::addressed(event.trim(), [user], ctx)
        };
        Ok(vec![trigger.with_actor(get_str(payload, "actor"))])
    }
}
