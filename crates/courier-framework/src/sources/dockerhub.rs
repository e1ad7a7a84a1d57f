use serde_json::Value;

use super::{Classification, ContextBuilder, EventSource, UnsupportedEvent};
use crate::context::{get, get_str};
use crate::trigger::Trigger;

/// Docker Hub repository push webhooks.
pub struct DockerhubSource;

impl EventSource for DockerhubSource {
    fn kind(&self) -> &'static str {
        "dockerhub"
    }

    fn classify(&self, payload: &Value, _hint: Option<&str>) -> Classification {
        if get(payload, "push_data").is_none() {
            return Err(UnsupportedEvent("unknown".into()));
        }

        let pusher = get_str(payload, "push_data.pusher");
        let ctx = ContextBuilder::new()
            .set("tag", get_str(payload, "push_data.tag"))
            .set("project", get_str(payload, "repository.name"))
            .set("repository", get_str(payload, "repository.repo_name"))
            .set("pusher", pusher.clone())
            .set("actor", pusher.clone())
            .set("url", get_str(payload, "repository.repo_url"))
            .build();

        Ok(vec![Trigger::anonymous("push", ctx).with_actor(pusher)])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_push_context() {
        let payload = json!({
            "push_data": {"tag": "latest", "pusher": "ci"},
            "repository": {"name": "web", "repo_name": "acme/web", "repo_url": "https://hub.docker.com/r/acme/web"}
        });
        let t = DockerhubSource.classify(&payload, None).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].name, "push");
        assert_eq!(t[0].context["tag"], "latest");
        assert_eq!(t[0].context["project"], "web");
        assert_eq!(t[0].context["repository"], "acme/web");
    }

    #[test]
    fn test_without_push_data() {
        assert!(DockerhubSource.classify(&json!({"repository": {}}), None).is_err());
    }
}
