use serde_json::Value;

use super::{Classification, ContextBuilder, EventSource, UnsupportedEvent, short_ref};
use crate::context::{get_str, pluck};
use crate::trigger::Trigger;

/// GitLab project webhooks.
///
/// The event type always comes from `object_kind`; the `X-Gitlab-Event`
/// header carries a human label that adds nothing.
pub struct GitlabSource;

impl GitlabSource {
    fn base_context(payload: &Value) -> ContextBuilder {
        ContextBuilder::new()
            .set("project", get_str(payload, "project.name"))
            .set("repository", get_str(payload, "project.path_with_namespace"))
            .set("actor", get_str(payload, "user.username"))
    }

    /// The merge request author, falling back to its assignees.
    fn owners(payload: &Value) -> Vec<String> {
        let author = get_str(payload, "object_attributes.author.username");
        if !author.is_empty() {
            return vec![author];
        }
        pluck(payload, "assignees", "username")
    }

    fn merge_request(payload: &Value) -> Classification {
        let action = get_str(payload, "object_attributes.action");
        let owners = Self::owners(payload);
        let reviewers = pluck(payload, "reviewers", "username");
        let ctx = Self::base_context(payload)
            .set("action", action.clone())
            .set("title", get_str(payload, "object_attributes.title"))
            .set("url", get_str(payload, "object_attributes.url"))
            .set("owner", owners.join(","))
            .set("reviewers", reviewers.join(","))
            .set("branch", get_str(payload, "object_attributes.source_branch"))
            .set("target_branch", get_str(payload, "object_attributes.target_branch"))
            .set("body", get_str(payload, "object_attributes.description"))
            .build();

        let actor = get_str(payload, "user.username");
        let triggers = match action.as_str() {
            "open" => vec![
                Trigger::addressed("mr_review_requested", reviewers, ctx.clone()),
                Trigger::anonymous("mr_opened", ctx),
            ],
            "merge" => vec![Trigger::addressed("mr_merged", owners, ctx)],
            "close" => vec![Trigger::addressed("mr_closed", owners, ctx)],
            "approved" => vec![Trigger::addressed("mr_approved", owners, ctx)],
            other => return Err(UnsupportedEvent::action("merge_request", other)),
        };
        Ok(triggers
            .into_iter()
            .map(|t| t.with_actor(actor.clone()))
            .collect())
    }

    /// Pipeline results go to the user who ran the pipeline, so no actor is
    /// attached.
    fn pipeline(payload: &Value) -> Classification {
        let status = get_str(payload, "object_attributes.status");
        let name = match status.as_str() {
            "failed" => "pipeline_failed",
            "success" => "pipeline_succeeded",
            other => return Err(UnsupportedEvent::action("pipeline", other)),
        };
        let id = get_str(payload, "object_attributes.id");
        let web_url = get_str(payload, "project.web_url");
        let url = if web_url.is_empty() || id.is_empty() {
            String::new()
        } else {
            format!("{web_url}/-/pipelines/{id}")
        };
        let ctx = Self::base_context(payload)
            .set("action", status.clone())
            .set("status", status)
            .set("pipeline_id", id)
            .set("branch", get_str(payload, "object_attributes.ref"))
            .set("title", get_str(payload, "commit.title"))
            .set("url", url)
            .build();
        Ok(vec![Trigger::addressed(
            name,
            [get_str(payload, "user.username")],
            ctx,
        )])
    }

    fn push(payload: &Value, kind: &str) -> Classification {
        let git_ref = get_str(payload, "ref");
        let mut builder = Self::base_context(payload)
            .set("actor", get_str(payload, "user_username"))
            .set("url", get_str(payload, "project.web_url"))
            .set_value(
                "commits",
                payload
                    .get("total_commits_count")
                    .cloned()
                    .unwrap_or(Value::from(0)),
            );
        builder = if kind == "tag_push" {
            builder.set("tag", short_ref(&git_ref))
        } else {
            builder.set("branch", short_ref(&git_ref))
        };
        let actor = get_str(payload, "user_username");
        Ok(vec![Trigger::anonymous(kind, builder.build()).with_actor(actor)])
    }
}

impl EventSource for GitlabSource {
    fn kind(&self) -> &'static str {
        "gitlab"
    }

    fn classify(&self, payload: &Value, _hint: Option<&str>) -> Classification {
        let kind = get_str(payload, "object_kind");
        match kind.as_str() {
            "merge_request" => Self::merge_request(payload),
            "pipeline" => Self::pipeline(payload),
            "push" | "tag_push" => Self::push(payload, &kind),
            "" => Err(UnsupportedEvent("unknown".into())),
            other => Err(UnsupportedEvent(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::Destination;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_mr_open() {
        let payload = json!({
            "object_kind": "merge_request",
            "user": {"username": "alice"},
            "project": {"name": "core", "path_with_namespace": "acme/core"},
            "object_attributes": {"action": "open", "title": "Refactor", "source_branch": "wip"},
            "reviewers": [{"username": "bob"}]
        });
        let triggers = GitlabSource.classify(&payload, Some("Merge Request Hook")).unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].name, "mr_review_requested");
        assert_eq!(triggers[0].destination, Destination::Users(vec!["bob".into()]));
        assert_eq!(triggers[1].name, "mr_opened");
        assert_eq!(triggers[1].actor.as_deref(), Some("alice"));
        assert_eq!(triggers[0].context["branch"], "wip");
    }

    #[test]
    fn test_mr_owner_falls_back_to_assignees() {
        let payload = json!({
            "object_kind": "merge_request",
            "user": {"username": "bob"},
            "object_attributes": {"action": "merge"},
            "assignees": [{"username": "alice"}, {"username": "dan"}]
        });
        let t = GitlabSource.classify(&payload, None).unwrap();
        assert_eq!(t[0].name, "mr_merged");
        assert_eq!(
            t[0].destination,
            Destination::Users(vec!["alice".into(), "dan".into()])
        );

        let payload = json!({
            "object_kind": "merge_request",
            "object_attributes": {"action": "approved", "author": {"username": "erin"}},
            "assignees": [{"username": "alice"}]
        });
        let t = GitlabSource.classify(&payload, None).unwrap();
        assert_eq!(t[0].destination, Destination::Users(vec!["erin".into()]));
    }

    #[test]
    fn test_pipeline_status() {
        let payload = json!({
            "object_kind": "pipeline",
            "user": {"username": "alice"},
            "project": {"web_url": "https://gitlab.com/acme/core"},
            "object_attributes": {"id": 42, "status": "failed", "ref": "main"}
        });
        let t = GitlabSource.classify(&payload, None).unwrap();
        assert_eq!(t[0].name, "pipeline_failed");
        assert_eq!(t[0].actor, None);
        assert_eq!(t[0].context["url"], "https://gitlab.com/acme/core/-/pipelines/42");

        let running = json!({"object_kind": "pipeline", "object_attributes": {"status": "running"}});
        assert_eq!(
            GitlabSource.classify(&running, None),
            Err(UnsupportedEvent("pipeline.running".into()))
        );
    }

    #[test]
    fn test_tag_push() {
        let payload = json!({"object_kind": "tag_push", "ref": "refs/tags/v1.2.0", "user_username": "alice"});
        let t = GitlabSource.classify(&payload, None).unwrap();
        assert_eq!(t[0].name, "tag_push");
        assert_eq!(t[0].context["tag"], "v1.2.0");
        assert!(t[0].destination.is_anonymous());
    }

    #[test]
    fn test_missing_kind() {
        assert_eq!(
            GitlabSource.classify(&json!({}), None),
            Err(UnsupportedEvent("unknown".into()))
        );
    }
}
