use serde_json::Value;

use super::{Classification, ContextBuilder, EventSource, UnsupportedEvent, short_ref};
use crate::context::{get, get_bool, get_str, pluck};
use crate::trigger::Trigger;

/// GitHub repository webhooks.
pub struct GithubSource;

impl GithubSource {
    /// Event type when no `X-GitHub-Event` header was supplied.
    fn infer_event(payload: &Value) -> &'static str {
        let has = |path| get(payload, path).is_some();
        if has("pull_request") && has("review") {
            "pull_request_review"
        } else if has("pull_request") {
            "pull_request"
        } else if has("issue") && has("comment") {
            "issue_comment"
        } else if has("issue") {
            "issues"
        } else if has("pusher") || has("commits") {
            "push"
        } else {
            "unknown"
        }
    }

    fn base_context(payload: &Value) -> ContextBuilder {
        ContextBuilder::new()
            .set("project", get_str(payload, "repository.name"))
            .set("repository", get_str(payload, "repository.full_name"))
            .set("actor", get_str(payload, "sender.login"))
            .set("action", get_str(payload, "action"))
    }

    fn pull_request(payload: &Value, action: &str) -> Classification {
        let owner = get_str(payload, "pull_request.user.login");
        let reviewers = pluck(payload, "pull_request.requested_reviewers", "login");
        let ctx = Self::base_context(payload)
            .set("title", get_str(payload, "pull_request.title"))
            .set("url", get_str(payload, "pull_request.html_url"))
            .set("owner", owner.clone())
            .set("reviewers", reviewers.join(","))
            .set("branch", get_str(payload, "pull_request.head.ref"))
            .set("body", get_str(payload, "pull_request.body"))
            .build();

        let triggers = match action {
            "opened" => vec![
                Trigger::addressed("pr_review_requested", reviewers, ctx.clone()),
                Trigger::anonymous("pr_opened", ctx),
            ],
            "review_requested" => {
                let reviewer = get_str(payload, "requested_reviewer.login");
                vec![Trigger::addressed("pr_review_requested", [reviewer], ctx)]
            }
            "closed" if get_bool(payload, "pull_request.merged") => {
                vec![Trigger::addressed("pr_merged", [owner], ctx)]
            }
            "closed" => vec![Trigger::addressed("pr_closed", [owner], ctx)],
            _ => return Err(UnsupportedEvent::action("pull_request", action)),
        };
        Ok(triggers)
    }

    fn pull_request_review(payload: &Value, action: &str) -> Classification {
        if action != "submitted" {
            return Err(UnsupportedEvent::action("pull_request_review", action));
        }
        let owner = get_str(payload, "pull_request.user.login");
        let state = get_str(payload, "review.state").to_lowercase();
        let ctx = Self::base_context(payload)
            .set("title", get_str(payload, "pull_request.title"))
            .set("url", get_str(payload, "review.html_url"))
            .set("owner", owner.clone())
            .set("branch", get_str(payload, "pull_request.head.ref"))
            .set("body", get_str(payload, "review.body"))
            .set("state", state.clone())
            .build();

        let name = match state.as_str() {
            "approved" => "pr_approved",
            "changes_requested" => "pr_changes_requested",
            _ => "pr_reviewed",
        };
        Ok(vec![Trigger::addressed(name, [owner], ctx)])
    }

    fn issue_comment(payload: &Value, action: &str) -> Classification {
        if action != "created" {
            return Err(UnsupportedEvent::action("issue_comment", action));
        }
        let owner = get_str(payload, "issue.user.login");
        let ctx = Self::base_context(payload)
            .set("title", get_str(payload, "issue.title"))
            .set("url", get_str(payload, "comment.html_url"))
            .set("owner", owner.clone())
            .set("body", get_str(payload, "comment.body"))
            .build();

        let name = if get(payload, "issue.pull_request").is_some() {
            "pr_commented"
        } else {
            "issue_commented"
        };
        Ok(vec![Trigger::addressed(name, [owner], ctx)])
    }

    fn issues(payload: &Value, action: &str) -> Classification {
        let assignee = get_str(payload, "assignee.login");
        let ctx = Self::base_context(payload)
            .set("title", get_str(payload, "issue.title"))
            .set("url", get_str(payload, "issue.html_url"))
            .set("owner", get_str(payload, "issue.user.login"))
            .set("assignee", assignee.clone())
            .set("body", get_str(payload, "issue.body"))
            .build();

        match action {
            "opened" => Ok(vec![Trigger::anonymous("issue_opened", ctx)]),
            "assigned" => Ok(vec![Trigger::addressed("issue_assigned", [assignee], ctx)]),
            _ => Err(UnsupportedEvent::action("issues", action)),
        }
    }

    fn push(payload: &Value) -> Classification {
        let commits = get(payload, "commits")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        let mut actor = get_str(payload, "sender.login");
        if actor.is_empty() {
            actor = get_str(payload, "pusher.name");
        }
        let ctx = Self::base_context(payload)
            .set("actor", actor)
            .set("title", get_str(payload, "head_commit.message"))
            .set("url", get_str(payload, "compare"))
            .set("branch", short_ref(&get_str(payload, "ref")))
            .set_value("commits", Value::from(commits))
            .build();
        Ok(vec![Trigger::anonymous("push", ctx)])
    }
}

impl EventSource for GithubSource {
    fn kind(&self) -> &'static str {
        "github"
    }

    fn classify(&self, payload: &Value, hint: Option<&str>) -> Classification {
        let event = match hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => hint.to_string(),
            None => Self::infer_event(payload).to_string(),
        };
        let action = get_str(payload, "action");

        let triggers = match event.as_str() {
            "pull_request" => Self::pull_request(payload, &action)?,
            "pull_request_review" => Self::pull_request_review(payload, &action)?,
            "issue_comment" => Self::issue_comment(payload, &action)?,
            "issues" => Self::issues(payload, &action)?,
            "push" => Self::push(payload)?,
            other => return Err(UnsupportedEvent(other.to_string())),
        };

        let actor = triggers
            .first()
            .and_then(|t| t.context.get("actor"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(triggers
            .into_iter()
            .map(|t| t.with_actor(actor.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::Destination;
    use serde_json::json;

    use super::*;

    fn opened_pr() -> Value {
        json!({
            "action": "opened",
            "sender": {"login": "alice"},
            "repository": {"name": "core", "full_name": "acme/core"},
            "pull_request": {
                "title": "Add cache",
                "html_url": "https://github.com/acme/core/pull/1",
                "user": {"login": "alice"},
                "head": {"ref": "feature/cache"},
                "requested_reviewers": [{"login": "bob"}, {"login": "carol"}]
            }
        })
    }

    #[test]
    fn test_pr_opened_maps_to_two_triggers() {
        let triggers = GithubSource.classify(&opened_pr(), Some("pull_request")).unwrap();
        assert_eq!(triggers.len(), 2);

        assert_eq!(triggers[0].name, "pr_review_requested");
        assert_eq!(
            triggers[0].destination,
            Destination::Users(vec!["bob".into(), "carol".into()])
        );
        assert_eq!(triggers[0].actor.as_deref(), Some("alice"));
        assert_eq!(triggers[0].context["project"], "core");
        assert_eq!(triggers[0].context["branch"], "feature/cache");

        assert_eq!(triggers[1].name, "pr_opened");
        assert!(triggers[1].destination.is_anonymous());
    }

    #[test]
    fn test_event_type_inferred_without_hint() {
        let triggers = GithubSource.classify(&opened_pr(), None).unwrap();
        assert_eq!(triggers[1].name, "pr_opened");
    }

    #[test]
    fn test_closed_pr_merged_or_closed() {
        let mut payload = opened_pr();
        payload["action"] = json!("closed");
        payload["sender"]["login"] = json!("bob");
        payload["pull_request"]["merged"] = json!(true);
        let merged = GithubSource.classify(&payload, Some("pull_request")).unwrap();
        assert_eq!(merged[0].name, "pr_merged");
        assert_eq!(merged[0].destination, Destination::Users(vec!["alice".into()]));

        payload["pull_request"]["merged"] = json!(false);
        let closed = GithubSource.classify(&payload, Some("pull_request")).unwrap();
        assert_eq!(closed[0].name, "pr_closed");
    }

    #[test]
    fn test_review_states() {
        let payload = |state: &str| {
            json!({
                "action": "submitted",
                "sender": {"login": "bob"},
                "review": {"state": state, "body": "lgtm"},
                "pull_request": {"user": {"login": "alice"}}
            })
        };
        let name = |state| {
            GithubSource.classify(&payload(state), Some("pull_request_review")).unwrap()[0]
                .name
                .clone()
        };
        assert_eq!(name("APPROVED"), "pr_approved");
        assert_eq!(name("changes_requested"), "pr_changes_requested");
        assert_eq!(name("commented"), "pr_reviewed");
    }

    #[test]
    fn test_comment_on_pr_vs_issue() {
        let mut payload = json!({
            "action": "created",
            "sender": {"login": "bob"},
            "issue": {"user": {"login": "alice"}, "title": "Bug"},
            "comment": {"body": "+1"}
        });
        let t = GithubSource.classify(&payload, Some("issue_comment")).unwrap();
        assert_eq!(t[0].name, "issue_commented");

        payload["issue"]["pull_request"] = json!({"url": "x"});
        let t = GithubSource.classify(&payload, Some("issue_comment")).unwrap();
        assert_eq!(t[0].name, "pr_commented");
    }

    #[test]
    fn test_push_is_anonymous() {
        let payload = json!({
            "ref": "refs/heads/main",
            "pusher": {"name": "alice"},
            "repository": {"name": "core"},
            "commits": [{}, {}]
        });
        let t = GithubSource.classify(&payload, Some("push")).unwrap();
        assert_eq!(t[0].name, "push");
        assert!(t[0].destination.is_anonymous());
        assert_eq!(t[0].context["branch"], "main");
        assert_eq!(t[0].context["commits"], 2);
        assert_eq!(t[0].actor.as_deref(), Some("alice"));
    }

    #[test]
    fn test_unsupported() {
        assert_eq!(
            GithubSource.classify(&json!({"zen": "hi"}), Some("ping")),
            Err(UnsupportedEvent("ping".into()))
        );
        assert_eq!(
            GithubSource.classify(&json!({}), None),
            Err(UnsupportedEvent("unknown".into()))
        );
        let mut payload = opened_pr();
        payload["action"] = json!("labeled");
        assert_eq!(
            GithubSource.classify(&payload, Some("pull_request")).unwrap_err().to_string(),
            "Unsupported event: pull_request.labeled"
        );
    }
}
