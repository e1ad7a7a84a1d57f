//! Null-safe access into webhook payloads.
//!
//! Payload shapes vary between sources and even between deliveries of the
//! same source. Every accessor here resolves a missing or mistyped field to
//! an empty value instead of failing.

use serde_json::{Map, Value};

/// Follows a dotted path (`pull_request.user.login`). Numeric segments
/// index into arrays.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .filter(|v| !v.is_null())
}

/// The string at `path`, or `""`. Numbers and booleans are stringified.
pub fn get_str(value: &Value, path: &str) -> String {
    match get(value, path) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// The boolean at `path`, `false` when absent.
pub fn get_bool(value: &Value, path: &str) -> bool {
    get(value, path).and_then(Value::as_bool).unwrap_or(false)
}

/// Collects `field` from each object of the array at `path`, skipping
/// blanks.
///
/// ```rust,ignore
/// // {"reviewers": [{"login": "bob"}, {"login": "carol"}]}
/// assert_eq!(pluck(&payload, "reviewers", "login"), ["bob", "carol"]);
/// ```
pub fn pluck(value: &Value, path: &str, field: &str) -> Vec<String> {
    get(value, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| get_str(item, field))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Flattens nested objects into `a_b` keys. Arrays and scalars are kept as
/// values at their flattened key.
pub fn flatten(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    if let Value::Object(map) = value {
        flatten_into(&mut out, "", map);
    }
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: &str, map: &Map<String, Value>) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(out, &name, inner),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

/// A context value as a comparable string.
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_as_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_missing_fields_are_empty() {
        let payload = json!({"pull_request": {"user": {"login": "alice"}, "title": null}});

        assert_eq!(get_str(&payload, "pull_request.user.login"), "alice");
        assert_eq!(get_str(&payload, "pull_request.title"), "");
        assert_eq!(get_str(&payload, "pull_request.head.ref"), "");
        assert_eq!(get_str(&payload, "pull_request.user.login.deeper"), "");
        assert!(get(&payload, "nope").is_none());
        assert!(!get_bool(&payload, "pull_request.merged"));
    }

    #[test]
    fn test_array_index_and_pluck() {
        let payload = json!({"reviewers": [{"login": "bob"}, {"name": "x"}, {"login": "carol"}]});
        assert_eq!(get_str(&payload, "reviewers.0.login"), "bob");
        assert_eq!(pluck(&payload, "reviewers", "login"), vec!["bob", "carol"]);
        assert!(pluck(&payload, "missing", "login").is_empty());
    }

    #[test]
    fn test_flatten() {
        let flat = flatten(&json!({
            "event": "deploy",
            "build": {"number": 7, "meta": {"branch": "main"}},
            "tags": ["a", "b"]
        }));
        assert_eq!(flat["event"], "deploy");
        assert_eq!(flat["build_number"], 7);
        assert_eq!(flat["build_meta_branch"], "main");
        assert_eq!(value_as_string(&flat["tags"]), "a,b");
    }
}
